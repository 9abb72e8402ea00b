//! # Version Log
//!
//! The version table: for each committed version, the page id of its root.
//! Versions are 1-based and monotonic; version 0 is the empty store.
//!
//! ## File Format
//!
//! A flat sequence of big-endian u64 page ids. Entry `V` (zero-based) is the
//! root page id of version `V + 1`. On open the log is scanned from the
//! start and the version counter resumes at the entry count; a torn trailing
//! entry (fewer than 8 bytes) is ignored, treated as never written.
//!
//! ## Rewrites
//!
//! Committing a batch rewrites the entry of the version being superseded:
//! peeling moved parts of that version's tree into fresh pages, so its root
//! page id changes even though its logical contents do not. The entry for
//! the new version is appended after it, which makes the append the commit
//! point for crash recovery.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use zerocopy::byteorder::big_endian::U64;
use zerocopy::FromBytes;

use super::{PageId, Version};
use crate::config::VERSION_ENTRY_SIZE;

pub struct VersionLog {
    file: Option<File>,
    roots: HashMap<Version, PageId>,
    current: Version,
}

impl VersionLog {
    pub fn in_memory() -> Self {
        Self {
            file: None,
            roots: HashMap::new(),
            current: 0,
        }
    }

    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let file = if read_only {
            File::open(path)
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
        }
        .wrap_err_with(|| format!("opening version file {}", path.display()))?;

        let mut roots = HashMap::new();
        let mut current: Version = 0;
        let mut entry = [0u8; VERSION_ENTRY_SIZE as usize];
        loop {
            match file.read_exact_at(&mut entry, current * VERSION_ENTRY_SIZE) {
                Ok(()) => {
                    let id = U64::read_from_bytes(&entry)
                        .map_err(|e| eyre::eyre!("version entry {current}: {e:?}"))?
                        .get();
                    current += 1;
                    roots.insert(current, id);
                }
                // A torn tail entry reads short; it was never committed.
                Err(_) => break,
            }
        }

        Ok(Self {
            file: Some(file),
            roots,
            current,
        })
    }

    pub fn current(&self) -> Version {
        self.current
    }

    pub fn bump(&mut self) {
        self.current += 1;
    }

    pub fn root_of(&self, version: Version) -> Option<PageId> {
        self.roots.get(&version).copied()
    }

    pub fn record(&mut self, version: Version, root: PageId) -> Result<()> {
        self.roots.insert(version, root);
        if let Some(file) = self.file.as_ref() {
            let entry = root.to_be_bytes();
            file.write_all_at(&entry, (version - 1) * VERSION_ENTRY_SIZE)
                .wrap_err_with(|| format!("recording version {version}"))?;
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        if let Some(file) = self.file.as_ref() {
            file.sync_all().wrap_err("syncing version file")?;
        }
        Ok(())
    }
}

//! # Value Store
//!
//! Holds the bodies of values too large to inline in a leaf. Small values
//! (at or below the store's inline threshold) never reach this module; large
//! ones are appended to the blob area and the leaf keeps a value id plus a
//! reserved hash slot.
//!
//! ## Addressing
//!
//! A value id of 0 means "no external value". In file mode ids double as
//! offsets: value `V` starts at byte `V - 1` of the value file and the id
//! counter advances by the value's byte length, so `next_id` is always one
//! past the end of the blob area. Lengths are not stored here; they are
//! recovered from the leaf headers in the page format.
//!
//! In memory mode ids are a unit counter and bytes live in a map, so freeing
//! actually releases them; the blob file itself is append-only and freeing
//! merely forgets the id.
//!
//! ## Hashes
//!
//! Each out-of-line value has a hash slot of the store's configured length,
//! zero-filled unless a hash was recorded. The hashing algorithm is
//! pluggable and intentionally absent.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;

use super::ValueId;

pub struct ValueStore {
    file: Option<File>,
    map: HashMap<ValueId, Vec<u8>>,
    lens: HashMap<ValueId, u32>,
    hashes: HashMap<ValueId, Vec<u8>>,
    max_value_id: u64,
}

impl ValueStore {
    pub fn in_memory() -> Self {
        Self {
            file: None,
            map: HashMap::new(),
            lens: HashMap::new(),
            hashes: HashMap::new(),
            max_value_id: 0,
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
        .wrap_err_with(|| format!("opening value file {}", path.display()))?;

        // Ids are byte offsets + 1, so the append point is the file length.
        let max_value_id = file.metadata()?.len();

        Ok(Self {
            file: Some(file),
            map: HashMap::new(),
            lens: HashMap::new(),
            hashes: HashMap::new(),
            max_value_id,
        })
    }

    pub fn next_id(&self) -> ValueId {
        self.max_value_id + 1
    }

    pub fn add(&mut self, value_id: ValueId, value: &[u8]) -> Result<()> {
        match self.file.as_ref() {
            Some(file) => {
                file.write_all_at(value, value_id - 1)
                    .wrap_err_with(|| format!("appending value {value_id}"))?;
                self.max_value_id += value.len() as u64;
            }
            None => {
                self.map.insert(value_id, value.to_vec());
                self.lens.insert(value_id, value.len() as u32);
                self.max_value_id += 1;
            }
        }
        Ok(())
    }

    pub fn read(&self, value_id: ValueId, len: u32) -> Result<Vec<u8>> {
        match self.file.as_ref() {
            Some(file) => {
                let mut buf = vec![0u8; len as usize];
                file.read_exact_at(&mut buf, value_id - 1)
                    .wrap_err_with(|| format!("value {value_id} short read, wanted {len} bytes"))?;
                Ok(buf)
            }
            None => {
                let value = self
                    .map
                    .get(&value_id)
                    .ok_or_else(|| eyre::eyre!("value {value_id} missing"))?;
                ensure!(
                    value.len() == len as usize,
                    "value {} has {} bytes, leaf header says {}",
                    value_id,
                    value.len(),
                    len
                );
                Ok(value.clone())
            }
        }
    }

    pub fn free(&mut self, value_id: ValueId) {
        if value_id == 0 {
            return;
        }
        self.map.remove(&value_id);
        self.lens.remove(&value_id);
        self.hashes.remove(&value_id);
    }

    pub fn hash(&self, value_id: ValueId) -> Option<&[u8]> {
        self.hashes.get(&value_id).map(Vec::as_slice)
    }

    /// Number of tracked out-of-line values (memory mode only; the blob file
    /// does not index its contents).
    pub fn tracked(&self) -> usize {
        self.lens.len()
    }

    /// Total bytes held out of line: the blob length in file mode, the sum
    /// of tracked lengths otherwise.
    pub fn total_bytes(&self) -> u64 {
        if self.file.is_some() {
            self.max_value_id
        } else {
            self.lens.values().map(|&l| l as u64).sum()
        }
    }

    pub fn sync(&self) -> Result<()> {
        if let Some(file) = self.file.as_ref() {
            file.sync_all().wrap_err("syncing value file")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_ids_count_up() {
        let mut values = ValueStore::in_memory();

        let a = values.next_id();
        values.add(a, b"alpha").unwrap();
        let b = values.next_id();
        values.add(b, b"beta").unwrap();

        assert_eq!((a, b), (1, 2));
        assert_eq!(values.read(a, 5).unwrap(), b"alpha");
        assert_eq!(values.read(b, 4).unwrap(), b"beta");
    }

    #[test]
    fn file_ids_are_offsets_plus_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values");
        let mut values = ValueStore::open(&path, false).unwrap();

        let a = values.next_id();
        values.add(a, b"alpha").unwrap();
        let b = values.next_id();
        values.add(b, b"beta").unwrap();

        assert_eq!((a, b), (1, 6));
        assert_eq!(values.read(a, 5).unwrap(), b"alpha");
        assert_eq!(values.read(b, 4).unwrap(), b"beta");
    }

    #[test]
    fn reopen_resumes_appending_past_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values");
        {
            let mut values = ValueStore::open(&path, false).unwrap();
            values.add(values.next_id(), b"12345678").unwrap();
        }

        let values = ValueStore::open(&path, false).unwrap();
        assert_eq!(values.next_id(), 9);
    }

    #[test]
    fn short_read_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values");
        let mut values = ValueStore::open(&path, false).unwrap();
        values.add(values.next_id(), b"abc").unwrap();

        let err = values.read(1, 10).unwrap_err();
        assert!(err.to_string().contains("short read"));
    }

    #[test]
    fn free_forgets_memory_values() {
        let mut values = ValueStore::in_memory();
        let id = values.next_id();
        values.add(id, b"gone").unwrap();

        values.free(id);
        assert!(values.read(id, 4).is_err());
        assert_eq!(values.tracked(), 0);

        // Freeing the "no external value" id is a no-op.
        values.free(0);
    }
}

//! # Store Builder
//!
//! Configures and opens a [`Store`]. With no path the store is in-memory;
//! with a directory the three backing files are created (or opened, in
//! read-only mode) inside it and the last committed version, if any, is
//! installed as the root.
//!
//! Stores must be reopened with the hash length and inline-value threshold
//! they were written with; both knobs shape the page format.

use std::path::PathBuf;

use eyre::Result;

use super::Store;
use crate::config::{DEFAULT_HASH_LENGTH, DEFAULT_INLINE_VALUE_MAX, PAGE_CACHE_CAPACITY};
use crate::node::NodeArena;
use crate::storage::{PageCache, PageStore, ValueStore, VersionLog};

pub const PAGE_FILE_NAME: &str = "arbor.pages";
pub const VALUE_FILE_NAME: &str = "arbor.values";
pub const VERSION_FILE_NAME: &str = "arbor.versions";

pub struct StoreBuilder {
    dir: Option<PathBuf>,
    read_only: bool,
    hash_length: u32,
    inline_value_max: u32,
    page_cache: bool,
    cache_capacity: usize,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self {
            dir: None,
            read_only: false,
            hash_length: DEFAULT_HASH_LENGTH,
            inline_value_max: DEFAULT_INLINE_VALUE_MAX,
            page_cache: false,
            cache_capacity: PAGE_CACHE_CAPACITY,
        }
    }

    /// Directory holding the page, value, and version files.
    pub fn path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Length of the reserved hash slots in arrow headers and out-of-line
    /// value bodies.
    pub fn hash_length(mut self, len: u32) -> Self {
        self.hash_length = len;
        self
    }

    /// Largest value stored inline in a leaf body.
    pub fn inline_value_max(mut self, max: u32) -> Self {
        self.inline_value_max = max;
        self
    }

    /// Enables the LRU page cache.
    pub fn page_cache(mut self, enabled: bool) -> Self {
        self.page_cache = enabled;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn open(self) -> Result<Store> {
        let cache = if self.page_cache {
            PageCache::with_capacity(self.cache_capacity)
        } else {
            PageCache::disabled()
        };

        let (pages, values, versions) = match self.dir {
            None => (
                PageStore::in_memory(),
                ValueStore::in_memory(),
                VersionLog::in_memory(),
            ),
            Some(dir) => (
                PageStore::open(&dir.join(PAGE_FILE_NAME), self.read_only, cache)?,
                ValueStore::open(&dir.join(VALUE_FILE_NAME), self.read_only)?,
                VersionLog::open(&dir.join(VERSION_FILE_NAME), self.read_only)?,
            ),
        };

        let mut store = Store {
            arena: NodeArena::new(),
            pages,
            values,
            versions,
            root: None,
            prev_root: None,
            hash_len: self.hash_length,
            inline_max: self.inline_value_max,
            compare: super::byte_compare,
            committed_pages: 0,
        };
        store.install_committed_root()?;
        Ok(store)
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_without_path_is_in_memory() {
        let mut store = StoreBuilder::new().open().unwrap();
        store.insert(b"k", b"v").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn opening_an_empty_directory_starts_at_version_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::builder().path(dir.path()).open().unwrap();
        assert_eq!(store.current_version(), 0);
    }

    #[test]
    fn files_are_created_next_to_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::builder().path(dir.path()).open().unwrap();
        drop(store);

        assert!(dir.path().join(PAGE_FILE_NAME).exists());
        assert!(dir.path().join(VALUE_FILE_NAME).exists());
        assert!(dir.path().join(VERSION_FILE_NAME).exists());
    }

    #[test]
    fn read_only_open_requires_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let result = Store::builder().path(dir.path()).read_only(true).open();
        assert!(result.is_err());
    }
}

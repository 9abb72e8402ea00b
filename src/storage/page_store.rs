//! # Page Store
//!
//! Fixed-size page slab with id allocation, a free list, and the recycle set
//! that defers reuse of peeled pages until the commit that follows them.
//!
//! ## Backing
//!
//! Either an in-memory map (no files configured) or a page file where page
//! `P` occupies bytes `[P * PAGE_SIZE, (P + 1) * PAGE_SIZE)`. All file access
//! is positioned, so the store never depends on a shared cursor. A committed
//! page may be shorter than `PAGE_SIZE`; the unwritten tail is never
//! referenced because every offset inside a page is derived from its own
//! header.
//!
//! ## Allocation Order
//!
//! `allocate` prefers, in order:
//!
//! 1. the recycle set, largest id first (deterministic across runs);
//! 2. the free list, LIFO;
//! 3. a fresh id, `max_page_id + 1`.
//!
//! Page id 0 is reserved as "none" and never handed out.
//!
//! ## Recycling
//!
//! When a peel fully materializes a page that contains no pinned nodes, the
//! page id enters the recycle set. Ids still in the set when a commit
//! finishes are freed onto the free list; until then the bytes stay
//! readable, which keeps the previous version inspectable mid-transaction.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use hashbrown::{HashMap, HashSet};
use tracing::trace;

use super::cache::PageCache;
use super::PageId;
use crate::config::PAGE_SIZE;

pub struct PageStore {
    file: Option<File>,
    map: HashMap<PageId, Arc<[u8]>>,
    freelist: Vec<PageId>,
    recycle: HashSet<PageId>,
    cache: PageCache,
    max_page_id: PageId,
    page_space: u64,
}

impl PageStore {
    pub fn in_memory() -> Self {
        Self {
            file: None,
            map: HashMap::new(),
            freelist: Vec::new(),
            recycle: HashSet::new(),
            cache: PageCache::disabled(),
            max_page_id: 0,
            page_space: 0,
        }
    }

    pub fn open(path: &Path, read_only: bool, cache: PageCache) -> Result<Self> {
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
        .wrap_err_with(|| format!("opening page file {}", path.display()))?;

        // The last committed page is usually shorter than PAGE_SIZE, so the
        // floor of len / PAGE_SIZE is exactly the highest written page id.
        let len = file.metadata()?.len();
        let max_page_id = len / PAGE_SIZE as u64;

        Ok(Self {
            file: Some(file),
            map: HashMap::new(),
            freelist: Vec::new(),
            recycle: HashSet::new(),
            cache,
            max_page_id,
            page_space: 0,
        })
    }

    pub fn max_page_id(&self) -> PageId {
        self.max_page_id
    }

    pub fn page_space(&self) -> u64 {
        self.page_space
    }

    pub fn allocate(&mut self) -> PageId {
        if let Some(&id) = self.recycle.iter().max() {
            self.recycle.remove(&id);
            trace!(page_id = id, "allocating recycled page");
            return id;
        }
        if let Some(id) = self.freelist.pop() {
            return id;
        }
        self.max_page_id += 1;
        self.max_page_id
    }

    /// Marks a fully-materialized page for reuse at the next commit.
    pub fn recycle(&mut self, page_id: PageId) {
        self.recycle.insert(page_id);
    }

    /// Empties the recycle set, returning the ids that were never re-allocated.
    pub fn take_recycle(&mut self) -> Vec<PageId> {
        let mut ids: Vec<PageId> = self.recycle.drain().collect();
        ids.sort_unstable();
        ids
    }

    pub fn free(&mut self, page_id: PageId) {
        self.cache.remove(page_id);
        if let Some(data) = self.map.remove(&page_id) {
            self.page_space -= data.len() as u64;
        }
        self.freelist.push(page_id);
    }

    pub fn read(&mut self, page_id: PageId) -> Result<Option<Arc<[u8]>>> {
        let Some(file) = self.file.as_ref() else {
            return Ok(self.map.get(&page_id).cloned());
        };
        if let Some(data) = self.cache.get(page_id) {
            return Ok(Some(data));
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file
                .read_at(&mut buf[filled..], page_id * PAGE_SIZE as u64 + filled as u64)
                .wrap_err_with(|| format!("reading page {page_id}"))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        // A short read at the end of the file leaves the tail zeroed; the
        // deserializer treats a zero node count as an absent page.
        let data: Arc<[u8]> = buf.into_boxed_slice().into();
        self.cache.put(page_id, Arc::clone(&data));
        Ok(Some(data))
    }

    pub fn write(&mut self, page_id: PageId, data: Vec<u8>) -> Result<()> {
        self.page_space += data.len() as u64;
        match self.file.as_ref() {
            Some(file) => {
                file.write_all_at(&data, page_id * PAGE_SIZE as u64)
                    .wrap_err_with(|| format!("writing page {page_id}"))?;
                let data: Arc<[u8]> = data.into_boxed_slice().into();
                self.cache.put(page_id, data);
            }
            None => {
                self.map.insert(page_id, data.into_boxed_slice().into());
            }
        }
        if page_id > self.max_page_id {
            self.max_page_id = page_id;
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        if let Some(file) = self.file.as_ref() {
            file.sync_all().wrap_err("syncing page file")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_start_at_one() {
        let mut pages = PageStore::in_memory();

        assert_eq!(pages.allocate(), 1);
        assert_eq!(pages.allocate(), 2);
        assert_eq!(pages.max_page_id(), 2);
    }

    #[test]
    fn recycle_set_drains_largest_first() {
        let mut pages = PageStore::in_memory();
        for _ in 0..5 {
            pages.allocate();
        }
        pages.recycle(2);
        pages.recycle(4);
        pages.recycle(3);

        assert_eq!(pages.allocate(), 4);
        assert_eq!(pages.allocate(), 3);
        assert_eq!(pages.allocate(), 2);
        assert_eq!(pages.allocate(), 6);
    }

    #[test]
    fn freelist_is_lifo_and_after_recycle() {
        let mut pages = PageStore::in_memory();
        for _ in 0..4 {
            pages.allocate();
        }
        pages.free(1);
        pages.free(3);
        pages.recycle(2);

        assert_eq!(pages.allocate(), 2);
        assert_eq!(pages.allocate(), 3);
        assert_eq!(pages.allocate(), 1);
        assert_eq!(pages.allocate(), 5);
    }

    #[test]
    fn take_recycle_empties_the_set() {
        let mut pages = PageStore::in_memory();
        pages.recycle(7);
        pages.recycle(9);

        assert_eq!(pages.take_recycle(), vec![7, 9]);
        assert!(pages.take_recycle().is_empty());
    }

    #[test]
    fn memory_write_read_free() {
        let mut pages = PageStore::in_memory();
        let id = pages.allocate();
        pages.write(id, b"payload".to_vec()).unwrap();

        assert_eq!(pages.read(id).unwrap().as_deref(), Some(b"payload".as_ref()));
        assert_eq!(pages.page_space(), 7);

        pages.free(id);
        assert!(pages.read(id).unwrap().is_none());
        assert_eq!(pages.page_space(), 0);
        assert_eq!(pages.allocate(), id);
    }

    #[test]
    fn file_write_read_at_page_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages");
        let mut pages = PageStore::open(&path, false, PageCache::disabled()).unwrap();

        let id = pages.allocate();
        pages.write(id, b"first".to_vec()).unwrap();
        let data = pages.read(id).unwrap().unwrap();

        assert_eq!(&data[..5], b"first");
        assert_eq!(data.len(), PAGE_SIZE);
        assert!(data[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn reopen_recovers_max_page_id_from_file_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages");
        {
            let mut pages = PageStore::open(&path, false, PageCache::disabled()).unwrap();
            pages.write(3, vec![0xAB; 100]).unwrap();
        }

        let mut pages = PageStore::open(&path, false, PageCache::disabled()).unwrap();
        assert_eq!(pages.max_page_id(), 3);
        assert_eq!(pages.allocate(), 4);
    }

    #[test]
    fn read_past_end_of_file_is_zeroed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages");
        let mut pages = PageStore::open(&path, false, PageCache::disabled()).unwrap();

        let data = pages.read(12).unwrap().unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn cached_reads_survive_until_free() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages");
        let mut pages = PageStore::open(&path, false, PageCache::with_capacity(8)).unwrap();

        pages.write(1, b"cached".to_vec()).unwrap();
        let first = pages.read(1).unwrap().unwrap();
        let second = pages.read(1).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        pages.free(1);
        let reread = pages.read(1).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &reread));
    }
}

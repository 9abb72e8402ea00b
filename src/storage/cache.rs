//! # Page Cache
//!
//! A bounded LRU from page id to raw page bytes, consulted by the page store
//! before going to the page file. The cache is strictly an accelerator: an
//! evicted page is simply re-read from the file on the next access.
//!
//! ## What Is Cached
//!
//! Raw page bytes, not deserialized subtrees. Deserialized nodes get spliced
//! into the current tree and mutated in place, so sharing them through a
//! cache would alias mutable state. Bytes are immutable once written, with
//! one exception: a page pinned by the previous version is rewritten in
//! place at the same id during commit, so `write` must refresh the entry and
//! `free` must drop it.
//!
//! ## Enablement
//!
//! Disabled by default; `StoreBuilder::page_cache` turns it on. In-memory
//! stores never consult it (the page map already holds the bytes).

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use super::PageId;

pub struct PageCache {
    inner: Option<LruCache<PageId, Arc<[u8]>>>,
}

impl PageCache {
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Some(LruCache::new(capacity)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn get(&mut self, page_id: PageId) -> Option<Arc<[u8]>> {
        self.inner.as_mut()?.get(&page_id).cloned()
    }

    pub fn put(&mut self, page_id: PageId, data: Arc<[u8]>) {
        if let Some(cache) = self.inner.as_mut() {
            cache.put(page_id, data);
        }
    }

    pub fn remove(&mut self, page_id: PageId) {
        if let Some(cache) = self.inner.as_mut() {
            cache.pop(&page_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(b: &[u8]) -> Arc<[u8]> {
        Arc::from(b.to_vec().into_boxed_slice())
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let mut cache = PageCache::disabled();

        cache.put(1, bytes(b"one"));

        assert!(!cache.is_enabled());
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn put_get_remove() {
        let mut cache = PageCache::with_capacity(4);

        cache.put(1, bytes(b"one"));
        cache.put(2, bytes(b"two"));

        assert_eq!(cache.get(1).as_deref(), Some(b"one".as_ref()));
        cache.remove(1);
        assert!(cache.get(1).is_none());
        assert_eq!(cache.get(2).as_deref(), Some(b"two".as_ref()));
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let mut cache = PageCache::with_capacity(2);

        cache.put(1, bytes(b"one"));
        cache.put(2, bytes(b"two"));
        cache.get(1);
        cache.put(3, bytes(b"three"));

        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn write_refresh_replaces_entry() {
        let mut cache = PageCache::with_capacity(2);

        cache.put(1, bytes(b"old"));
        cache.put(1, bytes(b"new"));

        assert_eq!(cache.get(1).as_deref(), Some(b"new".as_ref()));
    }
}

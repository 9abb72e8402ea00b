//! # Commit Protocol
//!
//! Publishes the update buffer as a new immutable version:
//!
//! 1. Measure and page out the current root tree; this yields the new root
//!    page and, as pass-1 side effects, every overflowing subtree page.
//! 2. If a shadow tree exists, measure and page it out too, with the fresh
//!    pin-marker counter scoped past everything step 1 allocated so marker
//!    ids cannot collide. The superseded version's table entry is rewritten
//!    to the shadow's new root.
//! 3. Free whatever is left in the recycle set; pages recycled during this
//!    transaction and not re-allocated by steps 1–2 go to the free list.
//! 4. Advance the version counter and append the new version's entry — the
//!    durable commit point.
//! 5. Install a fresh arrow pair: the current root and the prev-root are
//!    distinct arrows to the same new page, linked back-to-front, and the
//!    arena is reset around them.
//!
//! Committing an empty buffer publishes nothing and returns 0.

use eyre::Result;
use tracing::trace;

use super::Store;
use crate::node::{Arrow, Node, Side};
use crate::storage::PageId;

impl Store {
    /// Splits the update buffer into pages and commits them, advancing the
    /// version table. Returns the number of pages written.
    pub fn commit(&mut self) -> Result<u64> {
        let Some(root) = self.root else {
            return Ok(0);
        };
        // A root that is still an arrow was never peeled: nothing was
        // mutated since the last commit, so there is nothing to publish.
        if matches!(self.arena.node(root), Node::Arrow(_)) {
            return Ok(0);
        }
        let start = self.committed_pages;

        let mut reserve: PageId = 0;
        let metrics = self.measure(root, &mut reserve)?;
        let current_id = self.commit_page(root, metrics)?;

        if let Some(prev) = self.prev_root {
            let mut reserve = self.pages.max_page_id();
            let metrics = self.measure(prev, &mut reserve)?;
            let prev_id = self.commit_page(prev, metrics)?;
            self.versions.record(self.versions.current(), prev_id)?;
        }

        for page_id in self.pages.take_recycle() {
            self.pages.free(page_id);
        }

        self.versions.bump();
        self.versions.record(self.versions.current(), current_id)?;

        let height = self.arena.height(root);
        let max = self.arena.max_key(root).to_vec();
        self.arena.clear();
        let prev_arrow = self.arena.alloc(Node::Arrow(Arrow {
            page_id: current_id,
            height,
            max: max.clone(),
            back: None,
            parent: None,
            side: Side::Left,
        }));
        let root_arrow = self.arena.alloc(Node::Arrow(Arrow {
            page_id: current_id,
            height,
            max,
            back: Some(prev_arrow),
            parent: None,
            side: Side::Left,
        }));
        self.root = Some(root_arrow);
        self.prev_root = Some(prev_arrow);

        let written = self.committed_pages - start;
        trace!(
            version = self.versions.current(),
            root_page = current_id,
            pages = written,
            "committed"
        );
        Ok(written)
    }

    /// On open: if the version log recorded anything, probe the last root
    /// page for its height and max-key and install the root/prev-root arrow
    /// pair over it, exactly as a commit would.
    pub(crate) fn install_committed_root(&mut self) -> Result<()> {
        let current = self.versions.current();
        if current == 0 {
            return Ok(());
        }
        let root_page = self
            .versions
            .root_of(current)
            .ok_or_else(|| eyre::eyre!("version {current} has no root entry"))?;
        let (point, _) = self.load_page(root_page, None)?;
        let point = point
            .ok_or_else(|| eyre::eyre!("version {current} root page {root_page} missing"))?;
        let height = self.arena.height(point);
        let max = self.arena.max_key(point).to_vec();

        self.arena.clear();
        let prev_arrow = self.arena.alloc(Node::Arrow(Arrow {
            page_id: root_page,
            height,
            max: max.clone(),
            back: None,
            parent: None,
            side: Side::Left,
        }));
        let root_arrow = self.arena.alloc(Node::Arrow(Arrow {
            page_id: root_page,
            height,
            max,
            back: Some(prev_arrow),
            parent: None,
            side: Side::Left,
        }));
        self.root = Some(root_arrow);
        self.prev_root = Some(prev_arrow);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    #[test]
    fn empty_commit_publishes_nothing() {
        let mut store = Store::in_memory();
        assert_eq!(store.commit().unwrap(), 0);
        assert_eq!(store.current_version(), 0);
    }

    #[test]
    fn commit_installs_the_arrow_pair() {
        let mut store = Store::in_memory();
        store.insert(b"alpha", b"1").unwrap();
        store.insert(b"beta", b"2").unwrap();

        let written = store.commit().unwrap();
        assert!(written >= 1);
        assert_eq!(store.current_version(), 1);

        let root = store.root.unwrap();
        let prev = store.prev_root.unwrap();
        assert_ne!(root, prev);
        let (root_a, prev_a) = (store.arena.arrow(root), store.arena.arrow(prev));
        assert_eq!(root_a.page_id, prev_a.page_id);
        assert_eq!(root_a.back, Some(prev));
        assert!(prev_a.back.is_none());
        assert_eq!(store.arena.len(), 2, "arena reset to the arrow pair");
    }

    #[test]
    fn insert_commit_get() {
        let mut store = Store::in_memory();
        store.insert(b"alpha", b"1").unwrap();
        store.insert(b"beta", b"2").unwrap();
        store.commit().unwrap();

        assert_eq!(store.get(b"beta").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(b"gamma").unwrap(), None);
    }

    #[test]
    fn each_commit_advances_the_version() {
        let mut store = Store::in_memory();
        for round in 0..5u32 {
            store
                .insert(format!("k{round}").as_bytes(), b"v")
                .unwrap();
            store.commit().unwrap();
            assert_eq!(store.current_version(), u64::from(round) + 1);
        }
        for round in 0..5u32 {
            assert_eq!(
                store.get(format!("k{round}").as_bytes()).unwrap(),
                Some(b"v".to_vec())
            );
        }
    }

    #[test]
    fn superseded_version_entry_is_rewritten() {
        let mut store = Store::in_memory();
        store.insert(b"a", b"1").unwrap();
        store.commit().unwrap();
        let first_root = store.versions.root_of(1).unwrap();

        store.insert(b"b", b"2").unwrap();
        store.commit().unwrap();

        let rewritten_root = store.versions.root_of(1).unwrap();
        assert_ne!(first_root, rewritten_root);
        // The rewritten entry still answers for version 1's contents.
        assert_eq!(store.get_at_version(1, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get_at_version(1, b"b").unwrap(), None);
        assert_eq!(store.get_at_version(2, b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn commit_after_mutation_keeps_both_trees_sound() {
        let mut store = Store::in_memory();
        for i in 0..32u32 {
            store.insert(format!("k{i:02}").as_bytes(), b"v").unwrap();
        }
        store.commit().unwrap();
        for i in 0..32u32 {
            if i % 3 == 0 {
                store.delete(format!("k{i:02}").as_bytes()).unwrap();
            } else {
                store
                    .insert(format!("k{i:02}").as_bytes(), b"w")
                    .unwrap();
            }
            store.check_invariants().unwrap();
        }
        store.commit().unwrap();
        store.check_invariants().unwrap();

        let root = store.root.unwrap();
        assert!(matches!(store.arena.node(root), Node::Arrow(_)));
    }
}

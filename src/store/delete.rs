//! # Delete
//!
//! Copy-on-write deletion. The pre-scan proves the key exists (and checks
//! arrow descriptors against what their pages actually hold); the mutating
//! descent then mirrors insert: peel arrows, migrate incoming arrows before
//! touching a node, rebalance on the way out.
//!
//! ## Shared Leaves
//!
//! A deleted leaf that the previous version still shares (`arrow` set) is
//! materialized into the shadow tree before it goes — the node is leaving
//! the current tree, so nothing would ever re-anchor the shadow's arrow to
//! it again, and the page it came from may be recycled out from under that
//! arrow within the same transaction. Its out-of-line value stays alive for
//! the shadow. An unshared leaf just frees its value id.

use eyre::{ensure, Result};
use tracing::trace;

use super::Store;
use crate::node::{Node, NodeId};

impl Store {
    /// Removes `key`. Returns `false` when the key is absent.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let Some(root) = self.root else {
            return Ok(false);
        };
        let mark = self.arena.mark();
        let mut current = Some(root);
        let found = loop {
            let Some(id) = current else { break false };
            match self.arena.node(id) {
                Node::Leaf(l) => break l.key == key,
                Node::Fork(f) => {
                    let (left, right) = (f.left, f.right);
                    current = Some(if self.routes_left(key, left) { left } else { right });
                }
                Node::Arrow(a) => {
                    let (page_id, max, height) = (a.page_id, a.max.clone(), a.height);
                    let (point, _) = self.load_page(page_id, Some((&max, height)))?;
                    let point = point.ok_or_else(|| {
                        eyre::eyre!("page {page_id} missing during delete pre-scan")
                    })?;
                    ensure!(
                        self.arena.height(point) == height,
                        "page {} holds height {}, arrow expects {}",
                        page_id,
                        self.arena.height(point),
                        height
                    );
                    current = Some(point);
                }
            }
        };
        self.arena.truncate(mark);
        if !found {
            return Ok(false);
        }

        self.root = self.delete_at(root, key)?;
        Ok(true)
    }

    fn delete_at(&mut self, id: NodeId, key: &[u8]) -> Result<Option<NodeId>> {
        match self.arena.node(id) {
            Node::Arrow(_) => {
                let point = self.peel(id)?;
                self.delete_at(point, key)
            }
            Node::Leaf(l) => {
                // The pre-scan proved the key matches this leaf.
                let (arrow, value_id) = (l.arrow, l.value_id);
                trace!(key = ?String::from_utf8_lossy(key), "deleting leaf");
                match arrow {
                    Some(a) => self.move_arrow_over_leaf(a, id)?,
                    None => self.values.free(value_id),
                }
                Ok(None)
            }
            Node::Fork(f) => {
                let (left, right, arrow) = (f.left, f.right, f.arrow);
                let go_left = self.routes_left(key, left);
                if let Some(a) = arrow {
                    self.move_arrow_over_fork(a, id);
                }

                if self.is_leaf(left)? && self.is_leaf(right)? {
                    trace!("collapsing fork over two leaves");
                    let nl = self.peel(left)?;
                    let nr = self.peel(right)?;
                    let (dead, survivor) = if go_left { (nl, nr) } else { (nr, nl) };
                    let (dead_arrow, dead_value) =
                        (self.arena.leaf(dead).arrow, self.arena.leaf(dead).value_id);
                    match dead_arrow {
                        Some(a) => self.move_arrow_over_leaf(a, dead)?,
                        None => self.values.free(dead_value),
                    }
                    return Ok(Some(survivor));
                }

                if go_left {
                    match self.delete_at(left, key)? {
                        None => return Ok(Some(right)),
                        Some(new_left) => self.arena.fork_mut(id).left = new_left,
                    }
                } else {
                    match self.delete_at(right, key)? {
                        None => return Ok(Some(left)),
                        Some(new_right) => {
                            let max = self.arena.max_key(new_right).to_vec();
                            let f = self.arena.fork_mut(id);
                            f.right = new_right;
                            f.max = max;
                        }
                    }
                }
                self.rebalance(id).map(Some)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_missing_key_is_false() {
        let mut store = Store::in_memory();
        assert!(!store.delete(b"nope").unwrap());
        store.insert(b"a", b"1").unwrap();
        assert!(!store.delete(b"b").unwrap());
        assert!(store.delete(b"a").unwrap());
        assert!(store.root.is_none());
    }

    #[test]
    fn delete_collapses_fork_over_two_leaves() {
        let mut store = Store::in_memory();
        store.insert(b"a", b"1").unwrap();
        store.insert(b"b", b"2").unwrap();

        assert!(store.delete(b"a").unwrap());
        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
        let root = store.root.unwrap();
        assert_eq!(store.arena.leaf(root).key, b"b");
    }

    #[test]
    fn interleaved_inserts_and_deletes_stay_balanced() {
        let mut store = Store::in_memory();
        for i in 0..48u32 {
            store.insert(format!("k{i:03}").as_bytes(), b"v").unwrap();
        }
        for i in (0..48u32).step_by(2) {
            assert!(store.delete(format!("k{i:03}").as_bytes()).unwrap());
            store.check_invariants().unwrap();
        }
        for i in 0..48u32 {
            let want = if i % 2 == 0 { None } else { Some(b"v".to_vec()) };
            assert_eq!(store.get(format!("k{i:03}").as_bytes()).unwrap(), want);
        }
    }

    #[test]
    fn delete_to_empty_and_rebuild() {
        let mut store = Store::in_memory();
        for key in [b"p".as_ref(), b"q", b"r"] {
            store.insert(key, b"v").unwrap();
        }
        for key in [b"q".as_ref(), b"p", b"r"] {
            assert!(store.delete(key).unwrap());
            store.check_invariants().unwrap();
        }
        assert!(store.root.is_none());

        store.insert(b"fresh", b"start").unwrap();
        assert_eq!(store.get(b"fresh").unwrap(), Some(b"start".to_vec()));
    }

    #[test]
    fn unshared_out_of_line_value_is_released() {
        let mut store = Store::in_memory();
        let big = vec![7u8; 4 * store.inline_max as usize];
        store.insert(b"big", &big).unwrap();
        store.insert(b"other", b"x").unwrap();
        store.commit().unwrap();
        // Commit moved the big value out of line; deleting on top of the
        // committed state keeps it alive for the previous version.
        assert!(store.delete(b"big").unwrap());
        assert_eq!(store.get(b"big").unwrap(), None);
        assert_eq!(store.get_at_version(1, b"big").unwrap(), Some(big));
    }
}

//! # Insert
//!
//! Copy-on-write insertion. A pre-scan (no mutation) detects the no-op case
//! of re-inserting an identical key/value pair; the mutating descent then
//! peels arrows on the path, migrates any incoming arrow off a node before
//! touching it, and rebalances bottom-up with classical AVL rotations.
//!
//! ## Rotations and Arrows
//!
//! Every rotation participant that still carries an arrow gets
//! `move_arrow_over_fork` called on it first, so the previous version's view
//! is materialized into the shadow tree before the in-place rewiring. The
//! rotation itself then recomputes heights and max-keys bottom-up.

use std::cmp::Ordering;

use eyre::Result;
use tracing::trace;

use super::Store;
use crate::node::{Fork, Leaf, Node, NodeId};

impl Store {
    /// Inserts or overwrites `key`. Returns `true` when the key was new,
    /// `false` when it already existed — including the no-op case of an
    /// identical value, which leaves the tree untouched.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        let mut inserted = true;
        let mark = self.arena.mark();
        let mut current = self.root;
        loop {
            let Some(id) = current else { break };
            match self.arena.node(id) {
                Node::Leaf(l) => {
                    let matches = l.key == key;
                    if matches {
                        if self.leaf_value(id)? == value {
                            self.arena.truncate(mark);
                            return Ok(false);
                        }
                        inserted = false;
                    }
                    break;
                }
                Node::Fork(f) => {
                    let (left, right) = (f.left, f.right);
                    current = Some(if self.routes_left(key, left) { left } else { right });
                }
                Node::Arrow(a) => {
                    let (page_id, max, height) = (a.page_id, a.max.clone(), a.height);
                    let (point, _) = self.load_page(page_id, Some((&max, height)))?;
                    current = Some(point.ok_or_else(|| {
                        eyre::eyre!("page {page_id} missing during insert pre-scan")
                    })?);
                }
            }
        }
        self.arena.truncate(mark);

        let root = self.insert_at(self.root, key, value)?;
        self.root = Some(root);
        Ok(inserted)
    }

    fn insert_at(&mut self, current: Option<NodeId>, key: &[u8], value: &[u8]) -> Result<NodeId> {
        let Some(id) = current else {
            trace!(key = ?String::from_utf8_lossy(key), "inserting into empty slot");
            return Ok(self.arena.alloc(Node::Leaf(Leaf::new(key, value))));
        };
        match self.arena.node(id) {
            Node::Arrow(_) => {
                let point = self.peel(id)?;
                self.insert_at(Some(point), key, value)
            }
            Node::Leaf(l) => {
                let cmp = (self.compare)(key, &l.key);
                let (leaf_key, leaf_arrow) = (l.key.clone(), l.arrow);
                match cmp {
                    Ordering::Equal => {
                        if let Some(a) = leaf_arrow {
                            self.move_arrow_over_leaf(a, id)?;
                        }
                        let old_value_id = self.arena.leaf(id).value_id;
                        self.values.free(old_value_id);
                        let l = self.arena.leaf_mut(id);
                        l.value = value.to_vec();
                        l.value_id = 0;
                        l.value_len = value.len() as u32;
                        Ok(id)
                    }
                    Ordering::Less => {
                        let new = self.arena.alloc(Node::Leaf(Leaf::new(key, value)));
                        Ok(self.arena.alloc(Node::Fork(Fork {
                            height: 2,
                            left: new,
                            right: id,
                            max: leaf_key,
                            arrow: None,
                            pinned_page: 0,
                        })))
                    }
                    Ordering::Greater => {
                        let new = self.arena.alloc(Node::Leaf(Leaf::new(key, value)));
                        Ok(self.arena.alloc(Node::Fork(Fork {
                            height: 2,
                            left: id,
                            right: new,
                            max: key.to_vec(),
                            arrow: None,
                            pinned_page: 0,
                        })))
                    }
                }
            }
            Node::Fork(f) => {
                let (left, right, arrow) = (f.left, f.right, f.arrow);
                let go_left = self.routes_left(key, left);
                if let Some(a) = arrow {
                    self.move_arrow_over_fork(a, id);
                }
                if go_left {
                    let new_left = self.insert_at(Some(left), key, value)?;
                    self.arena.fork_mut(id).left = new_left;
                } else {
                    let new_right = self.insert_at(Some(right), key, value)?;
                    let max = self.arena.max_key(new_right).to_vec();
                    let f = self.arena.fork_mut(id);
                    f.right = new_right;
                    f.max = max;
                }
                self.rebalance(id)
            }
        }
    }

    /// Restores the AVL shape at `id` after a child height changed. Any
    /// participant still carrying an arrow is migrated into the shadow tree
    /// before it is rewired.
    pub(super) fn rebalance(&mut self, id: NodeId) -> Result<NodeId> {
        let (left, right) = self.fork_children(id);
        let (lh, rh) = (self.arena.height(left), self.arena.height(right));
        self.arena.fork_mut(id).height = 1 + lh.max(rh);

        if rh > lh && rh - lh > 1 {
            // The right child is a fork: its height is at least 3.
            let nr = self.peel(right)?;
            if let Some(a) = self.arena.fork(nr).arrow {
                self.move_arrow_over_fork(a, nr);
            }
            let (nrl, nrr) = self.fork_children(nr);
            if self.arena.height(nrr) >= self.arena.height(nrl) {
                trace!("single rotation right to left");
                let max = self.arena.max_key(nrl).to_vec();
                let f = self.arena.fork_mut(id);
                f.right = nrl;
                f.max = max;
                self.refresh_height(id);
                self.arena.fork_mut(nr).left = id;
                self.refresh_height(nr);
                Ok(nr)
            } else {
                trace!("double rotation right to left");
                // nrl outranks nrr, so at height >= 2 it is a fork.
                let nrl = self.peel(nrl)?;
                if let Some(a) = self.arena.fork(nrl).arrow {
                    self.move_arrow_over_fork(a, nrl);
                }
                let (nrl_l, nrl_r) = self.fork_children(nrl);
                let max = self.arena.max_key(nrl_l).to_vec();
                let f = self.arena.fork_mut(id);
                f.right = nrl_l;
                f.max = max;
                self.refresh_height(id);
                self.arena.fork_mut(nrl).left = id;
                self.arena.fork_mut(nr).left = nrl_r;
                self.refresh_height(nr);
                let nr_max = self.arena.fork(nr).max.clone();
                let f = self.arena.fork_mut(nrl);
                f.right = nr;
                f.max = nr_max;
                self.refresh_height(nrl);
                Ok(nrl)
            }
        } else if lh > rh && lh - rh > 1 {
            let nl = self.peel(left)?;
            if let Some(a) = self.arena.fork(nl).arrow {
                self.move_arrow_over_fork(a, nl);
            }
            let (nll, nlr) = self.fork_children(nl);
            if self.arena.height(nll) >= self.arena.height(nlr) {
                trace!("single rotation left to right");
                self.arena.fork_mut(id).left = nlr;
                self.refresh_height(id);
                let id_max = self.arena.fork(id).max.clone();
                let f = self.arena.fork_mut(nl);
                f.right = id;
                f.max = id_max;
                self.refresh_height(nl);
                Ok(nl)
            } else {
                trace!("double rotation left to right");
                let nlr = self.peel(nlr)?;
                if let Some(a) = self.arena.fork(nlr).arrow {
                    self.move_arrow_over_fork(a, nlr);
                }
                let (nlr_l, nlr_r) = self.fork_children(nlr);
                self.arena.fork_mut(id).left = nlr_r;
                self.refresh_height(id);
                let id_max = self.arena.fork(id).max.clone();
                let f = self.arena.fork_mut(nlr);
                f.right = id;
                f.max = id_max;
                let max = self.arena.max_key(nlr_l).to_vec();
                let f = self.arena.fork_mut(nl);
                f.right = nlr_l;
                f.max = max;
                self.refresh_height(nl);
                self.arena.fork_mut(nlr).left = nl;
                self.refresh_height(nlr);
                Ok(nlr)
            }
        } else {
            Ok(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_ascending_keys_lean_right_within_balance() {
        let mut store = Store::in_memory();
        store.insert(b"a", b"1").unwrap();
        store.insert(b"b", b"2").unwrap();
        store.insert(b"c", b"3").unwrap();

        let root = store.root.unwrap();
        let f = store.arena.fork(root);
        assert_eq!(f.height, 3);
        assert_eq!(f.max, b"c");
        assert_eq!(store.arena.height(f.left), 1);
        assert_eq!(store.arena.height(f.right), 2);
        store.check_invariants().unwrap();
    }

    #[test]
    fn four_ascending_keys_trigger_a_rotation() {
        let mut store = Store::in_memory();
        for key in [b"a".as_ref(), b"b", b"c", b"d"] {
            store.insert(key, b"v").unwrap();
        }

        let root = store.root.unwrap();
        let f = store.arena.fork(root);
        assert_eq!(f.height, 3);
        assert_eq!(f.max, b"d");
        assert_eq!(store.arena.height(f.left), 2);
        assert_eq!(store.arena.height(f.right), 2);
        store.check_invariants().unwrap();
    }

    #[test]
    fn identical_reinsert_is_a_no_op() {
        let mut store = Store::in_memory();
        assert!(store.insert(b"x", b"1").unwrap());
        let len_before = store.arena.len();
        assert!(!store.insert(b"x", b"1").unwrap());
        assert_eq!(store.arena.len(), len_before);
    }

    #[test]
    fn overwrite_returns_false_and_replaces() {
        let mut store = Store::in_memory();
        assert!(store.insert(b"x", b"1").unwrap());
        assert!(!store.insert(b"x", b"2").unwrap());
        assert_eq!(store.get(b"x").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn many_inserts_stay_balanced_both_directions() {
        let mut store = Store::in_memory();
        for i in 0..64u32 {
            store
                .insert(format!("k{i:04}").as_bytes(), b"v")
                .unwrap();
            store.check_invariants().unwrap();
        }
        for i in (0..64u32).rev() {
            store
                .insert(format!("r{:04}", 64 - i).as_bytes(), b"v")
                .unwrap();
            store.check_invariants().unwrap();
        }
        for i in 0..64u32 {
            assert_eq!(
                store.get(format!("k{i:04}").as_bytes()).unwrap(),
                Some(b"v".to_vec())
            );
        }
    }

    #[test]
    fn max_key_tracks_the_rightmost_leaf() {
        let mut store = Store::in_memory();
        for key in [b"m".as_ref(), b"c", b"t", b"a", b"z"] {
            store.insert(key, b"v").unwrap();
        }
        let root = store.root.unwrap();
        assert_eq!(store.arena.max_key(root), b"z");
    }
}

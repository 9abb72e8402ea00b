//! # Arrow Mechanics
//!
//! Arrows encode shared history between the current tree and the shadow tree
//! of the previous version. This module holds the three operations that keep
//! the sharing sound while the current tree is rewritten:
//!
//! - [`Store::peel`] resolves an arrow on a write path by deserializing its
//!   page and splicing the subtree in, transferring any pending back-arrow
//!   onto the materialized node so the previous version still has a handle.
//! - [`Store::move_arrow_over_fork`] and [`Store::move_arrow_over_leaf`]
//!   migrate an incoming arrow off a node that is about to be mutated: the
//!   shadow tree receives a copy of the node (a fork of two child arrows, or
//!   a materialized leaf) and the current node is released from its past.
//! - [`Store::walk_to_arrow_point`] descends a materialized subtree to the
//!   node a `(key, height)` descriptor addresses, failing loudly when the
//!   structure disagrees with the descriptor.
//!
//! ## Pin Hand-Off
//!
//! When an arrow moves over a pinned fork, page ownership follows the
//! history: the shadow fork inherits the pin and the current fork is
//! unpinned, so the next commit rewrites the page for the previous version
//! while the current version's copy goes wherever packing puts it.

use std::cmp::Ordering;

use eyre::{bail, Result};
use tracing::trace;

use super::Store;
use crate::node::{Arrow, Fork, Leaf, Node, NodeId, Side};

impl Store {
    /// Resolves `id` to a materialized leaf or fork, deserializing pages as
    /// needed. Pages that come back with no pinned nodes are scheduled for
    /// recycling at the next commit.
    pub(crate) fn peel(&mut self, id: NodeId) -> Result<NodeId> {
        let mut current = id;
        loop {
            match self.arena.node(current) {
                Node::Leaf(_) | Node::Fork(_) => return Ok(current),
                Node::Arrow(a) => {
                    let (page_id, max, height, back) =
                        (a.page_id, a.max.clone(), a.height, a.back);
                    let (point, release) = self.load_page(page_id, Some((&max, height)))?;
                    let Some(point) = point else {
                        bail!(
                            "page {} missing while peeling arrow (max {:?} height {})",
                            page_id,
                            String::from_utf8_lossy(&max),
                            height
                        );
                    };
                    if release {
                        trace!(page_id, "peel releases page");
                        self.pages.recycle(page_id);
                    }
                    if let Some(back_id) = back {
                        trace!(page_id, "transferring back-arrow onto peeled node");
                        self.arena.arrow_mut(back_id).page_id = page_id;
                        self.arena.set_back_link(point, back_id);
                        self.arena.arrow_mut(current).back = None;
                    }
                    current = point;
                }
            }
        }
    }

    /// Migrates arrow `a` off fork `f` before `f` is mutated. The shadow
    /// tree gets a fork of two fresh arrows covering `f`'s children, wired
    /// in at `a`'s old position (or as the shadow root).
    pub(crate) fn move_arrow_over_fork(&mut self, a: NodeId, f: NodeId) {
        let (a_page, a_parent, a_side) = {
            let arrow = self.arena.arrow(a);
            (arrow.page_id, arrow.parent, arrow.side)
        };
        let (f_left, f_right, f_max, f_height) = {
            let fork = self.arena.fork(f);
            (fork.left, fork.right, fork.max.clone(), fork.height)
        };
        trace!(
            page_id = a_page,
            max = ?String::from_utf8_lossy(&f_max),
            "moving arrow over fork"
        );

        let l_arrow = self.arena.alloc(Node::Arrow(Arrow {
            page_id: a_page,
            height: self.arena.height(f_left),
            max: self.arena.max_key(f_left).to_vec(),
            back: None,
            parent: None,
            side: Side::Left,
        }));
        let r_arrow = self.arena.alloc(Node::Arrow(Arrow {
            page_id: a_page,
            height: self.arena.height(f_right),
            max: self.arena.max_key(f_right).to_vec(),
            back: None,
            parent: None,
            side: Side::Right,
        }));
        let shadow = self.arena.alloc(Node::Fork(Fork {
            height: f_height,
            left: l_arrow,
            right: r_arrow,
            max: f_max,
            arrow: None,
            pinned_page: 0,
        }));
        self.arena.arrow_mut(l_arrow).parent = Some(shadow);
        self.arena.arrow_mut(r_arrow).parent = Some(shadow);
        self.arena.fork_mut(f).arrow = None;

        // Children that are themselves arrows lend their page id to the new
        // child arrow; materialized children get it as their back-link.
        if let Node::Arrow(child) = self.arena.node(f_left) {
            let page = child.page_id;
            self.arena.arrow_mut(l_arrow).page_id = page;
        }
        self.arena.set_back_link(f_left, l_arrow);
        if let Node::Arrow(child) = self.arena.node(f_right) {
            let page = child.page_id;
            self.arena.arrow_mut(r_arrow).page_id = page;
        }
        self.arena.set_back_link(f_right, r_arrow);

        self.attach_to_shadow(a_parent, a_side, shadow);

        // Page ownership follows the history: once the pinned node is about
        // to change, the previous version keeps the page and the current
        // node is unpinned.
        let pinned = self.arena.fork(f).pinned_page;
        if pinned != 0 {
            self.arena.fork_mut(shadow).pinned_page = pinned;
            self.arena.fork_mut(f).pinned_page = 0;
        }
    }

    /// Migrates arrow `a` off leaf `l` before the leaf is overwritten or
    /// deleted, materializing the value into the shadow copy.
    pub(crate) fn move_arrow_over_leaf(&mut self, a: NodeId, l: NodeId) -> Result<()> {
        let (a_parent, a_side) = {
            let arrow = self.arena.arrow(a);
            (arrow.parent, arrow.side)
        };
        let value = self.leaf_value(l)?;
        let key = self.arena.leaf(l).key.clone();
        trace!(key = ?String::from_utf8_lossy(&key), "moving arrow over leaf");

        let shadow = self.arena.alloc(Node::Leaf(Leaf::new(&key, &value)));
        self.attach_to_shadow(a_parent, a_side, shadow);
        self.arena.leaf_mut(l).arrow = None;
        Ok(())
    }

    fn attach_to_shadow(&mut self, parent: Option<NodeId>, side: Side, node: NodeId) {
        match parent {
            None => self.prev_root = Some(node),
            Some(p) => match side {
                Side::Left => self.arena.fork_mut(p).left = node,
                Side::Right => self.arena.fork_mut(p).right = node,
            },
        }
    }

    /// Descends from materialized node `r` to the node addressed by
    /// `(key, height)`, returning it with its parent fork and side. The
    /// subtree must be fully materialized down to the target; hitting an
    /// arrow or a node that contradicts the descriptor is a structural
    /// mismatch.
    pub(crate) fn walk_to_arrow_point(
        &self,
        r: NodeId,
        key: &[u8],
        height: u32,
    ) -> Result<(NodeId, Option<(NodeId, Side)>)> {
        let mut current = r;
        let mut parent: Option<(NodeId, Side)> = None;
        loop {
            match self.arena.node(current) {
                Node::Leaf(l) => {
                    if height != 1 || l.key != key {
                        bail!(
                            "leaf {:?} where descriptor wants height {} key {:?}",
                            String::from_utf8_lossy(&l.key),
                            height,
                            String::from_utf8_lossy(key)
                        );
                    }
                    return Ok((current, parent));
                }
                Node::Fork(f) => match f.height.cmp(&height) {
                    Ordering::Less => bail!(
                        "fork height {} max {:?} below descriptor height {} key {:?}",
                        f.height,
                        String::from_utf8_lossy(&f.max),
                        height,
                        String::from_utf8_lossy(key)
                    ),
                    Ordering::Greater => {
                        let (left, right) = (f.left, f.right);
                        if self.routes_left(key, left) {
                            parent = Some((current, Side::Left));
                            current = left;
                        } else {
                            parent = Some((current, Side::Right));
                            current = right;
                        }
                    }
                    Ordering::Equal => {
                        if f.max != key {
                            bail!(
                                "fork max {:?} at height {} where descriptor wants key {:?}",
                                String::from_utf8_lossy(&f.max),
                                height,
                                String::from_utf8_lossy(key)
                            );
                        }
                        return Ok((current, parent));
                    }
                },
                Node::Arrow(a) => bail!(
                    "arrow to page {} (max {:?} height {}) on the path to height {} key {:?}",
                    a.page_id,
                    String::from_utf8_lossy(&a.max),
                    a.height,
                    height,
                    String::from_utf8_lossy(key)
                ),
            }
        }
    }
}

//! # Store
//!
//! The engine instance: one AVL+ tree over a page store, value store, and
//! version log, with copy-on-write commits.
//!
//! ## Two Roots
//!
//! Between commits the store tracks two trees. `root` is the current update
//! buffer; after a commit it is a single arrow to the newly written root
//! page. `prev_root` is the shadow tree of the previous version: initially
//! an arrow to the same page, it grows real forks and leaves as the current
//! tree is rewritten and parts of the shared state get peeled away from it.
//!
//! ## Access Model
//!
//! Strictly single-threaded; no operation suspends, every call holds the
//! tree exclusively from entry to return, and external callers serialize.
//! Reads deserialize pages on demand and drop the materialized scratch nodes
//! before returning; only mutations splice deserialized subtrees in.
//!
//! ## Modules
//!
//! - `arrows`: peel, arrow migration, the structural validation walker
//! - `insert` / `delete`: tree rewriting with AVL rebalancing
//! - `pack` / `unpack`: the two-pass page serializer and its inverse
//! - `commit`: the commit protocol and root-arrow installation
//! - `stats`: page reachability and space accounting
//! - `builder`: file configuration and store construction

mod arrows;
mod builder;
mod commit;
mod delete;
mod insert;
mod pack;
mod stats;
mod unpack;

pub use builder::{StoreBuilder, PAGE_FILE_NAME, VALUE_FILE_NAME, VERSION_FILE_NAME};
pub use stats::{ScanReport, SpaceReport, StoreStats};

use std::cmp::Ordering;

use eyre::Result;
use tracing::trace;

use crate::config::{DEFAULT_HASH_LENGTH, DEFAULT_INLINE_VALUE_MAX};
use crate::node::{Node, NodeArena, NodeId};
use crate::storage::{PageStore, ValueStore, Version, VersionLog};

/// Key ordering used for routing decisions. Key equality and prefix
/// compression stay byte-wise regardless of the comparator.
pub type KeyCompare = fn(&[u8], &[u8]) -> Ordering;

fn byte_compare(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

pub struct Store {
    pub(crate) arena: NodeArena,
    pub(crate) pages: PageStore,
    pub(crate) values: ValueStore,
    pub(crate) versions: VersionLog,
    pub(crate) root: Option<NodeId>,
    pub(crate) prev_root: Option<NodeId>,
    pub(crate) hash_len: u32,
    pub(crate) inline_max: u32,
    pub(crate) compare: KeyCompare,
    pub(crate) committed_pages: u64,
}

impl Store {
    /// A store with no backing files. Pages and large values live in maps;
    /// commits still run the full serialization machinery.
    pub fn in_memory() -> Self {
        Self {
            arena: NodeArena::new(),
            pages: PageStore::in_memory(),
            values: ValueStore::in_memory(),
            versions: VersionLog::in_memory(),
            root: None,
            prev_root: None,
            hash_len: DEFAULT_HASH_LENGTH,
            inline_max: DEFAULT_INLINE_VALUE_MAX,
            compare: byte_compare,
            committed_pages: 0,
        }
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// Version of the last commit; 0 before any commit.
    pub fn current_version(&self) -> Version {
        self.versions.current()
    }

    /// Replaces the routing comparator. Must order keys consistently with
    /// the data already in the store.
    pub fn set_compare(&mut self, compare: KeyCompare) {
        self.compare = compare;
    }

    /// Flushes all three files. Dropping the store closes them without
    /// syncing.
    pub fn close(self) -> Result<()> {
        self.pages.sync()?;
        self.values.sync()?;
        self.versions.sync()
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mark = self.arena.mark();
        let result = self.lookup_from(self.root, key);
        self.arena.truncate(mark);
        result
    }

    /// Reads `key` as of a committed `version`, without touching the
    /// current tree, the shadow tree, or the recycle set.
    pub fn get_at_version(&mut self, version: Version, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(root_page) = self.versions.root_of(version) else {
            eyre::bail!(
                "unknown version {} (current is {})",
                version,
                self.versions.current()
            );
        };
        let mark = self.arena.mark();
        let result = self.lookup_versioned(root_page, version, key);
        self.arena.truncate(mark);
        result
    }

    fn lookup_versioned(
        &mut self,
        root_page: crate::storage::PageId,
        version: Version,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let (point, _) = self.load_page(root_page, None)?;
        let point = point
            .ok_or_else(|| eyre::eyre!("version {version} root page {root_page} missing"))?;
        self.lookup_from(Some(point), key)
    }

    fn lookup_from(&mut self, start: Option<NodeId>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut current = start;
        loop {
            let Some(id) = current else {
                return Ok(None);
            };
            match self.arena.node(id) {
                Node::Leaf(l) => {
                    if l.key != key {
                        return Ok(None);
                    }
                    trace!(key = ?String::from_utf8_lossy(key), "get hit leaf");
                    return self.leaf_value(id).map(Some);
                }
                Node::Fork(f) => {
                    let (left, right) = (f.left, f.right);
                    current = Some(if self.routes_left(key, left) { left } else { right });
                }
                Node::Arrow(a) => {
                    let (page_id, max, height) = (a.page_id, a.max.clone(), a.height);
                    let (point, _) = self.load_page(page_id, Some((&max, height)))?;
                    current = Some(point.ok_or_else(|| {
                        eyre::eyre!(
                            "page {} missing (arrow max {:?} height {})",
                            page_id,
                            String::from_utf8_lossy(&max),
                            height
                        )
                    })?);
                }
            }
        }
    }

    /// Whether `id` roots a leaf, resolving arrows without splicing.
    pub(crate) fn is_leaf(&mut self, id: NodeId) -> Result<bool> {
        let mut current = id;
        loop {
            match self.arena.node(current) {
                Node::Leaf(_) => return Ok(true),
                Node::Fork(_) => return Ok(false),
                Node::Arrow(a) => {
                    let (page_id, max, height) = (a.page_id, a.max.clone(), a.height);
                    let (point, _) = self.load_page(page_id, Some((&max, height)))?;
                    current = point.ok_or_else(|| {
                        eyre::eyre!("page {page_id} missing while resolving arrow")
                    })?;
                }
            }
        }
    }

    /// Materialized value bytes of a leaf, inline or from the value store.
    pub(crate) fn leaf_value(&self, id: NodeId) -> Result<Vec<u8>> {
        let l = self.arena.leaf(id);
        if l.value_id == 0 {
            Ok(l.value.clone())
        } else {
            self.values.read(l.value_id, l.value_len)
        }
    }

    /// Routing rule: `key <= max(left)` goes left.
    pub(crate) fn routes_left(&self, key: &[u8], left: NodeId) -> bool {
        (self.compare)(key, self.arena.max_key(left)) != Ordering::Greater
    }

    pub(crate) fn fork_children(&self, id: NodeId) -> (NodeId, NodeId) {
        let f = self.arena.fork(id);
        (f.left, f.right)
    }

    /// Recomputes a fork's height from its children.
    pub(crate) fn refresh_height(&mut self, fork: NodeId) {
        let f = self.arena.fork(fork);
        let h = 1 + self.arena.height(f.left).max(self.arena.height(f.right));
        self.arena.fork_mut(fork).height = h;
    }

    /// Checks stored heights and AVL balance on both the current root and
    /// the shadow root.
    pub fn check_invariants(&self) -> Result<()> {
        if let Some(root) = self.root {
            self.arena.heights_correct(root, "root:")?;
            self.arena.balance_correct(root, "root:")?;
        }
        if let Some(prev) = self.prev_root {
            self.arena.heights_correct(prev, "prev:")?;
            self.arena.balance_correct(prev, "prev:")?;
        }
        Ok(())
    }
}

//! # arbordb - Versioned Ordered Key-Value Store
//!
//! arbordb is a persistent, versioned, ordered key-value store built on an
//! AVL+ tree (keys at the leaves, routing max-keys at the forks) whose nodes
//! are packed into fixed-size disk pages. Updates are copy-on-write: each
//! commit produces a new immutable root while the previous version stays
//! reachable as a shadow tree through *arrow* nodes, and a version table
//! maps version numbers to root pages.
//!
//! ## Quick Start
//!
//! ```ignore
//! use arbordb::Store;
//!
//! let mut store = Store::builder().path("./data").open()?;
//! store.insert(b"alpha", b"1")?;
//! store.insert(b"beta", b"2")?;
//! store.commit()?;
//!
//! assert_eq!(store.get(b"beta")?, Some(b"2".to_vec()));
//! assert_eq!(store.get_at_version(1, b"alpha")?, Some(b"1".to_vec()));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Public API (Store/Builder)        │
//! ├─────────────────────────────────────────┤
//! │ Tree Rewriting (insert/delete/rotations) │
//! │        Arrow Mechanics (peel/move)       │
//! ├─────────────────────────────────────────┤
//! │  Page Serializer (two-pass) / Deserializer │
//! ├─────────────────────────────────────────┤
//! │   Page Store │ Value Store │ Version Log │
//! ├─────────────────────────────────────────┤
//! │     Positioned File I/O + LRU Cache      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Arrows and Versions
//!
//! An arrow is a placeholder for a page-resident subtree: the current tree
//! uses arrows as lazy pointers (resolved by *peeling* the page in on
//! demand), and the shadow tree of the previous version uses them as
//! hand-off links into state it still shares with the current version.
//! Before any shared node is mutated, its incoming arrow migrates onto the
//! shadow side, so after every operation both trees are complete AVL trees.
//!
//! ## Files
//!
//! Three append-mostly files, all accessed with positioned reads/writes:
//! the page file (page `P` at byte `P * PAGE_SIZE`), the value file (large
//! value `V` at byte `V - 1`), and the version file (one big-endian u64
//! root page id per version, torn tails tolerated).
//!
//! ## Concurrency
//!
//! Strictly single-threaded: operations are synchronous, hold the tree
//! exclusively from entry to return, and external callers serialize.

pub mod config;
pub mod encoding;
pub mod node;
pub mod storage;
pub mod store;

pub use config::{DEFAULT_HASH_LENGTH, DEFAULT_INLINE_VALUE_MAX, PAGE_SIZE};
pub use storage::{PageId, ValueId, Version};
pub use store::{
    KeyCompare, ScanReport, SpaceReport, Store, StoreBuilder, StoreStats, PAGE_FILE_NAME,
    VALUE_FILE_NAME, VERSION_FILE_NAME,
};

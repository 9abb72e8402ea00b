//! # Storage Layer
//!
//! The three backing stores of the engine, each usable in-memory or over a
//! file opened read-only or read-write:
//!
//! - [`PageStore`]: fixed-size page slab with free-list and recycle-set
//!   allocation; page `P` lives at file offset `P * PAGE_SIZE`.
//! - [`ValueStore`]: append-only blob area for values above the inline
//!   threshold, addressed by value id (= byte offset + 1 in file mode).
//! - [`VersionLog`]: the version table, one big-endian u64 root page id per
//!   committed version, truncation-tolerant on open.
//!
//! All file access is positioned (`read_at`/`write_at`); nothing shares a
//! file cursor, matching the engine's single-writer, externally-serialized
//! access model.

mod cache;
mod page_store;
mod value_store;
mod version_log;

pub use cache::PageCache;
pub use page_store::PageStore;
pub use value_store::ValueStore;
pub use version_log::VersionLog;

/// Identifies a page in the page file. 0 is reserved as "none".
pub type PageId = u64;

/// Locates a large value in the blob area. 0 means "inline".
pub type ValueId = u64;

/// Monotonic version number. 0 is the empty store; commits count up from 1.
pub type Version = u64;

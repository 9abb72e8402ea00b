//! # Configuration Constants
//!
//! This module centralizes the engine's configuration constants, grouping
//! interdependent values together so a change to one is checked against the
//! others. Constants that depend on each other are co-located to prevent
//! mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> every committed page must satisfy len(data) <= PAGE_SIZE;
//!       │   the serializer's merge test compares against this bound
//!       │
//!       └─> page P occupies file bytes [P*PAGE_SIZE, (P+1)*PAGE_SIZE)
//!
//! DEFAULT_INLINE_VALUE_MAX (128 bytes)
//!       │
//!       └─> must exceed VALUE_REF_SIZE + DEFAULT_HASH_LENGTH, otherwise an
//!           out-of-line reference would be larger than the value it replaces
//!
//! DEFAULT_HASH_LENGTH (32 bytes)
//!       │
//!       ├─> arrow header size = ARROW_HEADER_FIXED + hash length
//!       │
//!       └─> out-of-line value body = VALUE_REF_SIZE + hash length
//!
//! VERSION_ENTRY_SIZE (8 bytes)
//!       │
//!       └─> version file entry V (zero-based) holds the root page id of
//!           version V+1 as a big-endian u64
//! ```
//!
//! ## Runtime Knobs
//!
//! The hash length and inline-value threshold have compile-time defaults here
//! but are settable per store through `StoreBuilder`; a store must be reopened
//! with the values it was written with. `PAGE_SIZE` is compile-time only.

/// Size of each page in bytes. The fundamental unit of allocation and I/O;
/// the serializer packs a connected subtree into each page and never emits
/// more than this many bytes.
pub const PAGE_SIZE: usize = 4096;

/// Default threshold above which a value is stored out of line in the value
/// file. At or below it, value bytes live inline in the leaf body.
pub const DEFAULT_INLINE_VALUE_MAX: u32 = 128;

/// Default length of the reserved hash slots in arrow headers and
/// out-of-line value bodies. Slots are zero-filled; the hashing algorithm is
/// pluggable and not supplied.
pub const DEFAULT_HASH_LENGTH: u32 = 32;

/// Size of the fixed part of an arrow header: page id (8) + subtree height (4).
/// The configured hash length follows.
pub const ARROW_HEADER_FIXED: u32 = 12;

/// Size of an out-of-line value reference before the hash slot: the value id.
pub const VALUE_REF_SIZE: u32 = 8;

/// Size of one version-file entry: a big-endian u64 root page id.
pub const VERSION_ENTRY_SIZE: u64 = 8;

/// Default capacity of the page cache in entries, when enabled.
pub const PAGE_CACHE_CAPACITY: usize = 128 * 1024;

const _: () = assert!(
    DEFAULT_INLINE_VALUE_MAX > VALUE_REF_SIZE + DEFAULT_HASH_LENGTH,
    "an out-of-line reference must be smaller than the smallest value it replaces"
);

const _: () = assert!(
    PAGE_SIZE <= u32::MAX as usize,
    "page offsets are stored as u32"
);

const _: () = assert!(PAGE_CACHE_CAPACITY > 0, "lru capacity must be non-zero");

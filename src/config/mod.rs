mod constants;

pub use constants::{
    ARROW_HEADER_FIXED, DEFAULT_HASH_LENGTH, DEFAULT_INLINE_VALUE_MAX, PAGE_CACHE_CAPACITY,
    PAGE_SIZE, VALUE_REF_SIZE, VERSION_ENTRY_SIZE,
};

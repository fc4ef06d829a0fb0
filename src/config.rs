//! Runtime tunables read from the environment, cached behind `once_cell`.
//!
//! Mirrors the source system's habit of reading environment-provided knobs
//! instead of a config file; a host that wants a config file can simply set
//! these variables before the first call into the crate.

use once_cell::sync::Lazy;

/// Gates whether `Cursor::set_min` is allowed to skip whole sub-chunks.
/// Disabled by default because the skip logic trusts the `CHUNK_SPLIT`
/// directory being monotonic in `rid`, which bulk-loaded indexes guarantee
/// but heavily-updated ones may not.
pub static CURSOR_SET_MIN_ENABLE: Lazy<bool> = Lazy::new(|| {
    std::env::var("GRN_II_CURSOR_SET_MIN_ENABLE")
        .map(|v| v != "0" && !v.is_empty())
        .unwrap_or(false)
});

/// Sizing knobs a caller may override at `ii_create` time, overlaid on top
/// of the compiled-in [`crate::constants`] defaults.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub segment_size: usize,
    pub chunk_ceiling: usize,
    pub chunk_split_threshold: usize,
    pub split_buffer_nterms: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            segment_size: crate::constants::S_SEGMENT,
            chunk_ceiling: crate::constants::S_CHUNK,
            chunk_split_threshold: crate::constants::CHUNK_SPLIT_THRESHOLD,
            split_buffer_nterms: crate::constants::SPLIT_BUFFER_NTERMS,
        }
    }
}

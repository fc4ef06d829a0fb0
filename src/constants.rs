//! Sizing constants for the segment/chunk store and codec.
//!
//! Values mirror the on-disk layout this crate targets; changing them
//! changes the wire format, not just performance.

/// log2 of the fixed segment size (buffer pages and array pages).
pub const W_SEGMENT: u32 = 18;
pub const S_SEGMENT: usize = 1 << W_SEGMENT;

/// Number of logical segments addressable in the header maps.
pub const MAX_LSEG: usize = 1 << 17;
/// Number of physical segments in the backing file.
pub const MAX_PSEG: u32 = 0x20000;
pub const NOT_ASSIGNED: u32 = u32::MAX;

/// log2 of the element size within an Array page (2 x u32 = 8 bytes).
pub const W_ARRAY_ELEMENT: u32 = 3;
pub const W_ARRAY: u32 = W_SEGMENT - W_ARRAY_ELEMENT;

/// Background queue capacity for freed buffer segments.
pub const BGQSIZE: usize = 8;

/// Chunk size classing.
pub const W_LEAST_CHUNK: u32 = 9;
pub const W_CHUNK: u32 = 18;
pub const S_CHUNK: usize = 1 << W_CHUNK;
pub const N_CHUNK_VARIATION: usize = (W_CHUNK - W_LEAST_CHUNK) as usize + 1;
pub const N_GARBAGES_TH: u32 = 1;

/// `a[0]` high bit marking a term's posting list as split across sub-chunks.
pub const CHUNK_SPLIT: u32 = 0x8000_0000;
/// Size above which a merged posting list is flushed to its own sub-chunk.
pub const CHUNK_SPLIT_THRESHOLD: usize = 0x6_0000;

/// Maximum term frequency a single update may carry; larger inputs are
/// truncated and the discard count is reported to the caller.
pub const MAX_TF: u32 = 0x1_ffff;

/// Buffer term-count / size threshold past which a buffer is split in two
/// rather than merely flushed.
pub const SPLIT_BUFFER_NTERMS: usize = 1024;

/// Unit size for the bit-packed (PForDelta-like) block codec.
pub const UNIT_SIZE: usize = 128;

/// Number of terms packed per output buffer during the bulk builder's
/// merge phase before it is handed to the chunk store.
pub const BUILDER_NTERMS_PER_BUFFER: usize = 16_380;

/// Default in-memory element budget for one bulk-builder temp block.
pub const BUILDER_BLOCK_ELEMENTS: usize = 16 * 1024 * 1024;

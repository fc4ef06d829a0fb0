//! Size-classed chunk allocator with per-class garbage recycling.
//!
//! Allocations at or below the allocator's ceiling (`S_CHUNK` by default,
//! overridable via [`crate::config::StoreOptions::chunk_ceiling`]) are
//! rounded up to the nearest power-of-two size class; larger ones come
//! from a separate bump allocator over ceiling-sized extents (a
//! deliberate simplification of the bitmap-scanned oversized path — see
//! DESIGN.md: no testable property depends on oversized-extent reuse).

use std::collections::VecDeque;

use crate::constants::{N_CHUNK_VARIATION, N_GARBAGES_TH, S_CHUNK, W_LEAST_CHUNK};
use crate::error::{IiError, IiResult};

pub fn class_size(m: usize) -> usize {
    1usize << (W_LEAST_CHUNK as usize + m)
}

#[derive(Debug)]
pub struct ChunkAllocator {
    frontiers: [u64; N_CHUNK_VARIATION],
    garbages: Vec<VecDeque<u64>>,
    oversized_next: u64,
    /// Allocations at or below this size are size-classed; larger ones
    /// come from the oversized bump allocator. Overridable via
    /// [`crate::config::StoreOptions::chunk_ceiling`].
    ceiling: usize,
}

/// One allocation's location and the size class it actually occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkAlloc {
    pub offset: u64,
    pub alloc_size: usize,
}

impl ChunkAllocator {
    pub fn new() -> Self {
        Self::with_ceiling(S_CHUNK)
    }

    pub fn with_ceiling(ceiling: usize) -> Self {
        ChunkAllocator {
            frontiers: [0; N_CHUNK_VARIATION],
            garbages: (0..N_CHUNK_VARIATION).map(|_| VecDeque::new()).collect(),
            oversized_next: 0,
            ceiling,
        }
    }

    fn class_for_size(&self, size: usize) -> Option<usize> {
        if size == 0 || size > self.ceiling {
            return None;
        }
        for m in 0..N_CHUNK_VARIATION {
            if size <= class_size(m) {
                return Some(m);
            }
        }
        None
    }

    pub fn alloc(&mut self, size: usize) -> IiResult<ChunkAlloc> {
        if size == 0 {
            return Err(IiError::InvalidArgument("zero-size chunk alloc".into()));
        }
        match self.class_for_size(size) {
            Some(m) => {
                let alloc_size = class_size(m);
                if self.garbages[m].len() as u32 > N_GARBAGES_TH {
                    let offset = self.garbages[m].pop_front().unwrap();
                    return Ok(ChunkAlloc { offset, alloc_size });
                }
                let offset = self.frontiers[m];
                self.frontiers[m] += alloc_size as u64;
                Ok(ChunkAlloc { offset, alloc_size })
            }
            None => {
                let extents = (size + self.ceiling - 1) / self.ceiling;
                let alloc_size = extents * self.ceiling;
                let offset = self.oversized_next;
                self.oversized_next += alloc_size as u64;
                Ok(ChunkAlloc { offset, alloc_size })
            }
        }
    }

    /// Returns a chunk to its size class's garbage ring. Oversized
    /// allocations (`size > ceiling`) are not recycled.
    pub fn free(&mut self, offset: u64, size: usize) {
        if let Some(m) = self.class_for_size(size) {
            self.garbages[m].push_back(offset);
        }
    }

    pub fn garbage_count(&self, size: usize) -> usize {
        self.class_for_size(size).map(|m| self.garbages[m].len()).unwrap_or(0)
    }
}

impl Default for ChunkAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_alloc_rounds_up_to_class_size() {
        let mut a = ChunkAllocator::new();
        let alloc = a.alloc(10).unwrap();
        assert_eq!(alloc.alloc_size, class_size(0));
        assert_eq!(alloc.offset, 0);
    }

    #[test]
    fn sequential_allocs_bump_frontier() {
        let mut a = ChunkAllocator::new();
        let first = a.alloc(100).unwrap();
        let second = a.alloc(100).unwrap();
        assert_eq!(second.offset, first.offset + first.alloc_size as u64);
    }

    #[test]
    fn freed_chunk_is_reused_once_threshold_exceeded() {
        let mut a = ChunkAllocator::new();
        let first = a.alloc(100).unwrap();
        a.free(first.offset, 100);
        a.free(first.offset, 100);
        // N_GARBAGES_TH == 1, so a third entry triggers reuse on next alloc.
        a.free(first.offset, 100);
        let reused = a.alloc(100).unwrap();
        assert_eq!(reused.offset, first.offset);
    }

    #[test]
    fn oversized_alloc_uses_segment_multiples() {
        let mut a = ChunkAllocator::new();
        let alloc = a.alloc(S_CHUNK * 2 + 1).unwrap();
        assert_eq!(alloc.alloc_size, S_CHUNK * 3);
    }

    #[test]
    fn different_classes_have_independent_frontiers() {
        let mut a = ChunkAllocator::new();
        let small = a.alloc(10).unwrap();
        let big = a.alloc(class_size(3)).unwrap();
        assert_eq!(small.offset, 0);
        assert_eq!(big.offset, 0);
    }
}

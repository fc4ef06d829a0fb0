//! The index header: flags, logical→physical segment maps, and the
//! background queue used to detect buffer-segment reuse by readers.
//!
//! The logical/physical maps are kept as sparse hash maps rather than the
//! dense `MAX_LSEG`-length arrays a memory-mapped header would use: this
//! crate's default store reads/writes whole segments through `Seek`, not
//! a fixed C struct, so a sparse map is the natural fit and carries the
//! same indirection semantics (see DESIGN.md).

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::constants::{BGQSIZE, MAX_PSEG, NOT_ASSIGNED};
use crate::error::{IiError, IiResult};
use crate::model::posting::IndexFlags;

#[derive(Debug)]
pub struct IndexHeader {
    pub flags: IndexFlags,
    pub ainfo: FxHashMap<u32, u32>,
    pub binfo: FxHashMap<u32, u32>,
    pub amax: u32,
    pub bmax: u32,
    pub smax: u32,
    pub pnext: u32,
    pub bgq: VecDeque<u32>,
    pub total_chunk_size: u64,
}

impl IndexHeader {
    pub fn new(flags: IndexFlags) -> Self {
        IndexHeader {
            flags,
            ainfo: FxHashMap::default(),
            binfo: FxHashMap::default(),
            amax: 0,
            bmax: 0,
            smax: 0,
            pnext: 0,
            bgq: VecDeque::with_capacity(BGQSIZE),
            total_chunk_size: 0,
        }
    }

    /// Allocates a fresh physical segment, preferring the background
    /// queue's oldest entry over bumping `pnext`.
    pub fn segment_get(&mut self) -> IiResult<u32> {
        if let Some(pseg) = self.bgq.pop_front() {
            return Ok(pseg);
        }
        if self.pnext >= MAX_PSEG {
            return Err(IiError::NoMemoryAvailable(
                "physical segment space exhausted".into(),
            ));
        }
        let pseg = self.pnext;
        self.pnext += 1;
        Ok(pseg)
    }

    /// Installs a fresh physical segment behind a new logical buffer
    /// segment, returning `(lseg, pseg)`.
    pub fn buffer_segment_new(&mut self) -> IiResult<(u32, u32)> {
        let pseg = self.segment_get()?;
        let lseg = self.bmax;
        self.bmax += 1;
        self.binfo.insert(lseg, pseg);
        Ok((lseg, pseg))
    }

    /// Swaps the physical segment behind `lseg`, pushing the old one into
    /// the background queue so in-flight readers can detect the reuse.
    pub fn buffer_segment_update(&mut self, lseg: u32, pseg: u32) -> IiResult<u32> {
        let old = self
            .binfo
            .insert(lseg, pseg)
            .ok_or_else(|| IiError::InvalidArgument(format!("unknown buffer lseg {lseg}")))?;
        if self.bgq.len() == BGQSIZE {
            self.bgq.pop_front();
        }
        self.bgq.push_back(old);
        Ok(old)
    }

    /// Whether `pseg` is still visible as a live reference to a cursor
    /// that captured it before a subsequent background-queue rotation.
    pub fn is_in_background_queue(&self, pseg: u32) -> bool {
        self.bgq.contains(&pseg)
    }

    /// Lazily allocates (or returns) the physical segment backing array
    /// bucket `lseg`.
    pub fn array_segment_for(&mut self, lseg: u32) -> IiResult<u32> {
        if let Some(&pseg) = self.ainfo.get(&lseg) {
            return Ok(pseg);
        }
        let pseg = self.segment_get()?;
        self.ainfo.insert(lseg, pseg);
        if lseg >= self.amax {
            self.amax = lseg + 1;
        }
        Ok(pseg)
    }

    pub fn buffer_segment_of(&self, lseg: u32) -> Option<u32> {
        self.binfo.get(&lseg).copied()
    }

    /// Retires a logical buffer entirely (its terms have all been moved
    /// elsewhere), pushing its physical segment into the background queue
    /// so open cursors can detect the reuse.
    pub fn retire_buffer_segment(&mut self, lseg: u32) -> IiResult<u32> {
        let pseg = self
            .binfo
            .remove(&lseg)
            .ok_or_else(|| IiError::InvalidArgument(format!("unknown buffer lseg {lseg}")))?;
        if self.bgq.len() == BGQSIZE {
            self.bgq.pop_front();
        }
        self.bgq.push_back(pseg);
        Ok(pseg)
    }

    /// Serializes the header to a fixed-field binary blob, written at the
    /// start of the segment file.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.flags.bits().to_le_bytes());
        out.extend_from_slice(&self.amax.to_le_bytes());
        out.extend_from_slice(&self.bmax.to_le_bytes());
        out.extend_from_slice(&self.smax.to_le_bytes());
        out.extend_from_slice(&self.pnext.to_le_bytes());
        out.extend_from_slice(&(self.bgq.len() as u32).to_le_bytes());
        for &v in &self.bgq {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&(self.ainfo.len() as u32).to_le_bytes());
        for (&k, &v) in &self.ainfo {
            out.extend_from_slice(&k.to_le_bytes());
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&(self.binfo.len() as u32).to_le_bytes());
        for (&k, &v) in &self.binfo {
            out.extend_from_slice(&k.to_le_bytes());
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&self.total_chunk_size.to_le_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> IiResult<Self> {
        let mut c = Cursor::new(data);
        let flags = IndexFlags::from_bits_truncate(c.u32()?);
        let mut header = IndexHeader::new(flags);
        header.amax = c.u32()?;
        header.bmax = c.u32()?;
        header.smax = c.u32()?;
        header.pnext = c.u32()?;
        let bgq_len = c.u32()?;
        for _ in 0..bgq_len {
            header.bgq.push_back(c.u32()?);
        }
        let ainfo_len = c.u32()?;
        for _ in 0..ainfo_len {
            let k = c.u32()?;
            let v = c.u32()?;
            header.ainfo.insert(k, v);
        }
        let binfo_len = c.u32()?;
        for _ in 0..binfo_len {
            let k = c.u32()?;
            let v = c.u32()?;
            header.binfo.insert(k, v);
        }
        header.total_chunk_size = c.u64()?;
        Ok(header)
    }
}

impl Default for IndexHeader {
    fn default() -> Self {
        Self::new(IndexFlags::empty())
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    fn u32(&mut self) -> IiResult<u32> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| IiError::FileCorrupt("truncated index header".into()))?;
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn u64(&mut self) -> IiResult<u64> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 8)
            .ok_or_else(|| IiError::FileCorrupt("truncated index header".into()))?;
        self.pos += 8;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bytes_roundtrip() {
        let mut h = IndexHeader::new(IndexFlags::WITH_SECTION | IndexFlags::WITH_POSITION);
        let (lseg, _) = h.buffer_segment_new().unwrap();
        h.buffer_segment_update(lseg, 77).unwrap();
        h.array_segment_for(3).unwrap();
        h.total_chunk_size = 123456;

        let bytes = h.to_bytes();
        let restored = IndexHeader::from_bytes(&bytes).unwrap();
        assert_eq!(restored.flags, h.flags);
        assert_eq!(restored.amax, h.amax);
        assert_eq!(restored.bmax, h.bmax);
        assert_eq!(restored.pnext, h.pnext);
        assert_eq!(restored.bgq, h.bgq);
        assert_eq!(restored.ainfo, h.ainfo);
        assert_eq!(restored.binfo, h.binfo);
        assert_eq!(restored.total_chunk_size, h.total_chunk_size);
    }


    #[test]
    fn segment_get_bumps_pnext_when_queue_empty() {
        let mut h = IndexHeader::default();
        assert_eq!(h.segment_get().unwrap(), 0);
        assert_eq!(h.segment_get().unwrap(), 1);
    }

    #[test]
    fn segment_get_prefers_background_queue() {
        let mut h = IndexHeader::default();
        let (lseg, pseg0) = h.buffer_segment_new().unwrap();
        h.buffer_segment_update(lseg, 99).unwrap();
        // pseg0 was pushed to the background queue by the update above.
        let next = h.segment_get().unwrap();
        assert_eq!(next, pseg0);
    }

    #[test]
    fn buffer_segment_update_unknown_lseg_errors() {
        let mut h = IndexHeader::default();
        assert!(h.buffer_segment_update(123, 1).is_err());
    }

    #[test]
    fn background_queue_is_bounded() {
        let mut h = IndexHeader::default();
        let (lseg, _) = h.buffer_segment_new().unwrap();
        for i in 0..(BGQSIZE as u32 + 3) {
            h.buffer_segment_update(lseg, 1000 + i).unwrap();
        }
        assert_eq!(h.bgq.len(), BGQSIZE);
    }

    #[test]
    fn retire_buffer_segment_pushes_pseg_into_background_queue() {
        let mut h = IndexHeader::default();
        let (lseg, pseg) = h.buffer_segment_new().unwrap();
        let retired = h.retire_buffer_segment(lseg).unwrap();
        assert_eq!(retired, pseg);
        assert!(h.is_in_background_queue(pseg));
        assert!(h.buffer_segment_of(lseg).is_none());
    }

    #[test]
    fn array_segment_for_is_idempotent() {
        let mut h = IndexHeader::default();
        let a = h.array_segment_for(5).unwrap();
        let b = h.array_segment_for(5).unwrap();
        assert_eq!(a, b);
    }
}

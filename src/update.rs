//! Update/delete routing: slot-inline, buffer-append, flush, and split
//! paths for one term.
//!
//! Buffer segments are kept resident in memory (`Index::buffers`) rather
//! than paged through `PagedStore`: `BufferSegment` is already a
//! self-contained byte arena, so the only thing the header's logical/
//! physical segment maps need to track for a buffer is its existence and
//! its background-queue lifecycle, not its bytes. A host that truly needs
//! to page buffer bytes out under memory pressure implements its own
//! `Index`-equivalent around the same `BufferSegment`/`IndexHeader` types.
//!
//! `Array::new(self.array_store.as_mut(), self.flags)` is constructed
//! inline at each call site rather than behind a `&mut self` helper
//! method: a helper would borrow all of `self` opaquely, which conflicts
//! with the sibling `&self.header` / `&mut self.header` borrow every one
//! of these call sites also needs. Direct field projections let the
//! borrow checker see the two borrows are disjoint.

use rustc_hash::FxHashMap;

use crate::array::Array;
use crate::buffer::merger;
use crate::buffer::segment::BufferSegment;
use crate::constants::MAX_TF;
use crate::error::IiResult;
use crate::index::{ChunkPartRef, ChunkRef, Index};
use crate::lexicon::Lexicon;
use crate::model::posting::{Posting, UpdateSpec};
use crate::model::slot::Slot;

/// Lexicon-neighborhood radius used when looking for a buffer with room.
const NEIGHBOR_SEARCH_RADIUS: usize = 4;
/// Leave this much headroom in a buffer before triggering a flush.
const FLUSH_MARGIN: usize = 256;

impl Index {
    /// Applies one insert/update, returning the number of positions
    /// discarded because the update exceeded `MAX_TF`.
    pub fn update_one(&mut self, lexicon: &mut dyn Lexicon, tid: u32, spec: UpdateSpec) -> IiResult<u32> {
        if spec.is_delete() {
            self.delete_one(tid, spec.rid, if spec.sid == 0 { None } else { Some(spec.sid) })?;
            return Ok(0);
        }
        let _guard = self.write_lock.lock().unwrap();

        let atf = spec.positions.len() as u32;
        let truncated = atf.min(MAX_TF);
        let discarded = atf - truncated;
        let mut positions = spec.positions.clone();
        positions.truncate(truncated as usize);
        let posting = Posting {
            rid: spec.rid,
            sid: spec.sid,
            tf: truncated.max(1),
            weight: spec.weight,
            positions,
        };

        let slot = Array::new(self.array_store.as_mut(), self.flags).get(&self.header, tid)?;
        match slot {
            Slot::Empty => {
                if posting.tf == 1 && posting.weight == 0 && Slot::fits_inline(posting.rid, posting.sid, self.flags) {
                    let inline = Slot::Inline {
                        rid: posting.rid,
                        sid: posting.sid,
                        pos: posting.positions.first().copied().unwrap_or(0),
                    };
                    Array::new(self.array_store.as_mut(), self.flags).set(&mut self.header, tid, inline)?;
                } else {
                    let lseg = self.home_buffer_for(lexicon, tid)?;
                    if let Some(lseg) = self.insert_into_buffer(lseg, tid, posting)? {
                        self.set_buffered_slot(tid, lseg)?;
                    }
                }
            }
            Slot::Inline { rid, sid, pos } => {
                let same_key = rid == posting.rid && sid == posting.sid;
                let replaces_in_place =
                    same_key && posting.tf == 1 && posting.weight == 0 && Slot::fits_inline(posting.rid, posting.sid, self.flags);
                if replaces_in_place {
                    let inline = Slot::Inline {
                        rid: posting.rid,
                        sid: posting.sid,
                        pos: posting.positions.first().copied().unwrap_or(0),
                    };
                    Array::new(self.array_store.as_mut(), self.flags).set(&mut self.header, tid, inline)?;
                } else {
                    if !same_key {
                        let old = Posting {
                            rid,
                            sid,
                            tf: 1,
                            weight: 0,
                            positions: vec![pos],
                        };
                        let lseg = self.home_buffer_for(lexicon, tid)?;
                        if let Some(lseg) = self.insert_into_buffer(lseg, tid, old)? {
                            self.set_buffered_slot(tid, lseg)?;
                        }
                    }
                    let lseg = self.home_buffer_for(lexicon, tid)?;
                    if let Some(lseg) = self.insert_into_buffer(lseg, tid, posting)? {
                        self.set_buffered_slot(tid, lseg)?;
                    }
                }
            }
            Slot::Buffered { lseg, .. } => {
                if let Some(lseg) = self.insert_into_buffer(lseg as u32, tid, posting)? {
                    self.set_buffered_slot(tid, lseg)?;
                }
            }
        }
        Ok(discarded)
    }

    /// Deletes a posting (or every section of `rid` when `sid` is `None`).
    pub fn delete_one(&mut self, tid: u32, rid: u32, sid: Option<u32>) -> IiResult<bool> {
        let _guard = self.write_lock.lock().unwrap();
        let slot = Array::new(self.array_store.as_mut(), self.flags).get(&self.header, tid)?;
        match slot {
            Slot::Empty => Ok(false),
            Slot::Inline { rid: r, sid: s, .. } => {
                if r == rid && sid.map(|s2| s2 == s).unwrap_or(true) {
                    Array::new(self.array_store.as_mut(), self.flags).set(&mut self.header, tid, Slot::Empty)?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Slot::Buffered { lseg, .. } => {
                let lseg = lseg as u32;
                let old = self.old_postings_for(tid)?;
                let sids: Vec<u32> = match sid {
                    Some(s) => vec![s],
                    None => {
                        let mut all: Vec<u32> = old.iter().filter(|p| p.rid == rid).map(|p| p.sid).collect();
                        if let Some(buf) = self.buffers.get(&lseg) {
                            all.extend(buf.postings_for(tid)?.into_iter().filter(|p| p.rid == rid).map(|p| p.sid));
                        }
                        all.sort_unstable();
                        all.dedup();
                        all
                    }
                };
                if sids.is_empty() {
                    return Ok(false);
                }
                for s in &sids {
                    let target = self.current_buffer_lseg(tid, lseg)?;
                    let tombstone = Posting {
                        rid,
                        sid: *s,
                        tf: 0,
                        weight: 0,
                        positions: Vec::new(),
                    };
                    if let Some(target) = self.insert_into_buffer(target, tid, tombstone)? {
                        self.set_buffered_slot(tid, target)?;
                    }
                }
                if let Slot::Buffered { lseg: final_lseg, .. } =
                    Array::new(self.array_store.as_mut(), self.flags).get(&self.header, tid)?
                {
                    self.flush_buffer_term(final_lseg as u32, tid)?;
                }
                Ok(true)
            }
        }
    }

    fn current_buffer_lseg(&mut self, tid: u32, fallback: u32) -> IiResult<u32> {
        match Array::new(self.array_store.as_mut(), self.flags).get(&self.header, tid)? {
            Slot::Buffered { lseg, .. } => Ok(lseg as u32),
            _ => Ok(fallback),
        }
    }

    fn set_buffered_slot(&mut self, tid: u32, lseg: u32) -> IiResult<()> {
        let count = self
            .buffers
            .get(&lseg)
            .map(|b| b.postings_for(tid).map(|v| v.len() as u32))
            .transpose()?
            .unwrap_or(0);
        Array::new(self.array_store.as_mut(), self.flags).set(
            &mut self.header,
            tid,
            Slot::Buffered {
                lseg: lseg as u16,
                offset: 0,
                count,
            },
        )
    }

    /// Writes `posting` into `lseg`'s chain, flushing first if short on
    /// room and splitting afterward if the buffer now holds too many
    /// terms. Returns the term's authoritative buffer id for the caller to
    /// record in its slot, or `None` when a split already finalized the
    /// term's slot itself (chunked, collapsed to inline, or emptied).
    fn insert_into_buffer(&mut self, lseg: u32, tid: u32, posting: Posting) -> IiResult<Option<u32>> {
        self.ensure_buffer(lseg);
        let needs_room = self
            .buffers
            .get(&lseg)
            .map(|b| b.space_left() < FLUSH_MARGIN)
            .unwrap_or(false);
        if needs_room {
            self.flush_whole_buffer(lseg)?;
        }
        self.buffers.get_mut(&lseg).expect("buffer ensured above").put(tid, posting)?;
        let over_terms = self
            .buffers
            .get(&lseg)
            .map(|b| b.is_over_split_threshold())
            .unwrap_or(false);
        if over_terms {
            self.split_buffer(lseg)?;
            return Ok(None);
        }
        Ok(Some(lseg))
    }

    fn ensure_buffer(&mut self, lseg: u32) {
        self.buffers
            .entry(lseg)
            .or_insert_with(|| BufferSegment::new(self.options.segment_size, self.flags, self.options.split_buffer_nterms));
    }

    /// Finds a buffer in `tid`'s lexicon neighborhood with free space, or
    /// allocates a fresh one.
    fn home_buffer_for(&mut self, lexicon: &mut dyn Lexicon, tid: u32) -> IiResult<u32> {
        if let Slot::Buffered { lseg, .. } = Array::new(self.array_store.as_mut(), self.flags).get(&self.header, tid)? {
            return Ok(lseg as u32);
        }
        for neighbor in lexicon.neighbors(tid, NEIGHBOR_SEARCH_RADIUS) {
            let neighbor_slot = Array::new(self.array_store.as_mut(), self.flags).get(&self.header, neighbor)?;
            if let Slot::Buffered { lseg, .. } = neighbor_slot {
                let lseg = lseg as u32;
                self.ensure_buffer(lseg);
                if self.buffers[&lseg].space_left() > FLUSH_MARGIN {
                    return Ok(lseg);
                }
            }
        }
        let (lseg, _pseg) = self.header.buffer_segment_new()?;
        self.ensure_buffer(lseg);
        Ok(lseg)
    }

    /// Decodes the previously-merged chunk (across sub-chunks, in order)
    /// for `tid`, or an empty list if none exists yet.
    pub(crate) fn old_postings_for(&mut self, tid: u32) -> IiResult<Vec<Posting>> {
        let Some(chunk_ref) = self.chunk_dir.get(&tid).cloned() else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for part in &chunk_ref.parts {
            let bytes = self.chunk_store.read_chunk(part.offset, part.alloc_size)?;
            let (postings, _) = merger::decode_postings(self.flags, &bytes)?;
            out.extend(postings);
        }
        Ok(out)
    }

    fn free_old_chunk(&mut self, tid: u32) {
        if let Some(chunk_ref) = self.chunk_dir.remove(&tid) {
            for part in chunk_ref.parts {
                self.chunk_alloc.free(part.offset, part.alloc_size);
            }
        }
    }

    /// Merges `tid`'s live buffer records with its previous chunk,
    /// rewriting the chunk directory and, when the result collapses to
    /// nothing or a single inline-fitting posting, the term's slot.
    fn flush_buffer_term(&mut self, lseg: u32, tid: u32) -> IiResult<()> {
        let old = self.old_postings_for(tid)?;
        let buf_postings = match self.buffers.get(&lseg) {
            Some(b) => b.postings_for(tid)?,
            None => Vec::new(),
        };
        let merged = merger::merge_postings(&old, &buf_postings);
        if let Some(b) = self.buffers.get_mut(&lseg) {
            b.remove_term(tid);
        }
        self.free_old_chunk(tid);
        self.install_merged_term(tid, lseg, merged)
    }

    /// Writes `merged` as `tid`'s final on-disk form: empty, a direct
    /// inline singleton, or one or more chunks referenced from a slot
    /// nominally homed at buffer `lseg` (also used by the bulk builder,
    /// which never stages records in a live buffer but still needs a
    /// `lseg` to group terms the way `buffer_segment_update` does).
    pub(crate) fn install_merged_term(&mut self, tid: u32, lseg: u32, merged: Vec<Posting>) -> IiResult<()> {
        if merged.is_empty() {
            return Array::new(self.array_store.as_mut(), self.flags).set(&mut self.header, tid, Slot::Empty);
        }
        if merged.len() == 1
            && merged[0].tf == 1
            && merged[0].weight == 0
            && Slot::fits_inline(merged[0].rid, merged[0].sid, self.flags)
        {
            let p = &merged[0];
            let inline = Slot::Inline {
                rid: p.rid,
                sid: p.sid,
                pos: p.positions.first().copied().unwrap_or(0),
            };
            return Array::new(self.array_store.as_mut(), self.flags).set(&mut self.header, tid, inline);
        }

        let encoded = merger::build_chunk(self.flags, &merged, self.options.chunk_split_threshold);
        let mut parts = Vec::with_capacity(encoded.parts.len());
        for part in &encoded.parts {
            let alloc = self.chunk_alloc.alloc(part.bytes.len().max(1))?;
            self.chunk_store.write_chunk(alloc.offset, &part.bytes)?;
            parts.push(ChunkPartRef {
                first_rid: part.first_rid,
                offset: alloc.offset,
                alloc_size: alloc.alloc_size,
            });
        }
        self.chunk_dir.insert(tid, ChunkRef { parts });
        let count = merged.len() as u32;
        Array::new(self.array_store.as_mut(), self.flags).set(
            &mut self.header,
            tid,
            Slot::Buffered {
                lseg: lseg as u16,
                offset: 0,
                count,
            },
        )
    }

    /// Flushes every resident term of `lseg` into the chunk directory.
    fn flush_whole_buffer(&mut self, lseg: u32) -> IiResult<()> {
        let term_ids = self.buffers.get(&lseg).map(|b| b.term_ids()).unwrap_or_default();
        for tid in term_ids {
            self.flush_buffer_term(lseg, tid)?;
        }
        Ok(())
    }

    /// Splits an over-full buffer into two fresh buffers, assigning terms
    /// by ascending term id (a stand-in for true lexicon-key order, since
    /// `Lexicon` doesn't expose a total order beyond `neighbors`/
    /// `prefix_search` — see DESIGN.md), then flushes each term through
    /// its new home.
    fn split_buffer(&mut self, lseg: u32) -> IiResult<()> {
        let mut term_ids: Vec<u32> = self.buffers.get(&lseg).map(|b| b.term_ids()).unwrap_or_default();
        term_ids.sort_unstable();
        if term_ids.len() < 2 {
            return Ok(());
        }
        let (lseg0, _) = self.header.buffer_segment_new()?;
        let (lseg1, _) = self.header.buffer_segment_new()?;
        self.ensure_buffer(lseg0);
        self.ensure_buffer(lseg1);

        let half = term_ids.len() / 2;
        let mut reassigned: FxHashMap<u32, u32> = FxHashMap::default();
        for (i, tid) in term_ids.iter().enumerate() {
            reassigned.insert(*tid, if i < half { lseg0 } else { lseg1 });
        }

        for tid in &term_ids {
            let target = reassigned[tid];
            let postings = self
                .buffers
                .get(&lseg)
                .map(|b| b.postings_for(*tid))
                .transpose()?
                .unwrap_or_default();
            for p in postings {
                self.buffers.get_mut(&target).unwrap().put(*tid, p)?;
            }
            self.flush_buffer_term(target, *tid)?;
        }

        self.buffers.remove(&lseg);
        self.header.retire_buffer_segment(lseg)?;
        Ok(())
    }
}

//! Per-buffer-segment staging area: a byte arena holding, for each
//! resident term, a sorted singly-linked chain of records keyed by
//! `(rid, sid)`, with periodic skip (`jump`) pointers.
//!
//! Tombstoned records are unlinked from the chain immediately (the chain
//! only ever contains live records); their bytes stay in the arena as
//! reclaimable waste until the term is next merged/flushed. This is a
//! deliberate simplification over keeping dead nodes inline and skipping
//! them on read (see DESIGN.md) — it keeps the chain invariant
//! ("strictly ascending, no tombstones") unconditionally true between
//! mutations, which is what every downstream reader depends on.

use rustc_hash::FxHashMap;

use crate::codec::varbyte;
use crate::error::{IiError, IiResult};
use crate::model::posting::{IndexFlags, Posting};
use crate::model::slot::Slot;

const NIL: u32 = u32::MAX;
/// Installs a fresh skip pointer every this-many live appends.
const JUMP_PERIOD: usize = 8;
/// Generous bound on chain-walk hops before a cycle is declared.
const MAX_JUMP_BUDGET: usize = 100;

#[derive(Debug, Clone, Copy)]
struct RecordHeader {
    step: u32,
    jump: u32,
    tombstoned: bool,
}

const RECORD_HEADER_LEN: usize = 9;

fn read_header(arena: &[u8], offset: u32) -> IiResult<RecordHeader> {
    let o = offset as usize;
    let bytes = arena
        .get(o..o + RECORD_HEADER_LEN)
        .ok_or_else(|| IiError::FileCorrupt("record header out of arena bounds".into()))?;
    Ok(RecordHeader {
        step: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
        jump: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        tombstoned: bytes[8] != 0,
    })
}

fn write_header_field_step(arena: &mut [u8], offset: u32, step: u32) {
    let o = offset as usize;
    arena[o..o + 4].copy_from_slice(&step.to_le_bytes());
}

fn write_header_field_jump(arena: &mut [u8], offset: u32, jump: u32) {
    let o = offset as usize + 4;
    arena[o..o + 4].copy_from_slice(&jump.to_le_bytes());
}

fn mark_tombstoned(arena: &mut [u8], offset: u32) {
    arena[offset as usize + 8] = 1;
}

fn encode_payload(flags: IndexFlags, p: &Posting) -> Vec<u8> {
    let mut out = Vec::new();
    varbyte::encode(p.rid, &mut out);
    if flags.contains(IndexFlags::WITH_SECTION) {
        varbyte::encode(p.sid, &mut out);
    }
    varbyte::encode(p.tf, &mut out);
    if flags.contains(IndexFlags::WITH_WEIGHT) {
        varbyte::encode(p.weight, &mut out);
    }
    if flags.contains(IndexFlags::WITH_POSITION) {
        let mut last = 0u32;
        for &pos in &p.positions {
            varbyte::encode(pos - last, &mut out);
            last = pos;
        }
    }
    out
}

fn decode_payload(flags: IndexFlags, data: &[u8]) -> IiResult<(Posting, usize)> {
    let mut pos = 0usize;
    let (rid, used) = varbyte::decode(&data[pos..])?;
    pos += used;
    let sid = if flags.contains(IndexFlags::WITH_SECTION) {
        let (sid, used) = varbyte::decode(&data[pos..])?;
        pos += used;
        sid
    } else {
        0
    };
    let (tf, used) = varbyte::decode(&data[pos..])?;
    pos += used;
    let weight = if flags.contains(IndexFlags::WITH_WEIGHT) {
        let (w, used) = varbyte::decode(&data[pos..])?;
        pos += used;
        w
    } else {
        0
    };
    let mut positions = Vec::new();
    if flags.contains(IndexFlags::WITH_POSITION) {
        let mut last = 0u32;
        for _ in 0..tf {
            let (gap, used) = varbyte::decode(&data[pos..])?;
            pos += used;
            last += gap;
            positions.push(last);
        }
    }
    Ok((
        Posting {
            rid,
            sid,
            tf,
            weight,
            positions,
        },
        pos,
    ))
}

#[derive(Debug, Clone)]
struct TermDir {
    head: u32, // NIL if empty
    len: usize,
}

impl Default for TermDir {
    fn default() -> Self {
        TermDir { head: NIL, len: 0 }
    }
}

/// A fixed-capacity staging buffer for a set of terms' pending postings.
pub struct BufferSegment {
    max_size: usize,
    arena: Vec<u8>,
    terms: FxHashMap<u32, TermDir>,
    flags: IndexFlags,
    split_threshold: usize,
}

impl BufferSegment {
    pub fn new(max_size: usize, flags: IndexFlags, split_threshold: usize) -> Self {
        BufferSegment {
            max_size,
            arena: Vec::new(),
            terms: FxHashMap::default(),
            flags,
            split_threshold,
        }
    }

    pub fn space_left(&self) -> usize {
        self.max_size.saturating_sub(self.arena.len())
    }

    pub fn nterms(&self) -> usize {
        self.terms.len()
    }

    pub fn is_over_split_threshold(&self) -> bool {
        self.terms.len() > self.split_threshold
    }

    fn key_at(&self, offset: u32) -> IiResult<(u32, u32)> {
        let hdr_len = RECORD_HEADER_LEN;
        let payload = &self.arena[offset as usize + hdr_len..];
        let (p, _) = decode_payload(self.flags, payload)?;
        Ok((p.rid, p.sid))
    }

    fn posting_at(&self, offset: u32) -> IiResult<Posting> {
        let payload = &self.arena[offset as usize + RECORD_HEADER_LEN..];
        let (p, _) = decode_payload(self.flags, payload)?;
        Ok(p)
    }

    /// Inserts or replaces a posting, tombstoning+unlinking any record at
    /// the same `(rid, sid)`. Estimates the space the record will take
    /// before mutating the arena; callers should check [`space_left`]
    /// first.
    pub fn put(&mut self, tid: u32, posting: Posting) -> IiResult<()> {
        let payload = encode_payload(self.flags, &posting);
        let dir = self.terms.entry(tid).or_default();

        let mut prev: Option<u32> = None;
        let mut cur = dir.head;
        let mut budget = MAX_JUMP_BUDGET + dir.len + 4;
        let mut insert_after = None;
        let mut insert_before = NIL;
        let mut replaced = false;

        loop {
            if cur == NIL {
                insert_after = prev;
                insert_before = NIL;
                break;
            }
            budget = budget
                .checked_sub(1)
                .ok_or_else(|| IiError::FileCorrupt("buffer chain cycle detected".into()))?;

            let hdr = read_header(&self.arena, cur)?;
            let key = self.key_at(cur)?;

            if !hdr.tombstoned && hdr.jump != NIL {
                if let Ok(jhdr) = read_header(&self.arena, hdr.jump) {
                    if !jhdr.tombstoned {
                        if let Ok(jkey) = self.key_at(hdr.jump) {
                            if jkey < (posting.rid, posting.sid) {
                                cur = hdr.jump;
                                continue;
                            }
                        }
                    }
                }
            }

            match key.cmp(&(posting.rid, posting.sid)) {
                std::cmp::Ordering::Less => {
                    prev = Some(cur);
                    cur = hdr.step;
                }
                std::cmp::Ordering::Equal => {
                    mark_tombstoned(&mut self.arena, cur);
                    insert_after = prev;
                    insert_before = hdr.step;
                    replaced = true;
                    break;
                }
                std::cmp::Ordering::Greater => {
                    insert_after = prev;
                    insert_before = cur;
                    break;
                }
            }
        }

        let new_offset = self.arena.len() as u32;
        self.arena.extend_from_slice(&insert_before.to_le_bytes());
        self.arena.extend_from_slice(&NIL.to_le_bytes());
        self.arena.push(0);
        self.arena.extend_from_slice(&payload);

        match insert_after {
            Some(p) => write_header_field_step(&mut self.arena, p, new_offset),
            None => dir.head = new_offset,
        }
        if !replaced {
            dir.len += 1;
        }

        if insert_before == NIL && dir.len % JUMP_PERIOD == 0 && dir.len > JUMP_PERIOD {
            if let Some(origin) = self.nth_live_offset(tid, dir.len.saturating_sub(JUMP_PERIOD + 1)) {
                write_header_field_jump(&mut self.arena, origin, new_offset);
            }
        }
        Ok(())
    }

    /// Tombstones and unlinks every live record for `tid` matching `rid`
    /// (and `sid` when given).
    pub fn delete(&mut self, tid: u32, rid: u32, sid: Option<u32>) -> IiResult<bool> {
        let Some(dir) = self.terms.get_mut(&tid) else {
            return Ok(false);
        };
        let mut prev: Option<u32> = None;
        let mut cur = dir.head;
        let mut removed = false;
        let mut budget = MAX_JUMP_BUDGET + dir.len + 4;
        loop {
            if cur == NIL {
                break;
            }
            budget = budget
                .checked_sub(1)
                .ok_or_else(|| IiError::FileCorrupt("buffer chain cycle detected".into()))?;
            let hdr = read_header(&self.arena, cur)?;
            let (krid, ksid) = self.key_at(cur)?;
            if krid > rid || (krid == rid && sid.is_some_and(|s| ksid > s)) {
                break;
            }
            let matches = krid == rid && sid.map(|s| s == ksid).unwrap_or(true);
            if matches {
                mark_tombstoned(&mut self.arena, cur);
                let next = hdr.step;
                match prev {
                    Some(p) => write_header_field_step(&mut self.arena, p, next),
                    None => dir.head = next,
                }
                dir.len -= 1;
                removed = true;
                cur = next;
            } else {
                prev = Some(cur);
                cur = hdr.step;
            }
        }
        Ok(removed)
    }

    fn nth_live_offset(&self, tid: u32, n: usize) -> Option<u32> {
        let dir = self.terms.get(&tid)?;
        let mut cur = dir.head;
        let mut i = 0usize;
        while cur != NIL {
            if i == n {
                return Some(cur);
            }
            let hdr = read_header(&self.arena, cur).ok()?;
            cur = hdr.step;
            i += 1;
        }
        None
    }

    /// Returns every live posting for `tid` in ascending `(rid, sid)` order.
    pub fn postings_for(&self, tid: u32) -> IiResult<Vec<Posting>> {
        let Some(dir) = self.terms.get(&tid) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(dir.len);
        let mut cur = dir.head;
        let mut budget = MAX_JUMP_BUDGET + dir.len + 4;
        while cur != NIL {
            budget = budget
                .checked_sub(1)
                .ok_or_else(|| IiError::FileCorrupt("buffer chain cycle detected".into()))?;
            out.push(self.posting_at(cur)?);
            cur = read_header(&self.arena, cur)?.step;
        }
        Ok(out)
    }

    /// Verifies the strictly-ascending chain and jump-target invariants
    /// for `tid`. Used by tests and by the merger's paranoid mode.
    pub fn validate_chain(&self, tid: u32) -> IiResult<()> {
        let Some(dir) = self.terms.get(&tid) else {
            return Ok(());
        };
        let mut cur = dir.head;
        let mut last_key: Option<(u32, u32)> = None;
        let mut budget = MAX_JUMP_BUDGET + dir.len + 4;
        while cur != NIL {
            budget = budget
                .checked_sub(1)
                .ok_or_else(|| IiError::FileCorrupt("buffer chain cycle detected".into()))?;
            let hdr = read_header(&self.arena, cur)?;
            if hdr.tombstoned {
                return Err(IiError::FileCorrupt("tombstoned record reachable from chain".into()));
            }
            let key = self.key_at(cur)?;
            if let Some(lk) = last_key {
                if key <= lk {
                    return Err(IiError::FileCorrupt("buffer chain is not strictly ascending".into()));
                }
            }
            if hdr.jump != NIL {
                if let Ok(jhdr) = read_header(&self.arena, hdr.jump) {
                    if !jhdr.tombstoned {
                        let jkey = self.key_at(hdr.jump)?;
                        if jkey <= key {
                            return Err(IiError::FileCorrupt("jump target is not strictly greater than origin".into()));
                        }
                    }
                }
            }
            last_key = Some(key);
            cur = hdr.step;
        }
        Ok(())
    }

    pub fn remove_term(&mut self, tid: u32) {
        self.terms.remove(&tid);
    }

    pub fn term_ids(&self) -> Vec<u32> {
        self.terms.keys().copied().collect()
    }

    /// Collapses a term with exactly one live posting of `tf == 1,
    /// weight == 0` back into the inline slot form, freeing the buffer
    /// entry. Returns `None` if the term doesn't qualify.
    pub fn try_collapse_to_inline(&mut self, tid: u32) -> IiResult<Option<Slot>> {
        let postings = self.postings_for(tid)?;
        if postings.len() == 1 && postings[0].tf == 1 && postings[0].weight == 0 {
            let p = &postings[0];
            if Slot::fits_inline(p.rid, p.sid, self.flags) {
                let pos = p.positions.first().copied().unwrap_or(0);
                self.remove_term(tid);
                return Ok(Some(Slot::Inline {
                    rid: p.rid,
                    sid: p.sid,
                    pos,
                }));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SPLIT_BUFFER_NTERMS;

    fn flags() -> IndexFlags {
        IndexFlags::WITH_SECTION | IndexFlags::WITH_POSITION
    }

    #[test]
    fn single_insert_then_read_back() {
        let mut b = BufferSegment::new(1 << 16, flags(), SPLIT_BUFFER_NTERMS);
        b.put(1, Posting::new(10, 1, vec![3])).unwrap();
        let got = b.postings_for(1).unwrap();
        assert_eq!(got, vec![Posting::new(10, 1, vec![3])]);
        b.validate_chain(1).unwrap();
    }

    #[test]
    fn inserts_stay_sorted_by_rid_then_sid() {
        let mut b = BufferSegment::new(1 << 16, flags(), SPLIT_BUFFER_NTERMS);
        for (rid, sid) in [(5, 1), (1, 2), (5, 0), (3, 1)] {
            b.put(1, Posting::new(rid, sid, vec![1])).unwrap();
        }
        let got = b.postings_for(1).unwrap();
        let keys: Vec<(u32, u32)> = got.iter().map(|p| (p.rid, p.sid)).collect();
        assert_eq!(keys, vec![(1, 2), (3, 1), (5, 0), (5, 1)]);
        b.validate_chain(1).unwrap();
    }

    #[test]
    fn duplicate_key_replaces_not_accumulates() {
        let mut b = BufferSegment::new(1 << 16, flags(), SPLIT_BUFFER_NTERMS);
        b.put(1, Posting::new(10, 1, vec![3])).unwrap();
        b.put(1, Posting::new(10, 1, vec![5])).unwrap();
        let got = b.postings_for(1).unwrap();
        assert_eq!(got, vec![Posting::new(10, 1, vec![5])]);
    }

    #[test]
    fn delete_specific_section_leaves_others() {
        let mut b = BufferSegment::new(1 << 16, flags(), SPLIT_BUFFER_NTERMS);
        b.put(1, Posting::new(10, 1, vec![1, 4])).unwrap();
        b.put(1, Posting::new(10, 2, vec![2])).unwrap();
        let removed = b.delete(1, 10, Some(2)).unwrap();
        assert!(removed);
        let got = b.postings_for(1).unwrap();
        assert_eq!(got, vec![Posting::new(10, 1, vec![1, 4])]);
    }

    #[test]
    fn delete_all_sections_for_rid() {
        let mut b = BufferSegment::new(1 << 16, flags(), SPLIT_BUFFER_NTERMS);
        b.put(1, Posting::new(10, 1, vec![1])).unwrap();
        b.put(1, Posting::new(10, 2, vec![2])).unwrap();
        b.put(1, Posting::new(11, 1, vec![3])).unwrap();
        b.delete(1, 10, None).unwrap();
        let got = b.postings_for(1).unwrap();
        assert_eq!(got, vec![Posting::new(11, 1, vec![3])]);
    }

    #[test]
    fn many_postings_keep_chain_sorted_and_space_accounted() {
        let mut b = BufferSegment::new(1 << 20, flags(), SPLIT_BUFFER_NTERMS);
        for rid in (0..500u32).rev() {
            b.put(1, Posting::new(rid * 7, 1, vec![1])).unwrap();
        }
        b.validate_chain(1).unwrap();
        let got = b.postings_for(1).unwrap();
        assert!(got.windows(2).all(|w| w[0].rid < w[1].rid));
        assert!(b.space_left() < 1 << 20);
    }

    #[test]
    fn collapse_to_inline_when_single_simple_posting() {
        let mut b = BufferSegment::new(1 << 16, flags(), SPLIT_BUFFER_NTERMS);
        b.put(1, Posting::new(10, 1, vec![3])).unwrap();
        let slot = b.try_collapse_to_inline(1).unwrap();
        assert_eq!(slot, Some(Slot::Inline { rid: 10, sid: 1, pos: 3 }));
        assert_eq!(b.postings_for(1).unwrap().len(), 0);
    }

    #[test]
    fn collapse_does_not_fire_with_multiple_postings() {
        let mut b = BufferSegment::new(1 << 16, flags(), SPLIT_BUFFER_NTERMS);
        b.put(1, Posting::new(10, 1, vec![3])).unwrap();
        b.put(1, Posting::new(11, 1, vec![4])).unwrap();
        assert_eq!(b.try_collapse_to_inline(1).unwrap(), None);
    }
}

//! Merges a term's buffered records with its previous chunk into a new
//! chunk body, splitting into sub-chunks when the merged list is large.

use crate::codec::{stream, varbyte};
use crate::constants::CHUNK_SPLIT_THRESHOLD;
use crate::model::posting::{IndexFlags, Posting};

/// Ascending merge of two already-sorted posting lists by `(rid, sid)`.
/// On a tie the buffer's value wins; a buffer tombstone (`tf == 0`) drops
/// the record from the output entirely.
pub fn merge_postings(chunk: &[Posting], buffer: &[Posting]) -> Vec<Posting> {
    let mut out = Vec::with_capacity(chunk.len() + buffer.len());
    let mut ci = 0usize;
    let mut bi = 0usize;
    while ci < chunk.len() && bi < buffer.len() {
        let ck = (chunk[ci].rid, chunk[ci].sid);
        let bk = (buffer[bi].rid, buffer[bi].sid);
        match ck.cmp(&bk) {
            std::cmp::Ordering::Less => {
                out.push(chunk[ci].clone());
                ci += 1;
            }
            std::cmp::Ordering::Greater => {
                if !buffer[bi].is_delete() {
                    out.push(buffer[bi].clone());
                }
                bi += 1;
            }
            std::cmp::Ordering::Equal => {
                if !buffer[bi].is_delete() {
                    out.push(buffer[bi].clone());
                }
                ci += 1;
                bi += 1;
            }
        }
    }
    out.extend_from_slice(&chunk[ci..]);
    for b in &buffer[bi..] {
        if !b.is_delete() {
            out.push(b.clone());
        }
    }
    out
}

/// Encodes one contiguous run of postings (a single unsplit chunk body,
/// or one sub-chunk's body) as independent gap streams.
pub fn encode_postings(flags: IndexFlags, postings: &[Posting]) -> Vec<u8> {
    let mut out = Vec::new();
    varbyte::encode(postings.len() as u32, &mut out);

    let mut last_rid = 0u32;
    let rid_gaps: Vec<u32> = postings
        .iter()
        .map(|p| {
            let g = p.rid - last_rid;
            last_rid = p.rid;
            g
        })
        .collect();
    stream::encode_stream(&rid_gaps, &mut out);

    if flags.contains(IndexFlags::WITH_SECTION) {
        let sids: Vec<u32> = postings.iter().map(|p| p.sid).collect();
        stream::encode_stream(&sids, &mut out);
    }

    let tfm1: Vec<u32> = postings.iter().map(|p| p.tf - 1).collect();
    stream::encode_stream(&tfm1, &mut out);

    if flags.contains(IndexFlags::WITH_WEIGHT) {
        let weights: Vec<u32> = postings.iter().map(|p| p.weight).collect();
        stream::encode_stream(&weights, &mut out);
    }

    if flags.contains(IndexFlags::WITH_POSITION) {
        let mut posgaps = Vec::new();
        for p in postings {
            let mut last = 0u32;
            for &pos in &p.positions {
                posgaps.push(pos - last);
                last = pos;
            }
        }
        stream::encode_stream(&posgaps, &mut out);
    }
    out
}

pub fn decode_postings(flags: IndexFlags, data: &[u8]) -> crate::error::IiResult<(Vec<Posting>, usize)> {
    let (n, mut pos) = varbyte::decode(data)?;
    let n = n as usize;

    let (rid_gaps, used) = stream::decode_stream(&data[pos..])?;
    pos += used;

    let sids = if flags.contains(IndexFlags::WITH_SECTION) {
        let (v, used) = stream::decode_stream(&data[pos..])?;
        pos += used;
        v
    } else {
        vec![0; n]
    };

    let (tfm1, used) = stream::decode_stream(&data[pos..])?;
    pos += used;

    let weights = if flags.contains(IndexFlags::WITH_WEIGHT) {
        let (v, used) = stream::decode_stream(&data[pos..])?;
        pos += used;
        v
    } else {
        vec![0; n]
    };

    let mut rid = 0u32;
    let rids: Vec<u32> = rid_gaps.iter().map(|g| { rid += g; rid }).collect();
    let tfs: Vec<u32> = tfm1.iter().map(|t| t + 1).collect();

    let positions: Vec<Vec<u32>> = if flags.contains(IndexFlags::WITH_POSITION) {
        let (posgaps, used) = stream::decode_stream(&data[pos..])?;
        pos += used;
        let mut iter = posgaps.into_iter();
        tfs.iter()
            .map(|&tf| {
                let mut last = 0u32;
                (0..tf)
                    .map(|_| {
                        last += iter.next().unwrap_or(0);
                        last
                    })
                    .collect()
            })
            .collect()
    } else {
        vec![Vec::new(); n]
    };

    let out = (0..n)
        .map(|i| Posting {
            rid: rids[i],
            sid: sids[i],
            tf: tfs[i],
            weight: weights[i],
            positions: positions[i].clone(),
        })
        .collect();
    Ok((out, pos))
}

/// One physical sub-chunk: its starting `rid` and encoded body.
#[derive(Debug, Clone)]
pub struct ChunkPart {
    pub first_rid: u32,
    pub bytes: Vec<u8>,
}

/// Result of merging and re-encoding a term's postings: either a single
/// body, or several sub-chunk bodies when the merged list exceeds
/// [`CHUNK_SPLIT_THRESHOLD`] (the `CHUNK_SPLIT` case).
pub struct EncodedChunk {
    pub parts: Vec<ChunkPart>,
}

impl EncodedChunk {
    pub fn is_split(&self) -> bool {
        self.parts.len() > 1
    }

    pub fn total_len(&self) -> usize {
        self.parts.iter().map(|p| p.bytes.len()).sum()
    }
}

/// Builds the chunk body for a merged posting list, splitting into
/// roughly-threshold-sized sub-chunks on `rid` boundaries when the whole
/// body would exceed `split_threshold`.
pub fn build_chunk(flags: IndexFlags, merged: &[Posting], split_threshold: usize) -> EncodedChunk {
    let whole = encode_postings(flags, merged);
    if whole.len() <= split_threshold || merged.len() < 2 {
        return EncodedChunk {
            parts: vec![ChunkPart {
                first_rid: merged.first().map(|p| p.rid).unwrap_or(0),
                bytes: whole,
            }],
        };
    }

    // Split into roughly-equal-count groups so each body stays near the
    // threshold; exact sizing is a re-encode-and-check loop, acceptable
    // since splits are rare (only very large posting lists trigger this).
    let target_parts = whole.len().div_ceil(split_threshold).max(2);
    let per_part = merged.len().div_ceil(target_parts);
    let mut parts = Vec::new();
    for group in merged.chunks(per_part.max(1)) {
        parts.push(ChunkPart {
            first_rid: group[0].rid,
            bytes: encode_postings(flags, group),
        });
    }
    EncodedChunk { parts }
}

pub fn default_split_threshold() -> usize {
    CHUNK_SPLIT_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> IndexFlags {
        IndexFlags::WITH_SECTION | IndexFlags::WITH_POSITION
    }

    #[test]
    fn merge_prefers_buffer_on_tie() {
        let chunk = vec![Posting::new(1, 1, vec![1])];
        let buffer = vec![Posting::new(1, 1, vec![9])];
        let merged = merge_postings(&chunk, &buffer);
        assert_eq!(merged, vec![Posting::new(1, 1, vec![9])]);
    }

    #[test]
    fn merge_drops_tombstoned_buffer_entries() {
        let chunk = vec![Posting::new(1, 1, vec![1])];
        let mut tomb = Posting::new(1, 1, vec![]);
        tomb.tf = 0;
        let merged = merge_postings(&chunk, &[tomb]);
        assert!(merged.is_empty());
    }

    #[test]
    fn merge_interleaves_disjoint_rids() {
        let chunk = vec![Posting::new(1, 1, vec![1]), Posting::new(5, 1, vec![2])];
        let buffer = vec![Posting::new(3, 1, vec![3])];
        let merged = merge_postings(&chunk, &buffer);
        let rids: Vec<u32> = merged.iter().map(|p| p.rid).collect();
        assert_eq!(rids, vec![1, 3, 5]);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let postings = vec![
            Posting::new(1, 1, vec![0, 4]),
            Posting::new(9, 2, vec![1]),
            Posting::new(100, 1, vec![5, 6, 20]),
        ];
        let bytes = encode_postings(flags(), &postings);
        let (got, used) = decode_postings(flags(), &bytes).unwrap();
        assert_eq!(got, postings);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn small_chunk_is_not_split() {
        let postings = vec![Posting::new(1, 1, vec![0])];
        let encoded = build_chunk(flags(), &postings, CHUNK_SPLIT_THRESHOLD);
        assert!(!encoded.is_split());
    }

    #[test]
    fn oversized_chunk_is_split_on_rid_boundaries() {
        let postings: Vec<Posting> = (0..5000u32)
            .map(|i| Posting::new(i * 2, 1, vec![0, 1, 2]))
            .collect();
        let encoded = build_chunk(flags(), &postings, 2048);
        assert!(encoded.is_split());
        let mut reassembled = Vec::new();
        for part in &encoded.parts {
            let (got, _) = decode_postings(flags(), &part.bytes).unwrap();
            reassembled.extend(got);
        }
        assert_eq!(reassembled, postings);
    }
}

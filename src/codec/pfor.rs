//! PForDelta-like bit-packed block codec over units of [`UNIT_SIZE`] values.
//!
//! Each unit picks the smallest bit width covering at least 7/8 of its
//! values, bit-packs everything MSB-first at that width, and records the
//! outliers ("exceptions") separately. Two placement strategies are used
//! depending on whether the chosen width already leaves enough headroom
//! in a slot to hold an exception chain index (`large_w`) or not
//! (`small_w`, which needs an explicit index byte per exception).
//!
//! The bit (un)packer is one generic width-parameterized loop rather than
//! 32 unrolled routines — a throughput difference, not an observable one.

use crate::codec::varbyte;
use crate::constants::UNIT_SIZE;
use crate::error::{IiError, IiResult};

fn bits_needed(v: u32) -> u32 {
    32 - v.leading_zeros()
}

fn pack_bits(values: &[u32], w: u32, out: &mut Vec<u8>) {
    if w == 0 {
        return;
    }
    let mut acc: u64 = 0;
    let mut nbits: u32 = 0;
    for &v in values {
        acc = (acc << w) | (v as u64 & ((1u64 << w) - 1));
        nbits += w;
        while nbits >= 8 {
            nbits -= 8;
            out.push(((acc >> nbits) & 0xff) as u8);
        }
    }
    if nbits > 0 {
        out.push(((acc << (8 - nbits)) & 0xff) as u8);
    }
}

fn unpack_bits(data: &[u8], n: usize, w: u32) -> Vec<u32> {
    if w == 0 {
        return vec![0; n];
    }
    let mut out = Vec::with_capacity(n);
    let mut acc: u64 = 0;
    let mut nbits: u32 = 0;
    let mut di = 0usize;
    let mask = (1u64 << w) - 1;
    for _ in 0..n {
        while nbits < w {
            acc = (acc << 8) | data[di] as u64;
            di += 1;
            nbits += 8;
        }
        nbits -= w;
        out.push(((acc >> nbits) & mask) as u32);
    }
    out
}

fn choose_width(values: &[u32]) -> u32 {
    let n = values.len();
    let threshold = (7 * n + 7) / 8;
    let mut freq = [0usize; 33];
    for &v in values {
        freq[bits_needed(v) as usize] += 1;
    }
    let mut cum = 0usize;
    for w in 0..=32u32 {
        cum += freq[w as usize];
        if cum >= threshold {
            return w;
        }
    }
    32
}

fn encode_unit(values: &[u32], out: &mut Vec<u8>) {
    let n = values.len();
    let w = choose_width(values);
    let exceptions: Vec<usize> = values
        .iter()
        .enumerate()
        .filter(|(_, &v)| bits_needed(v) > w)
        .map(|(i, _)| i)
        .collect();
    let ne = exceptions.len();
    let large_w = ne > 0 && (1u64 << w) >= UNIT_SIZE as u64;

    if ne == 0 {
        out.push(w as u8);
    } else {
        out.push(w as u8 | 0x80);
        varbyte::encode(ne as u32, out);
        if large_w {
            out.push(exceptions[0] as u8);
        }
    }

    let mut slots = values.to_vec();
    if large_w {
        for k in 0..ne {
            let idx = exceptions[k];
            let next = if k + 1 < ne { exceptions[k + 1] as u32 } else { n as u32 };
            slots[idx] = next;
        }
    } else {
        for &idx in &exceptions {
            slots[idx] = 0;
        }
    }
    pack_bits(&slots, w, out);

    if large_w {
        for &idx in &exceptions {
            let high = values[idx] - (1u32 << w);
            varbyte::encode(high, out);
        }
    } else {
        for &idx in &exceptions {
            out.push(idx as u8);
            let high = values[idx] - (1u32 << w);
            varbyte::encode(high, out);
        }
    }
}

fn decode_unit(data: &[u8], n: usize) -> IiResult<(Vec<u32>, usize)> {
    let mut pos = 0usize;
    let header = *data.get(pos).ok_or(IiError::EndOfData)?;
    pos += 1;
    let w = (header & 0x7f) as u32;
    let has_exceptions = header & 0x80 != 0;

    let mut ne = 0usize;
    let mut first_index = 0usize;
    let large_w = (1u64 << w) >= UNIT_SIZE as u64;
    if has_exceptions {
        let (ne_v, used) = varbyte::decode(data.get(pos..).ok_or(IiError::EndOfData)?)?;
        pos += used;
        ne = ne_v as usize;
        if large_w {
            first_index = *data.get(pos).ok_or(IiError::EndOfData)? as usize;
            pos += 1;
        }
    }

    let payload_bytes = (n * w as usize + 7) / 8;
    let payload = data
        .get(pos..pos + payload_bytes)
        .ok_or(IiError::EndOfData)?;
    let mut slots = unpack_bits(payload, n, w);
    pos += payload_bytes;

    if has_exceptions {
        if large_w {
            let mut idx = first_index;
            for _ in 0..ne {
                let (high, used) = varbyte::decode(data.get(pos..).ok_or(IiError::EndOfData)?)?;
                pos += used;
                if idx >= slots.len() {
                    return Err(IiError::FileCorrupt("pfor exception chain out of range".into()));
                }
                let next = slots[idx];
                slots[idx] = (1u32 << w) + high;
                idx = next as usize;
            }
        } else {
            for _ in 0..ne {
                let index = *data.get(pos).ok_or(IiError::EndOfData)? as usize;
                pos += 1;
                let (high, used) = varbyte::decode(data.get(pos..).ok_or(IiError::EndOfData)?)?;
                pos += used;
                if index >= slots.len() {
                    return Err(IiError::FileCorrupt("pfor exception index out of range".into()));
                }
                slots[index] = (1u32 << w) + high;
            }
        }
    }

    Ok((slots, pos))
}

/// Packs an entire stream, chunked into units of [`UNIT_SIZE`]; the final
/// unit may be a partial ("ODD") unit shorter than `UNIT_SIZE`.
pub fn pack(values: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in values.chunks(UNIT_SIZE) {
        encode_unit(chunk, &mut out);
    }
    out
}

/// Unpacks `n` values, returning them and the number of bytes consumed.
pub fn unpack(data: &[u8], n: usize) -> IiResult<(Vec<u32>, usize)> {
    let mut out = Vec::with_capacity(n);
    let mut remaining = n;
    let mut offset = 0usize;
    while remaining > 0 {
        let take = remaining.min(UNIT_SIZE);
        let (vals, used) = decode_unit(data.get(offset..).ok_or(IiError::EndOfData)?, take)?;
        out.extend(vals);
        offset += used;
        remaining -= take;
    }
    Ok((out, offset))
}

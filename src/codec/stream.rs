//! Per-stream dispatch between [`varbyte`] and [`pfor`], mirroring the
//! `encv`/`decv` multi-stream form: each stream picks its own encoding
//! based on its own size and value distribution.

use crate::codec::{pfor, varbyte};
use crate::error::{IiError, IiResult};

const TAG_VARBYTE: u8 = 0;
const TAG_PFOR: u8 = 1;

/// `n >= 3 && n > max_value >> 8` — PForDelta amortizes its per-unit
/// header over enough values to beat per-value variable-byte overhead
/// once gaps are small relative to count.
fn should_use_pfor(values: &[u32]) -> bool {
    let n = values.len();
    if n < 3 {
        return false;
    }
    let max = values.iter().copied().max().unwrap_or(0);
    n as u32 > (max >> 8)
}

/// Encodes one stream: `[count:VB][tag:u8][body]`.
pub fn encode_stream(values: &[u32], out: &mut Vec<u8>) {
    varbyte::encode(values.len() as u32, out);
    if should_use_pfor(values) {
        out.push(TAG_PFOR);
        out.extend(pfor::pack(values));
    } else {
        out.push(TAG_VARBYTE);
        for &v in values {
            varbyte::encode(v, out);
        }
    }
}

/// Decodes one stream, returning the values and bytes consumed.
pub fn decode_stream(data: &[u8]) -> IiResult<(Vec<u32>, usize)> {
    let (n, mut pos) = varbyte::decode(data)?;
    let n = n as usize;
    let tag = *data.get(pos).ok_or(IiError::EndOfData)?;
    pos += 1;
    match tag {
        TAG_PFOR => {
            let (vals, used) = pfor::unpack(data.get(pos..).ok_or(IiError::EndOfData)?, n)?;
            pos += used;
            Ok((vals, pos))
        }
        TAG_VARBYTE => {
            let (vals, used) = varbyte::decode_n(data.get(pos..).ok_or(IiError::EndOfData)?, n)?;
            pos += used;
            Ok((vals, pos))
        }
        other => Err(IiError::InvalidFormat(format!("unknown stream tag {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_stream_uses_varbyte() {
        let values = [1u32, 2];
        let mut out = Vec::new();
        encode_stream(&values, &mut out);
        assert_eq!(out[3], TAG_VARBYTE);
        let (got, used) = decode_stream(&out).unwrap();
        assert_eq!(got, values);
        assert_eq!(used, out.len());
    }

    #[test]
    fn dense_small_gap_stream_uses_pfor() {
        let values: Vec<u32> = (0..200u32).map(|i| i % 5).collect();
        assert!(should_use_pfor(&values));
        let mut out = Vec::new();
        encode_stream(&values, &mut out);
        assert_eq!(out[varbyte::decode(&out).unwrap().1], TAG_PFOR);
        let (got, used) = decode_stream(&out).unwrap();
        assert_eq!(got, values);
        assert_eq!(used, out.len());
    }

    #[test]
    fn sparse_large_gap_stream_uses_varbyte() {
        let values: Vec<u32> = vec![10, 5_000_000, 10_000_000];
        assert!(!should_use_pfor(&values));
        let mut out = Vec::new();
        encode_stream(&values, &mut out);
        let (got, _) = decode_stream(&out).unwrap();
        assert_eq!(got, values);
    }

    #[test]
    fn empty_stream_roundtrips() {
        let values: Vec<u32> = vec![];
        let mut out = Vec::new();
        encode_stream(&values, &mut out);
        let (got, used) = decode_stream(&out).unwrap();
        assert!(got.is_empty());
        assert_eq!(used, out.len());
    }
}

//! Sparse per-term array: one 2-word [`Slot`] per term id, backed by
//! fixed-size pages allocated lazily through [`IndexHeader::array_segment_for`].

use crate::constants::W_ARRAY;
use crate::error::IiResult;
use crate::model::posting::IndexFlags;
use crate::model::slot::Slot;
use crate::store::header::IndexHeader;
use crate::store::paged::PagedStore;

fn bucket_and_offset(tid: u32) -> (u32, usize) {
    let bucket = tid >> W_ARRAY;
    let within = (tid & ((1 << W_ARRAY) - 1)) as usize;
    (bucket, within * 8)
}

pub struct Array<'a> {
    store: &'a mut dyn PagedStore,
    flags: IndexFlags,
}

impl<'a> Array<'a> {
    pub fn new(store: &'a mut dyn PagedStore, flags: IndexFlags) -> Self {
        Array { store, flags }
    }

    /// Reads a term's slot without forcing its page to exist.
    pub fn get(&mut self, header: &IndexHeader, tid: u32) -> IiResult<Slot> {
        let (bucket, byte_off) = bucket_and_offset(tid);
        let Some(&pseg) = header.ainfo.get(&bucket) else {
            return Ok(Slot::Empty);
        };
        let page = self.store.read_segment(pseg)?;
        let a0 = u32::from_le_bytes(page[byte_off..byte_off + 4].try_into().unwrap());
        let a1 = u32::from_le_bytes(page[byte_off + 4..byte_off + 8].try_into().unwrap());
        Slot::decode(a0, a1, self.flags)
    }

    /// Writes a term's slot, lazily allocating the backing page.
    pub fn set(&mut self, header: &mut IndexHeader, tid: u32, slot: Slot) -> IiResult<()> {
        let (bucket, byte_off) = bucket_and_offset(tid);
        let pseg = header.array_segment_for(bucket)?;
        let mut page = self.store.read_segment(pseg)?;
        let (a0, a1) = slot.encode(self.flags)?;
        page[byte_off..byte_off + 4].copy_from_slice(&a0.to_le_bytes());
        page[byte_off + 4..byte_off + 8].copy_from_slice(&a1.to_le_bytes());
        self.store.write_segment(pseg, &page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::paged::MemSegmentStore;

    #[test]
    fn unset_term_is_empty() {
        let mut store = MemSegmentStore::new(crate::constants::S_SEGMENT);
        let mut header = IndexHeader::default();
        let mut array = Array::new(&mut store, IndexFlags::empty());
        assert_eq!(array.get(&header, 42).unwrap(), Slot::Empty);
        let _ = &mut header;
    }

    #[test]
    fn set_then_get_roundtrips() {
        let mut store = MemSegmentStore::new(crate::constants::S_SEGMENT);
        let mut header = IndexHeader::default();
        let mut array = Array::new(&mut store, IndexFlags::WITH_SECTION);
        let slot = Slot::Inline { rid: 5, sid: 1, pos: 2 };
        array.set(&mut header, 100, slot).unwrap();
        assert_eq!(array.get(&header, 100).unwrap(), slot);
    }

    #[test]
    fn distinct_buckets_do_not_collide() {
        let mut store = MemSegmentStore::new(crate::constants::S_SEGMENT);
        let mut header = IndexHeader::default();
        let mut array = Array::new(&mut store, IndexFlags::empty());
        let a = Slot::Inline { rid: 1, sid: 0, pos: 0 };
        let b = Slot::Inline { rid: 2, sid: 0, pos: 0 };
        array.set(&mut header, 10, a).unwrap();
        array.set(&mut header, 10 + (1 << W_ARRAY), b).unwrap();
        assert_eq!(array.get(&header, 10).unwrap(), a);
        assert_eq!(array.get(&header, 10 + (1 << W_ARRAY)).unwrap(), b);
    }
}

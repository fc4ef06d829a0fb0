//! Top-level `Index` value: owns the header, the array/chunk stores, and
//! the resident buffer segments, and exposes the public operations named
//! in the external interface.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use rustc_hash::FxHashMap;

use crate::array::Array;
use crate::buffer::segment::BufferSegment;
use crate::config::StoreOptions;
use crate::constants::S_SEGMENT;
use crate::error::{IiError, IiResult};
use crate::model::posting::IndexFlags;
use crate::store::chunkstore::ChunkAllocator;
use crate::store::header::IndexHeader;
use crate::store::paged::{
    ChunkBytesStore, FileChunkBytesStore, FileSegmentStore, MemChunkBytesStore, MemSegmentStore,
    PagedStore,
};

/// One physical sub-chunk backing part of a term's posting list.
#[derive(Debug, Clone)]
pub struct ChunkPartRef {
    pub first_rid: u32,
    pub offset: u64,
    pub alloc_size: usize,
}

/// Where a term's merged posting list lives once it has left the buffer.
#[derive(Debug, Clone, Default)]
pub struct ChunkRef {
    pub parts: Vec<ChunkPartRef>,
}

impl ChunkRef {
    pub fn is_split(&self) -> bool {
        self.parts.len() > 1
    }
}

/// The number of bytes reserved at the start of the segment file for the
/// serialized [`IndexHeader`], before physical segment 0 begins.
pub const HEADER_RESERVED_BYTES: u64 = 1 << 16;

pub struct Index {
    pub header: IndexHeader,
    pub(crate) array_store: Box<dyn PagedStore>,
    pub(crate) chunk_store: Box<dyn ChunkBytesStore>,
    pub(crate) chunk_alloc: ChunkAllocator,
    pub(crate) chunk_dir: FxHashMap<u32, ChunkRef>,
    pub(crate) buffers: FxHashMap<u32, BufferSegment>,
    pub flags: IndexFlags,
    pub options: StoreOptions,
    pub(crate) write_lock: Mutex<()>,
}

impl Index {
    pub fn create_in_memory(flags: IndexFlags) -> Self {
        Self::create_with_stores(
            flags,
            Box::new(MemSegmentStore::new(S_SEGMENT)),
            Box::new(MemChunkBytesStore::new()),
            StoreOptions::default(),
        )
    }

    pub fn create_with_stores(
        flags: IndexFlags,
        array_store: Box<dyn PagedStore>,
        chunk_store: Box<dyn ChunkBytesStore>,
        options: StoreOptions,
    ) -> Self {
        Index {
            header: IndexHeader::new(flags),
            array_store,
            chunk_store,
            chunk_alloc: ChunkAllocator::with_ceiling(options.chunk_ceiling),
            chunk_dir: FxHashMap::default(),
            buffers: FxHashMap::default(),
            flags,
            options,
            write_lock: Mutex::new(()),
        }
    }

    /// Creates a fresh on-disk index at `path` / `path.c`.
    pub fn ii_create(path: &Path, flags: IndexFlags) -> IiResult<Self> {
        let segment_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let chunk_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(chunk_path(path))?;
        let mut index = Index::create_with_stores(
            flags,
            Box::new(offset_segment_store(segment_file)),
            Box::new(FileChunkBytesStore::new(chunk_file)),
            StoreOptions::default(),
        );
        index.flush_header()?;
        Ok(index)
    }

    /// Reopens an on-disk index created by [`Index::ii_create`].
    pub fn ii_open(path: &Path) -> IiResult<Self> {
        let mut segment_file = OpenOptions::new().read(true).write(true).open(path)?;
        let chunk_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(chunk_path(path))?;
        use std::io::{Read, Seek, SeekFrom};
        segment_file.seek(SeekFrom::Start(0))?;
        let mut header_bytes = vec![0u8; HEADER_RESERVED_BYTES as usize];
        segment_file.read_exact(&mut header_bytes)?;
        let header = IndexHeader::from_bytes(&header_bytes)?;
        let flags = header.flags;
        let mut index = Index::create_with_stores(
            flags,
            Box::new(offset_segment_store(segment_file)),
            Box::new(FileChunkBytesStore::new(chunk_file)),
            StoreOptions::default(),
        );
        index.header = header;
        Ok(index)
    }

    /// Persists the header blob; callers should call this after any
    /// mutating operation they need durable (`ii_close` always does).
    pub fn flush_header(&mut self) -> IiResult<()> {
        // Only meaningful for file-backed stores; in-memory stores ignore
        // the write since there's nowhere durable to put it.
        let bytes = self.header.to_bytes();
        if bytes.len() as u64 > HEADER_RESERVED_BYTES {
            return Err(IiError::NoMemoryAvailable(
                "index header exceeds reserved region".into(),
            ));
        }
        self.array_store.write_segment(HEADER_PSEUDO_SEGMENT, &pad(bytes))
    }

    pub fn ii_close(mut self) -> IiResult<()> {
        self.flush_header()
    }

    pub fn ii_remove(path: &Path) -> IiResult<()> {
        std::fs::remove_file(path)?;
        let c = chunk_path(path);
        if c.exists() {
            std::fs::remove_file(c)?;
        }
        Ok(())
    }

    pub fn ii_truncate(&mut self) -> IiResult<()> {
        self.header = IndexHeader::new(self.flags);
        self.chunk_alloc = ChunkAllocator::with_ceiling(self.options.chunk_ceiling);
        self.chunk_dir.clear();
        self.buffers.clear();
        self.flush_header()
    }

    /// Best-effort estimate of a term's posting count: buffered records
    /// plus whatever the chunk directory last recorded.
    pub fn ii_estimate_size(&mut self, tid: u32) -> IiResult<u32> {
        use crate::model::slot::Slot;
        let slot = Array::new(self.array_store.as_mut(), self.flags).get(&self.header, tid)?;
        match slot {
            Slot::Empty => Ok(0),
            Slot::Inline { .. } => Ok(1),
            Slot::Buffered { lseg, count, .. } => {
                let _ = lseg;
                Ok(count)
            }
        }
    }
}

const HEADER_PSEUDO_SEGMENT: u32 = u32::MAX - 1;

fn pad(mut bytes: Vec<u8>) -> Vec<u8> {
    bytes.resize(HEADER_RESERVED_BYTES as usize, 0);
    bytes
}

fn chunk_path(path: &Path) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".c");
    std::path::PathBuf::from(s)
}

/// Wraps a [`FileSegmentStore`] so physical segment 0 begins after the
/// reserved header region, and segment `u32::MAX - 1` addresses the
/// header blob itself (see [`Index::flush_header`]).
fn offset_segment_store(file: File) -> OffsetSegmentStore {
    OffsetSegmentStore {
        inner: FileSegmentStore::new(file),
    }
}

struct OffsetSegmentStore {
    inner: FileSegmentStore,
}

impl PagedStore for OffsetSegmentStore {
    fn segment_size(&self) -> usize {
        self.inner.segment_size()
    }

    fn read_segment(&mut self, pseg: u32) -> IiResult<Vec<u8>> {
        if pseg == HEADER_PSEUDO_SEGMENT {
            return read_header_region(&mut self.inner);
        }
        self.inner.read_segment(pseg + header_segments())
    }

    fn write_segment(&mut self, pseg: u32, data: &[u8]) -> IiResult<()> {
        if pseg == HEADER_PSEUDO_SEGMENT {
            return write_header_region(&mut self.inner, data);
        }
        self.inner.write_segment(pseg + header_segments(), data)
    }
}

fn header_segments() -> u32 {
    (HEADER_RESERVED_BYTES as usize).div_ceil(S_SEGMENT) as u32
}

fn read_header_region(store: &mut FileSegmentStore) -> IiResult<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_RESERVED_BYTES as usize);
    for seg in 0..header_segments() {
        out.extend(store.read_segment(seg)?);
    }
    out.truncate(HEADER_RESERVED_BYTES as usize);
    Ok(out)
}

fn write_header_region(store: &mut FileSegmentStore, data: &[u8]) -> IiResult<()> {
    let seg_size = store.segment_size();
    for (seg, chunk) in data.chunks(seg_size).enumerate() {
        let mut buf = chunk.to_vec();
        buf.resize(seg_size, 0);
        store.write_segment(seg as u32, &buf)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn in_memory_index_starts_empty() {
        let mut index = Index::create_in_memory(IndexFlags::WITH_SECTION | IndexFlags::WITH_POSITION);
        assert_eq!(index.ii_estimate_size(1).unwrap(), 0);
    }

    #[test]
    fn create_then_open_preserves_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");
        let flags = IndexFlags::WITH_SECTION | IndexFlags::WITH_POSITION;
        {
            let mut index = Index::ii_create(&path, flags).unwrap();
            index.header.smax = 42;
            index.flush_header().unwrap();
        }
        let reopened = Index::ii_open(&path).unwrap();
        assert_eq!(reopened.flags, flags);
        assert_eq!(reopened.header.smax, 42);
    }

    #[test]
    fn truncate_resets_state() {
        let mut index = Index::create_in_memory(IndexFlags::empty());
        index.header.buffer_segment_new().unwrap();
        index.ii_truncate().unwrap();
        assert_eq!(index.header.bmax, 0);
    }
}

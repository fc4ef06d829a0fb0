//! File-backed segment and chunk byte stores.
//!
//! The on-disk access pattern (seek to an offset, read/write a whole
//! region through a buffered reader) follows the teacher's
//! `Block::encode`/`Block::decode`: whole-page reads into a `Vec<u8>`
//! rather than a memory-mapped struct overlay. A host database that
//! wants true mmap + refcounted pinning implements [`PagedStore`] and
//! [`ChunkBytesStore`] itself; this crate's default is for embedding and
//! tests.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use crate::constants::S_SEGMENT;
use crate::error::IiResult;

/// Fixed-size paged storage for array pages and buffer segments.
pub trait PagedStore: Send {
    fn segment_size(&self) -> usize;
    fn read_segment(&mut self, pseg: u32) -> IiResult<Vec<u8>>;
    fn write_segment(&mut self, pseg: u32, data: &[u8]) -> IiResult<()>;
}

/// Variable-offset byte storage for chunks.
pub trait ChunkBytesStore: Send {
    fn read_chunk(&mut self, offset: u64, size: usize) -> IiResult<Vec<u8>>;
    fn write_chunk(&mut self, offset: u64, data: &[u8]) -> IiResult<()>;
}

pub struct FileSegmentStore {
    file: File,
    segment_size: usize,
}

impl FileSegmentStore {
    pub fn new(file: File) -> Self {
        FileSegmentStore {
            file,
            segment_size: S_SEGMENT,
        }
    }

    pub fn with_segment_size(file: File, segment_size: usize) -> Self {
        FileSegmentStore { file, segment_size }
    }
}

impl PagedStore for FileSegmentStore {
    fn segment_size(&self) -> usize {
        self.segment_size
    }

    fn read_segment(&mut self, pseg: u32) -> IiResult<Vec<u8>> {
        let offset = pseg as u64 * self.segment_size as u64;
        let len = self.file.metadata()?.len();
        let mut buf = vec![0u8; self.segment_size];
        if offset >= len {
            return Ok(buf);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut self.file);
        let to_read = ((len - offset) as usize).min(self.segment_size);
        reader.read_exact(&mut buf[..to_read])?;
        Ok(buf)
    }

    fn write_segment(&mut self, pseg: u32, data: &[u8]) -> IiResult<()> {
        let offset = pseg as u64 * self.segment_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut writer = BufWriter::new(&mut self.file);
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }
}

pub struct FileChunkBytesStore {
    file: File,
}

impl FileChunkBytesStore {
    pub fn new(file: File) -> Self {
        FileChunkBytesStore { file }
    }
}

impl ChunkBytesStore for FileChunkBytesStore {
    fn read_chunk(&mut self, offset: u64, size: usize) -> IiResult<Vec<u8>> {
        let len = self.file.metadata()?.len();
        let mut buf = vec![0u8; size];
        if offset >= len {
            return Ok(buf);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut self.file);
        let to_read = ((len - offset) as usize).min(size);
        reader.read_exact(&mut buf[..to_read])?;
        Ok(buf)
    }

    fn write_chunk(&mut self, offset: u64, data: &[u8]) -> IiResult<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut writer = BufWriter::new(&mut self.file);
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }
}

/// In-memory stand-ins used by unit tests that don't need real files.
pub struct MemSegmentStore {
    pages: rustc_hash::FxHashMap<u32, Vec<u8>>,
    segment_size: usize,
}

impl MemSegmentStore {
    pub fn new(segment_size: usize) -> Self {
        MemSegmentStore {
            pages: rustc_hash::FxHashMap::default(),
            segment_size,
        }
    }
}

impl PagedStore for MemSegmentStore {
    fn segment_size(&self) -> usize {
        self.segment_size
    }

    fn read_segment(&mut self, pseg: u32) -> IiResult<Vec<u8>> {
        Ok(self
            .pages
            .get(&pseg)
            .cloned()
            .unwrap_or_else(|| vec![0u8; self.segment_size]))
    }

    fn write_segment(&mut self, pseg: u32, data: &[u8]) -> IiResult<()> {
        self.pages.insert(pseg, data.to_vec());
        Ok(())
    }
}

pub struct MemChunkBytesStore {
    region: Vec<u8>,
}

impl MemChunkBytesStore {
    pub fn new() -> Self {
        MemChunkBytesStore { region: Vec::new() }
    }
}

impl Default for MemChunkBytesStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkBytesStore for MemChunkBytesStore {
    fn read_chunk(&mut self, offset: u64, size: usize) -> IiResult<Vec<u8>> {
        let offset = offset as usize;
        let mut buf = vec![0u8; size];
        if offset < self.region.len() {
            let to_read = (self.region.len() - offset).min(size);
            buf[..to_read].copy_from_slice(&self.region[offset..offset + to_read]);
        }
        Ok(buf)
    }

    fn write_chunk(&mut self, offset: u64, data: &[u8]) -> IiResult<()> {
        let offset = offset as usize;
        let end = offset + data.len();
        if end > self.region.len() {
            self.region.resize(end, 0);
        }
        self.region[offset..end].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempfile;

    #[test]
    fn file_segment_store_roundtrips() {
        let mut store = FileSegmentStore::with_segment_size(tempfile().unwrap(), 64);
        let data = vec![7u8; 64];
        store.write_segment(3, &data).unwrap();
        let got = store.read_segment(3).unwrap();
        assert_eq!(got, data);
    }

    #[test]
    fn file_segment_store_reads_unwritten_page_as_zero() {
        let mut store = FileSegmentStore::with_segment_size(tempfile().unwrap(), 32);
        let got = store.read_segment(5).unwrap();
        assert_eq!(got, vec![0u8; 32]);
    }

    #[test]
    fn file_chunk_store_roundtrips_arbitrary_offsets() {
        let mut store = FileChunkBytesStore::new(tempfile().unwrap());
        store.write_chunk(1000, b"hello").unwrap();
        let got = store.read_chunk(1000, 5).unwrap();
        assert_eq!(&got, b"hello");
    }

    #[test]
    fn mem_segment_store_roundtrips() {
        let mut store = MemSegmentStore::new(16);
        store.write_segment(0, &[1; 16]).unwrap();
        assert_eq!(store.read_segment(0).unwrap(), vec![1u8; 16]);
        assert_eq!(store.read_segment(1).unwrap(), vec![0u8; 16]);
    }

    #[test]
    fn mem_chunk_store_roundtrips() {
        let mut store = MemChunkBytesStore::new();
        store.write_chunk(10, b"abc").unwrap();
        assert_eq!(store.read_chunk(10, 3).unwrap(), b"abc");
        assert_eq!(store.read_chunk(0, 3).unwrap(), vec![0, 0, 0]);
    }
}

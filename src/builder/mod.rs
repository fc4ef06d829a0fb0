//! Two-phase offline builder: tokenized input is staged to temp-file
//! blocks, then merged term-by-term straight into final chunks, bypassing
//! the single-document update path entirely.
//!
//! Phase 1 is grounded in the teacher's
//! `Spmi::single_pass_in_memory_indexing`/`write_dictionary_to_disk`: an
//! in-memory dictionary (here, a `term_id -> Vec<Posting>` map) spills to
//! a `tempfile::NamedTempFile` once it grows past a budget. Phase 2 is
//! grounded in `Spmi::merge_index_files`/`scan_and_create_iterators`: one
//! reader per temp block advances in lock-step, and each round picks the
//! numerically smallest lookahead term id across all live readers.
//!
//! Unlike the teacher (and the literal design's private `tmp_lexicon`),
//! term ids here are resolved against the caller's real lexicon during
//! phase 1 directly — this crate's `Lexicon` trait makes
//! `get_or_create_id` cheap enough that staging through a second lexicon
//! buys nothing. Recorded as a simplification in DESIGN.md.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};

use rustc_hash::FxHashMap;
use tempfile::NamedTempFile;

use crate::buffer::merger;
use crate::constants::{BUILDER_BLOCK_ELEMENTS, BUILDER_NTERMS_PER_BUFFER};
use crate::error::{IiError, IiResult};
use crate::index::Index;
use crate::model::posting::{IndexFlags, Posting};
use crate::model::slot::Slot;

/// Accumulates tokenized postings across a table scan, then folds them
/// into an [`Index`] in one pass via [`BulkBuilder::finish`].
pub struct BulkBuilder {
    flags: IndexFlags,
    blocks: Vec<NamedTempFile>,
    block_buf: FxHashMap<u32, Vec<Posting>>,
    block_elements: usize,
}

/// Summary of what a bulk build wrote, for the caller's own logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildStats {
    pub terms_written: u32,
    pub blocks_merged: u32,
}

impl BulkBuilder {
    pub fn new(flags: IndexFlags) -> Self {
        BulkBuilder {
            flags,
            blocks: Vec::new(),
            block_buf: FxHashMap::default(),
            block_elements: 0,
        }
    }

    /// Ingests one tokenized `(rid, sid)` record: `term_positions` pairs
    /// a term id with its occurrence position within the section. The
    /// caller (not this crate; tokenization is out of scope) is expected
    /// to have already resolved each token to a term id via the real
    /// lexicon.
    pub fn add(&mut self, rid: u32, sid: u32, weight: u32, term_positions: &[(u32, u32)]) -> IiResult<()> {
        let mut by_term: FxHashMap<u32, Vec<u32>> = FxHashMap::default();
        for &(tid, pos) in term_positions {
            by_term.entry(tid).or_default().push(pos);
        }
        for (tid, mut positions) in by_term {
            positions.sort_unstable();
            let mut posting = Posting::new(rid, sid, positions);
            posting.weight = weight;
            self.block_elements += 2 + posting.positions.len();
            self.block_buf.entry(tid).or_default().push(posting);
        }
        if self.block_elements >= BUILDER_BLOCK_ELEMENTS {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> IiResult<()> {
        if self.block_buf.is_empty() {
            return Ok(());
        }
        let mut tids: Vec<u32> = self.block_buf.keys().copied().collect();
        tids.sort_unstable();

        let tmp = NamedTempFile::new()?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            writer.write_all(&(tids.len() as u32).to_le_bytes())?;
            for tid in &tids {
                let mut postings = self.block_buf.remove(tid).unwrap();
                postings.sort_by_key(|p| (p.rid, p.sid));
                let encoded = merger::encode_postings(self.flags, &postings);
                writer.write_all(&tid.to_le_bytes())?;
                writer.write_all(&(encoded.len() as u32).to_le_bytes())?;
                writer.write_all(&encoded)?;
            }
            writer.flush()?;
        }
        self.blocks.push(tmp);
        self.block_buf.clear();
        self.block_elements = 0;
        Ok(())
    }

    /// Runs the k-way merge over every staged block and writes the final
    /// per-term chunks (or inline slots) into `index`. Consumes `self`;
    /// the temp files are dropped (and thus deleted) once merged.
    pub fn finish(mut self, index: &mut Index) -> IiResult<BuildStats> {
        self.flush_block()?;

        let mut readers = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let file = block.reopen()?;
            readers.push(BlockReader::open(file, self.flags)?);
        }

        let mut stats = BuildStats {
            blocks_merged: readers.len() as u32,
            ..Default::default()
        };

        let mut current_lseg: Option<u32> = None;
        let mut terms_in_lseg = 0usize;

        loop {
            let min_tid = readers.iter().filter_map(|r| r.current_tid).min();
            let Some(tid) = min_tid else { break };

            let mut merged: Vec<Posting> = Vec::new();
            for reader in &mut readers {
                if reader.current_tid == Some(tid) {
                    let postings = reader.current_postings.take().unwrap_or_default();
                    merged = merger::merge_postings(&merged, &postings);
                    reader.advance()?;
                }
            }

            let is_inline = merged.len() == 1
                && merged[0].tf == 1
                && merged[0].weight == 0
                && Slot::fits_inline(merged[0].rid, merged[0].sid, self.flags);
            if !is_inline {
                if current_lseg.is_none() || terms_in_lseg >= BUILDER_NTERMS_PER_BUFFER {
                    let (lseg, _) = index.header.buffer_segment_new()?;
                    current_lseg = Some(lseg);
                    terms_in_lseg = 0;
                }
                terms_in_lseg += 1;
            }
            // Inline-fitting terms skip the buffer grouping entirely (the
            // fast path); `install_merged_term` only consults `lseg` when
            // the result doesn't collapse to an inline singleton.
            let lseg = current_lseg.unwrap_or(0);
            index.install_merged_term(tid, lseg, merged)?;
            stats.terms_written += 1;
        }

        Ok(stats)
    }
}

/// Reads one phase-1 temp block's `(tid, encoded_postings)` entries in
/// the ascending-by-tid order they were written in.
struct BlockReader {
    file: BufReader<File>,
    n_terms: u32,
    read: u32,
    flags: IndexFlags,
    current_tid: Option<u32>,
    current_postings: Option<Vec<Posting>>,
}

impl BlockReader {
    fn open(file: File, flags: IndexFlags) -> IiResult<Self> {
        let mut reader = BlockReader {
            file: BufReader::new(file),
            n_terms: 0,
            read: 0,
            flags,
            current_tid: None,
            current_postings: None,
        };
        reader.n_terms = reader.read_u32()?;
        reader.advance()?;
        Ok(reader)
    }

    fn advance(&mut self) -> IiResult<()> {
        if self.read >= self.n_terms {
            self.current_tid = None;
            self.current_postings = None;
            return Ok(());
        }
        let tid = self.read_u32()?;
        let len = self.read_u32()? as usize;
        let mut bytes = vec![0u8; len];
        self.file.read_exact(&mut bytes)?;
        let (postings, _) = merger::decode_postings(self.flags, &bytes)?;
        self.current_tid = Some(tid);
        self.current_postings = Some(postings);
        self.read += 1;
        Ok(())
    }

    fn read_u32(&mut self) -> IiResult<u32> {
        let mut buf = [0u8; 4];
        self.file
            .read_exact(&mut buf)
            .map_err(|e| IiError::FileCorrupt(format!("truncated builder block: {e}")))?;
        Ok(u32::from_le_bytes(buf))
    }
}

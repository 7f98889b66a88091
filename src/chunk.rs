//! Fixed-size, overlapping text chunker.
//!
//! Splits extracted document text into [`Chunk`]s of `size` characters,
//! each starting `size - overlap` characters after the previous one. The
//! last chunk may be shorter. Lengths are counted in chars, so a chunk
//! boundary never falls inside a multi-byte character.
//!
//! Each chunk carries a SHA-256 of its text, which the vector store uses as
//! the dedup key.

use crate::error::{AdvisorError, Result};
use crate::extract::sha256_hex;
use crate::models::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            size: 4000,
            overlap: 200,
        }
    }
}

impl Chunker {
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            return Err(AdvisorError::Configuration(
                "chunk size must be > 0".to_string(),
            ));
        }
        if overlap >= size {
            return Err(AdvisorError::Configuration(format!(
                "chunk overlap ({}) must be < chunk size ({})",
                overlap, size
            )));
        }
        Ok(Self { size, overlap })
    }

    pub fn from_config(config: &crate::config::ChunkingConfig) -> Result<Self> {
        Self::new(config.size, config.overlap)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Lazy iterator over the chunks of `text`. Calling this again restarts
    /// from the first chunk.
    pub fn chunk_iter<'a>(&self, source_document: &'a str, text: &'a str) -> ChunkIter<'a> {
        let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        offsets.push(text.len());
        ChunkIter {
            source_document,
            text,
            offsets,
            size: self.size,
            step: self.size - self.overlap,
            next_start: if text.is_empty() { None } else { Some(0) },
            index: 0,
        }
    }

    pub fn chunk(&self, source_document: &str, text: &str) -> Vec<Chunk> {
        self.chunk_iter(source_document, text).collect()
    }
}

pub struct ChunkIter<'a> {
    source_document: &'a str,
    text: &'a str,
    /// Byte offset of every char, plus `text.len()` as the final entry.
    offsets: Vec<usize>,
    size: usize,
    step: usize,
    next_start: Option<usize>,
    index: usize,
}

impl<'a> ChunkIter<'a> {
    fn char_len(&self) -> usize {
        self.offsets.len() - 1
    }
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let start = self.next_start?;
        let len = self.char_len();
        let end = (start + self.size).min(len);

        self.next_start = if end == len {
            None
        } else {
            Some(start + self.step)
        };

        let text = &self.text[self.offsets[start]..self.offsets[end]];
        let chunk = Chunk {
            source_document: self.source_document.to_string(),
            index: self.index,
            text: text.to_string(),
            start_offset: start,
            end_offset: end,
            hash: sha256_hex(text.as_bytes()),
        };
        self.index += 1;
        Some(chunk)
    }
}

//! Fixed-window text chunker with overlap.
//!
//! Splits normalized text into [`TextChunk`]s of at most `size` characters,
//! each starting `size - overlap` characters after the previous one. The
//! split is greedy and single-pass; it does not look for sentence or
//! paragraph boundaries.
//!
//! Offsets count Unicode scalar values, so a chunk never splits a
//! multi-byte character.

use anyhow::{bail, Result};

use crate::models::{SourceMeta, TextChunk};

/// Window size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWindow {
    size: usize,
    overlap: usize,
}

impl ChunkWindow {
    /// Requires `size >= 1` and `overlap < size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            bail!("chunk size must be >= 1");
        }
        if overlap >= size {
            bail!("chunk overlap ({}) must be < chunk size ({})", overlap, size);
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between consecutive chunk starts. Never zero.
    pub fn stride(&self) -> usize {
        self.size.saturating_sub(self.overlap).max(1)
    }
}

/// Split text into overlapping windows with contiguous indices from 0.
///
/// Empty text yields no chunks. Otherwise the last chunk always ends at the
/// text length.
pub fn chunk_text(text: &str, window: ChunkWindow) -> Vec<TextChunk> {
    // Byte offset of every char, plus the end of the string.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let len = bounds.len();
    bounds.push(text.len());

    let mut chunks = Vec::with_capacity(len / window.stride() + 1);
    let mut cursor = 0usize;

    while cursor < len {
        let end = (cursor + window.size).min(len);
        chunks.push(TextChunk {
            index: chunks.len() as i64,
            text: text[bounds[cursor]..bounds[end]].to_string(),
            meta: SourceMeta::new(cursor, end),
        });
        if end == len {
            break;
        }
        cursor += window.stride();
    }

    chunks
}

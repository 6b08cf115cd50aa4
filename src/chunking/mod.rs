
use serde::{Deserialize, Serialize};
use std::iter::FusedIterator;
use thiserror::Error;
use tracing::debug;

use crate::models::{Chunk, Document};

/// Configuration for document chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window size in characters
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 100,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Invalid chunk parameters: size {size}, overlap {overlap} (need 0 <= overlap < size)")]
    InvalidChunkParams { size: usize, overlap: usize },
}

/// A validated chunking of one document.
///
/// Chunks are produced lazily; every call to [`ChunkPlan::iter`] starts a
/// fresh pass over the document and yields the same sequence.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlan<'a> {
    document: &'a Document,
    size: usize,
    overlap: usize,
}

/// Split a document into overlapping windows of `size` characters
#[inline]
pub fn chunk(document: &Document, size: usize, overlap: usize) -> Result<ChunkPlan<'_>, ChunkError> {
    if size == 0 || overlap >= size {
        return Err(ChunkError::InvalidChunkParams { size, overlap });
    }

    Ok(ChunkPlan {
        document,
        size,
        overlap,
    })
}

/// Chunk every document with the same parameters, in document order
#[inline]
pub fn chunk_documents(documents: &[Document], config: &ChunkingConfig) -> Result<Vec<Chunk>, ChunkError> {
    let mut chunks = Vec::new();
    for document in documents {
        let plan = chunk(document, config.chunk_size, config.overlap)?;
        let before = chunks.len();
        chunks.extend(plan.iter());
        debug!(
            "Chunked document {} into {} chunks",
            document.id,
            chunks.len() - before
        );
    }
    Ok(chunks)
}

impl<'a> ChunkPlan<'a> {
    #[inline]
    pub fn iter(&self) -> Chunks<'a> {
        let next_start = (!self.document.raw_text.is_empty()).then_some(0);
        Chunks {
            document: self.document,
            size: self.size,
            step: self.size - self.overlap,
            next_start,
            position: 0,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

impl<'a> IntoIterator for &ChunkPlan<'a> {
    type Item = Chunk;
    type IntoIter = Chunks<'a>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator over the chunks of a document
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    document: &'a Document,
    size: usize,
    step: usize,
    /// Byte offset where the next window starts
    next_start: Option<usize>,
    position: usize,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start?;
        let text = &self.document.raw_text;
        let rest = text.get(start..)?;

        let end = byte_offset_after(rest, self.size).map_or(text.len(), |offset| start + offset);
        self.next_start = if end >= text.len() {
            None
        } else {
            byte_offset_after(rest, self.step).map(|offset| start + offset)
        };

        let position = self.position;
        self.position += 1;

        let mut metadata = self.document.metadata.clone();
        if let Some(page) = self.document.page_at(start) {
            metadata.insert("page_number".to_string(), page.to_string());
        }

        Some(Chunk {
            id: format!("{}-{}", self.document.id, position),
            document_id: self.document.id.clone(),
            text: text.get(start..end)?.to_string(),
            position,
            metadata,
            embedding: None,
        })
    }
}

impl FusedIterator for Chunks<'_> {}

/// Byte offset of the `n`th character of `text`, if the text is longer than `n` characters
fn byte_offset_after(text: &str, n: usize) -> Option<usize> {
    text.char_indices().nth(n).map(|(offset, _)| offset)
}

/// Rebuild a document's text from its chunks by dropping each chunk's leading overlap
#[inline]
pub fn reassemble<'c, I>(chunks: I, overlap: usize) -> String
where
    I: IntoIterator<Item = &'c Chunk>,
{
    let mut ordered: Vec<&Chunk> = chunks.into_iter().collect();
    ordered.sort_by_key(|c| c.position);

    let mut text = String::new();
    for (index, chunk) in ordered.into_iter().enumerate() {
        if index == 0 {
            text.push_str(&chunk.text);
        } else {
            text.extend(chunk.text.chars().skip(overlap));
        }
    }
    text
}

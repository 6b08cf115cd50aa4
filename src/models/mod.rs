#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Provenance metadata attached to documents and inherited by their chunks
pub type Metadata = BTreeMap<String, String>;

/// A normalized plain-text document produced by the loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier derived from the source and the extracted text
    pub id: String,
    /// Where the document came from (path, upload name or URL)
    pub source_uri: String,
    /// Normalized text content
    pub raw_text: String,
    pub metadata: Metadata,
    /// Where each page of a paginated source begins in `raw_text`, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<PageMark>,
}

/// Start of a page within a document's normalized text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMark {
    /// Byte offset into `raw_text`
    pub offset: usize,
    /// 1-based page number in the source
    pub number: usize,
}

impl Document {
    #[inline]
    pub fn new(source_uri: impl Into<String>, raw_text: impl Into<String>, metadata: Metadata) -> Self {
        let source_uri = source_uri.into();
        let raw_text = raw_text.into();
        let id = document_id(&source_uri, &raw_text);
        Self {
            id,
            source_uri,
            raw_text,
            metadata,
            pages: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_pages(mut self, pages: Vec<PageMark>) -> Self {
        self.pages = pages;
        self
    }

    /// Page containing the byte at `offset`, for paginated sources
    #[inline]
    pub fn page_at(&self, offset: usize) -> Option<usize> {
        let index = self.pages.partition_point(|mark| mark.offset <= offset);
        index
            .checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .map(|mark| mark.number)
    }

    /// Number of characters in the normalized text
    #[inline]
    pub fn char_len(&self) -> usize {
        self.raw_text.chars().count()
    }
}

/// A contiguous slice of a document's text, the unit of embedding and retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    /// Identifier of the document this chunk was cut from
    pub document_id: String,
    pub text: String,
    /// Ordinal index of the chunk within its document
    pub position: usize,
    pub metadata: Metadata,
    /// Populated by the indexer
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    #[inline]
    pub fn source(&self) -> &str {
        self.metadata
            .get("source")
            .map_or(self.document_id.as_str(), String::as_str)
    }

    /// Source page the chunk starts on, when the document was paginated
    #[inline]
    pub fn page_number(&self) -> Option<usize> {
        self.metadata.get("page_number")?.parse().ok()
    }
}

/// Hex encoded SHA-256 of the given text
#[inline]
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn document_id(source_uri: &str, raw_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_uri.as_bytes());
    hasher.update([0u8]);
    hasher.update(raw_text.as_bytes());
    let digest: String = format!("{:x}", hasher.finalize()).chars().take(16).collect();
    format!("doc-{}", digest)
}

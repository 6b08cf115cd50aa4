#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::models::content_hash;

/// Embeddings keyed by embedder name and content hash.
///
/// Shared between concurrent pipeline runs. Entries are never overwritten:
/// the first writer for a key wins and later writers get the stored vector.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
    entries: RwLock<HashMap<String, Arc<[f32]>>>,
}

impl EmbeddingCache {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for `text` embedded by the embedder called `embedder`
    #[inline]
    pub fn key(embedder: &str, text: &str) -> String {
        format!("{}:{}", embedder, content_hash(text))
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<Arc<[f32]>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Store `embedding` unless the key is already present; returns the stored value
    #[inline]
    pub fn insert_if_absent(&self, key: String, embedding: Vec<f32>) -> Arc<[f32]> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(key).or_insert_with(|| Arc::from(embedding)))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

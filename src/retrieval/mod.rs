#[cfg(test)]
mod tests;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::embeddings::{Embedder, EmbeddingCache, EmbeddingError};
use crate::models::{Chunk, Metadata};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of passages handed to the prompt layer
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self { top_k: 4 }
    }
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Cannot retrieve from an empty index")]
    EmptyIndex,

    #[error("Invalid retrieval query: {reason}")]
    InvalidQuery { reason: String },

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

/// What to look for in an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalQuery {
    pub topic: String,
    pub k: usize,
    /// Exact-match constraints on chunk metadata
    pub filters: Metadata,
}

impl RetrievalQuery {
    #[inline]
    pub fn new(topic: impl Into<String>, k: usize) -> Self {
        Self {
            topic: topic.into(),
            k,
            filters: Metadata::new(),
        }
    }

    #[inline]
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    fn matches(&self, chunk: &Chunk) -> bool {
        self.filters
            .iter()
            .all(|(key, value)| chunk.metadata.get(key) == Some(value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Retrieved passages ordered by descending relevance
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievedContext {
    chunks: Vec<ScoredChunk>,
}

impl RetrievedContext {
    /// Build a context, restoring relevance order if needed
    #[inline]
    pub fn new(mut chunks: Vec<ScoredChunk>) -> Self {
        chunks.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.position.cmp(&b.chunk.position))
        });
        Self { chunks }
    }

    #[inline]
    pub fn chunks(&self) -> &[ScoredChunk] {
        &self.chunks
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, ScoredChunk> {
        self.chunks.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Drop the least relevant passage
    #[inline]
    pub fn pop_least_relevant(&mut self) -> Option<ScoredChunk> {
        self.chunks.pop()
    }

    #[inline]
    pub fn first_mut(&mut self) -> Option<&mut ScoredChunk> {
        self.chunks.first_mut()
    }
}

impl<'a> IntoIterator for &'a RetrievedContext {
    type Item = &'a ScoredChunk;
    type IntoIter = std::slice::Iter<'a, ScoredChunk>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.chunks.iter()
    }
}

/// Embeds chunks into a searchable [`IndexHandle`]
#[derive(Clone)]
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
}

impl fmt::Debug for Indexer {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Indexer")
            .field("embedder", &self.embedder.name())
            .field("cached_embeddings", &self.cache.len())
            .finish()
    }
}

impl Indexer {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, cache: Arc<EmbeddingCache>) -> Self {
        Self { embedder, cache }
    }

    /// Embed every chunk, only sending cache misses to the embedder
    #[inline]
    pub fn index(&self, chunks: Vec<Chunk>) -> Result<IndexHandle, RetrievalError> {
        let name = self.embedder.name();
        let keys: Vec<String> = chunks
            .iter()
            .map(|chunk| EmbeddingCache::key(name, &chunk.text))
            .collect();

        let mut resolved: HashMap<&str, Arc<[f32]>> = HashMap::new();
        let mut misses: Vec<(&str, &str)> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for (key, chunk) in keys.iter().zip(&chunks) {
            let key = key.as_str();
            if !seen.insert(key) {
                continue;
            }
            match self.cache.get(key) {
                Some(embedding) => {
                    resolved.insert(key, embedding);
                }
                None => misses.push((key, chunk.text.as_str())),
            }
        }

        debug!(
            "Indexing {} chunks: {} cached, {} to embed with {}",
            chunks.len(),
            resolved.len(),
            misses.len(),
            name
        );

        if !misses.is_empty() {
            let texts: Vec<String> = misses.iter().map(|(_, text)| (*text).to_string()).collect();
            let embeddings = self.embedder.embed(&texts)?;
            if embeddings.len() != texts.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: texts.len(),
                    actual: embeddings.len(),
                }
                .into());
            }
            for ((key, _), embedding) in misses.into_iter().zip(embeddings) {
                let stored = self.cache.insert_if_absent(key.to_string(), embedding);
                resolved.insert(key, stored);
            }
        }

        let mut dimension = None;
        let mut indexed = Vec::with_capacity(chunks.len());
        for (key, mut chunk) in keys.iter().zip(chunks) {
            let embedding = resolved
                .get(key.as_str())
                .ok_or_else(|| EmbeddingError::Provider {
                    provider: name.to_string(),
                    message: format!("no embedding computed for chunk {}", chunk.id),
                })?;
            let expected = *dimension.get_or_insert(embedding.len());
            if embedding.len() != expected {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                }
                .into());
            }
            chunk.embedding = Some(embedding.to_vec());
            indexed.push(chunk);
        }

        info!("Indexed {} chunks", indexed.len());
        Ok(IndexHandle {
            chunks: indexed,
            dimension: dimension.unwrap_or(0),
            embedder: Arc::clone(&self.embedder),
        })
    }
}

/// An in-memory index. Lives for one pipeline run.
pub struct IndexHandle {
    chunks: Vec<Chunk>,
    dimension: usize,
    embedder: Arc<dyn Embedder>,
}

impl fmt::Debug for IndexHandle {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexHandle")
            .field("chunks", &self.chunks.len())
            .field("dimension", &self.dimension)
            .field("embedder", &self.embedder.name())
            .finish()
    }
}

impl IndexHandle {
    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }
}

/// Return the `k` chunks most similar to the query topic.
///
/// Ties are broken by ascending chunk position and then by document order.
#[inline]
pub fn retrieve(query: &RetrievalQuery, index: &IndexHandle) -> Result<RetrievedContext, RetrievalError> {
    if query.k == 0 {
        return Err(RetrievalError::InvalidQuery {
            reason: "k must be at least 1".to_string(),
        });
    }
    if index.is_empty() {
        return Err(RetrievalError::EmptyIndex);
    }

    let query_embedding = index
        .embedder
        .embed(std::slice::from_ref(&query.topic))?
        .into_iter()
        .next()
        .ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })?;
    if query_embedding.len() != index.dimension {
        return Err(EmbeddingError::DimensionMismatch {
            expected: index.dimension,
            actual: query_embedding.len(),
        }
        .into());
    }

    let mut scored: Vec<(usize, f32)> = index
        .chunks
        .par_iter()
        .enumerate()
        .filter(|(_, chunk)| query.matches(chunk))
        .map(|(order, chunk)| {
            let score = chunk
                .embedding
                .as_deref()
                .map_or(0.0, |embedding| cosine_similarity(embedding, &query_embedding));
            (order, score)
        })
        .collect();

    scored.sort_by(|(order_a, score_a), (order_b, score_b)| {
        let position_a = index.chunks.get(*order_a).map(|c| c.position);
        let position_b = index.chunks.get(*order_b).map(|c| c.position);
        score_b
            .total_cmp(score_a)
            .then_with(|| position_a.cmp(&position_b))
            .then_with(|| order_a.cmp(order_b))
    });
    scored.truncate(query.k);

    let chunks: Vec<ScoredChunk> = scored
        .into_iter()
        .filter_map(|(order, score)| {
            index.chunks.get(order).map(|chunk| ScoredChunk {
                chunk: chunk.clone(),
                score,
            })
        })
        .collect();

    debug!(
        "Retrieved {} of {} chunks for topic {:?}",
        chunks.len(),
        index.len(),
        query.topic
    );
    Ok(RetrievedContext { chunks })
}

/// Cosine similarity; zero when either vector has no magnitude
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

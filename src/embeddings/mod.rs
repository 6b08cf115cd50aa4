// Embeddings module
// Embedding providers and the embedding cache shared between pipeline runs

pub mod cache;
pub mod hashing;
pub mod ollama;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;

pub use cache::EmbeddingCache;
pub use hashing::HashingEmbedder;
pub use ollama::OllamaClient;

/// Which embedding backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Deterministic local feature hashing, no external service needed
    Hashing,
    /// Embeddings from the configured Ollama server
    Ollama,
}

impl fmt::Display for EmbeddingProvider {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hashing => f.write_str("hashing"),
            Self::Ollama => f.write_str("ollama"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    /// Vector size produced by the hashing embedder
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hashing,
            dimension: 384,
        }
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("Embedding provider returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Turns text into vectors. One embedder is used for the whole lifetime of an index.
pub trait Embedder: Send + Sync {
    /// Identifier used to namespace cached embeddings
    fn name(&self) -> &str;

    /// Embed every text, returning one vector per input in input order
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Build the embedder selected in the configuration
#[inline]
pub fn embedder_from_config(config: &Config) -> anyhow::Result<Arc<dyn Embedder>> {
    Ok(match config.embedding.provider {
        EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::new(config.embedding.dimension)),
        EmbeddingProvider::Ollama => Arc::new(OllamaClient::new(&config.ollama)?),
    })
}

use std::fmt;
use thiserror::Error;

use crate::builder::BuildError;
use crate::chunking::ChunkError;
use crate::embeddings::EmbeddingError;
use crate::generation::GenerationError;
use crate::loader::LoadError;
use crate::prompt::PromptError;
use crate::retrieval::RetrievalError;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Load,
    Chunk,
    Index,
    Retrieve,
    Prompt,
    Generate,
    Build,
}

impl Stage {
    pub const ALL: [Self; 7] = [
        Self::Load,
        Self::Chunk,
        Self::Index,
        Self::Retrieve,
        Self::Prompt,
        Self::Generate,
        Self::Build,
    ];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Chunk => "chunk",
            Self::Index => "index",
            Self::Retrieve => "retrieve",
            Self::Prompt => "prompt",
            Self::Generate => "generate",
            Self::Build => "build",
        }
    }

    #[inline]
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    #[inline]
    pub(crate) fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .unwrap_or(Self::Build)
    }
}

impl fmt::Display for Stage {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse grouping callers use to decide what to do about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself is bad; retrying will not help
    Input,
    /// Worth retrying later
    Transient,
    /// The model answered but the answer is unusable
    Semantic,
    /// A bug or broken invariant
    Internal,
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StageError {
    #[inline]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Load(LoadError::LoadIo { .. }) => ErrorClass::Transient,
            Self::Load(_) | Self::Chunk(_) | Self::Prompt(_) => ErrorClass::Input,
            Self::Retrieval(RetrievalError::EmptyIndex | RetrievalError::InvalidQuery { .. }) => {
                ErrorClass::Input
            }
            Self::Retrieval(RetrievalError::Embedding(EmbeddingError::Provider { .. })) => {
                ErrorClass::Transient
            }
            Self::Retrieval(RetrievalError::Embedding(_)) | Self::Internal(_) => ErrorClass::Internal,
            Self::Generation(GenerationError::Timeout { .. } | GenerationError::Io { .. }) | Self::Cancelled => {
                ErrorClass::Transient
            }
            Self::Generation(GenerationError::Refusal { .. }) | Self::Build(_) => ErrorClass::Semantic,
        }
    }
}

/// A failed run: which stage failed and why
#[derive(Debug, Error)]
#[error("{stage} stage failed: {kind}")]
pub struct PipelineError {
    pub stage: Stage,
    pub kind: StageError,
}

impl PipelineError {
    #[inline]
    pub fn new(stage: Stage, kind: impl Into<StageError>) -> Self {
        Self {
            stage,
            kind: kind.into(),
        }
    }

    #[inline]
    pub fn cancelled(stage: Stage) -> Self {
        Self {
            stage,
            kind: StageError::Cancelled,
        }
    }

    #[inline]
    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, StageError::Cancelled)
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorksheetError>;

#[derive(Error, Debug)]
pub enum WorksheetError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] pipeline::PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod builder;
pub mod chunking;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod generation;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod retrieval;

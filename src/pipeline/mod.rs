// Pipeline module
// Runs Load -> Chunk -> Index -> Retrieve -> Prompt -> Generate -> Build

pub mod errors;

#[cfg(test)]
mod tests;

use anyhow::Context;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::builder::{Artifact, build};
use crate::chunking::{ChunkingConfig, chunk_documents};
use crate::config::Config;
use crate::embeddings::{Embedder, EmbeddingCache, embedder_from_config};
use crate::generation::{GenerationConfig, Generator, LanguageModel, OllamaCompletionClient};
use crate::loader::{DocumentLoader, Source};
use crate::prompt::{PromptConfig, TaskParams, build_request};
use crate::retrieval::{Indexer, RetrievalConfig, RetrievalQuery, retrieve};

pub use errors::{ErrorClass, PipelineError, Stage, StageError};

/// The document-to-artifact pipeline.
///
/// One `Pipeline` serves any number of concurrent runs. Runs share the
/// embedder, the language model and the embedding cache; everything else,
/// including the generation memo, belongs to a single run.
pub struct Pipeline {
    loader: DocumentLoader,
    chunking: ChunkingConfig,
    retrieval: RetrievalConfig,
    prompt: PromptConfig,
    generation: GenerationConfig,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn LanguageModel>,
    cache: Arc<EmbeddingCache>,
}

impl std::fmt::Debug for Pipeline {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("chunking", &self.chunking)
            .field("retrieval", &self.retrieval)
            .field("prompt", &self.prompt)
            .field("generation", &self.generation)
            .field("embedder", &self.embedder.name())
            .field("cached_embeddings", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    #[inline]
    pub fn new(config: &Config, embedder: Arc<dyn Embedder>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            loader: DocumentLoader::new(config.loader.clone()),
            chunking: config.chunking.clone(),
            retrieval: config.retrieval.clone(),
            prompt: config.prompt.clone(),
            generation: config.generation.clone(),
            embedder,
            model,
            cache: Arc::new(EmbeddingCache::new()),
        }
    }

    /// Build a pipeline backed by the configured embedder and Ollama completions
    #[inline]
    pub fn from_config(config: &Config, api_key: Option<String>) -> anyhow::Result<Self> {
        let embedder = embedder_from_config(config).context("Failed to create embedder")?;
        let model = OllamaCompletionClient::new(&config.ollama)
            .context("Failed to create completion client")?
            .with_api_key(api_key);
        Ok(Self::new(config, embedder, Arc::new(model)))
    }

    /// Share an existing embedding cache
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = cache;
        self
    }

    #[inline]
    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    /// Produce an artifact from `sources`
    #[inline]
    pub async fn run(&self, sources: &[Source], params: &TaskParams) -> Result<Artifact, PipelineError> {
        let stage = AtomicU8::new(Stage::Load.as_u8());
        self.execute(sources, params, &stage).await
    }

    /// Like [`Pipeline::run`], but gives up as soon as `cancel` completes.
    ///
    /// The in-flight stage is dropped, including any pending model call or
    /// retry backoff, and the error names the stage that was running.
    #[inline]
    pub async fn run_with_cancel<F>(
        &self,
        sources: &[Source],
        params: &TaskParams,
        cancel: F,
    ) -> Result<Artifact, PipelineError>
    where
        F: Future<Output = ()> + Send,
    {
        let stage = AtomicU8::new(Stage::Load.as_u8());
        tokio::select! {
            biased;
            () = cancel => {
                let stage = Stage::from_u8(stage.load(Ordering::SeqCst));
                warn!("Run cancelled during {} stage", stage);
                Err(PipelineError::cancelled(stage))
            }
            result = self.execute(sources, params, &stage) => result,
        }
    }

    async fn execute(
        &self,
        sources: &[Source],
        params: &TaskParams,
        stage: &AtomicU8,
    ) -> Result<Artifact, PipelineError> {
        let started = Instant::now();
        info!(
            "Generating {} {} about {:?} from {} sources",
            params.count,
            params.kind,
            params.subject,
            sources.len()
        );

        enter(stage, Stage::Load);
        let documents = self
            .loader
            .load_all(sources)
            .await
            .map_err(|e| PipelineError::new(Stage::Load, e))?;

        enter(stage, Stage::Chunk);
        let chunking = self.chunking.clone();
        let chunks = tokio::task::spawn_blocking(move || chunk_documents(&documents, &chunking))
            .await
            .map_err(|e| internal(Stage::Chunk, &e))?
            .map_err(|e| PipelineError::new(Stage::Chunk, e))?;

        enter(stage, Stage::Index);
        let indexer = Indexer::new(Arc::clone(&self.embedder), Arc::clone(&self.cache));
        let index = tokio::task::spawn_blocking(move || indexer.index(chunks))
            .await
            .map_err(|e| internal(Stage::Index, &e))?
            .map_err(|e| PipelineError::new(Stage::Index, e))?;

        enter(stage, Stage::Retrieve);
        let query = RetrievalQuery::new(params.subject.clone(), self.retrieval.top_k);
        let context = tokio::task::spawn_blocking(move || retrieve(&query, &index))
            .await
            .map_err(|e| internal(Stage::Retrieve, &e))?
            .map_err(|e| PipelineError::new(Stage::Retrieve, e))?;

        enter(stage, Stage::Prompt);
        let request =
            build_request(context, params, &self.prompt).map_err(|e| PipelineError::new(Stage::Prompt, e))?;

        enter(stage, Stage::Generate);
        let generator = Generator::new(Arc::clone(&self.model), &self.generation);
        let result = generator
            .generate(&request)
            .await
            .map_err(|e| PipelineError::new(Stage::Generate, e))?;

        enter(stage, Stage::Build);
        let artifact = build(&result, params).map_err(|e| PipelineError::new(Stage::Build, e))?;

        info!(
            "Generated {} with {} items in {:?}",
            artifact.kind(),
            artifact.item_count(),
            started.elapsed()
        );
        Ok(artifact)
    }
}

fn enter(current: &AtomicU8, stage: Stage) {
    current.store(stage.as_u8(), Ordering::SeqCst);
    debug!("Entering {} stage", stage);
}

fn internal(stage: Stage, error: &tokio::task::JoinError) -> PipelineError {
    PipelineError::new(stage, StageError::Internal(format!("worker task failed: {error}")))
}

// Generation module
// The single boundary between the pipeline and the language model

pub mod ollama;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::prompt::{GenerationRequest, TaskParams};

pub use ollama::OllamaCompletionClient;

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Openings that mark a completion as a refusal when no JSON follows
const REFUSAL_PREFIXES: &[&str] = &[
    "i'm sorry",
    "i am sorry",
    "sorry, i",
    "i cannot",
    "i can't",
    "i can not",
    "i'm unable",
    "i am unable",
    "i won't",
    "as an ai",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Per-attempt deadline for a model call
    pub timeout_seconds: u64,
    /// Total attempts for timed-out calls
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for GenerationConfig {
    #[inline]
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            max_attempts: 3,
            backoff_base_ms: 1000,
        }
    }
}

/// Failure of one model call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("model call timed out")]
    Timeout,

    #[error("model refused: {0}")]
    Refusal(String),

    #[error("model call failed: {0}")]
    Io(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Model call timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("Model refused the request: {reason}")]
    Refusal { reason: String },

    #[error("Model call failed after {attempts} attempts: {message}")]
    Io { attempts: u32, message: String },
}

/// A text-completion backend
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete `prompt`; implementations should give up after `timeout`
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, CompletionError>;
}

/// Raw model output, not yet validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub text: String,
    /// Model calls made for this result; zero when served from the memo
    pub attempts: u32,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MemoKey {
    context_digest: String,
    params: TaskParams,
}

/// Calls the language model with timeout, bounded retry and per-run memoization
pub struct Generator {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
    max_attempts: u32,
    backoff_base_ms: u64,
    memo: Mutex<HashMap<MemoKey, String>>,
}

impl std::fmt::Debug for Generator {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .finish_non_exhaustive()
    }
}

impl Generator {
    #[inline]
    pub fn new(model: Arc<dyn LanguageModel>, config: &GenerationConfig) -> Self {
        Self {
            model,
            timeout: Duration::from_secs(config.timeout_seconds),
            max_attempts: config.max_attempts.max(1),
            backoff_base_ms: config.backoff_base_ms,
            memo: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Produce raw text for `request`.
    ///
    /// Timeouts are retried up to the attempt limit with exponential backoff,
    /// transport failures are retried once and refusals are never retried.
    #[inline]
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, GenerationError> {
        let key = MemoKey {
            context_digest: request.context_digest.clone(),
            params: request.task_params.clone(),
        };

        if let Some(text) = self.memoized(&key) {
            debug!("Serving {} generation from memo", request.task_params.kind);
            return Ok(GenerationResult {
                text,
                attempts: 0,
                cached: true,
            });
        }

        let mut attempts = 0;
        let mut io_failures = 0;
        loop {
            attempts += 1;
            debug!("Model call attempt {}/{}", attempts, self.max_attempts);

            let outcome = tokio::time::timeout(self.timeout, self.model.complete(&request.prompt, self.timeout))
                .await
                .unwrap_or(Err(CompletionError::Timeout));

            match outcome {
                Ok(text) => {
                    if let Some(reason) = detect_refusal(&text) {
                        warn!("Model refused the request: {}", reason);
                        return Err(GenerationError::Refusal { reason });
                    }
                    info!("Model call succeeded on attempt {}", attempts);
                    let text = self.remember(key, text);
                    return Ok(GenerationResult {
                        text,
                        attempts,
                        cached: false,
                    });
                }
                Err(CompletionError::Refusal(reason)) => {
                    warn!("Model refused the request: {}", reason);
                    return Err(GenerationError::Refusal { reason });
                }
                Err(CompletionError::Timeout) => {
                    if attempts >= self.max_attempts {
                        warn!("Model call timed out {} times, giving up", attempts);
                        return Err(GenerationError::Timeout { attempts });
                    }
                    warn!(
                        "Model call timed out after {:?}, attempt {}/{}",
                        self.timeout, attempts, self.max_attempts
                    );
                }
                Err(CompletionError::Io(message)) => {
                    io_failures += 1;
                    if io_failures > 1 {
                        warn!("Model call failed: {}", message);
                        return Err(GenerationError::Io { attempts, message });
                    }
                    warn!("Model call failed: {}, retrying once", message);
                }
            }

            let delay = self.backoff(attempts);
            debug!("Waiting {:?} before retry", delay);
            tokio::time::sleep(delay).await;
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }

    fn memoized(&self, key: &MemoKey) -> Option<String> {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Insert unless another call already stored a result; returns the stored text
    fn remember(&self, key: MemoKey, text: String) -> String {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert(text)
            .clone()
    }
}

/// Reason text when a completion reads as a refusal rather than an answer
#[inline]
pub fn detect_refusal(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.contains('{') || trimmed.contains('[') {
        return None;
    }

    let lowered = trimmed.replace('\u{2019}', "'").to_lowercase();
    REFUSAL_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
        .then(|| trimmed.lines().next().unwrap_or_default().chars().take(200).collect())
}


use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{CompletionError, LanguageModel};
use crate::config::OllamaConfig;

/// Completion client for Ollama's `/api/generate`.
///
/// Calls are plain futures, so dropping one (on timeout or cancellation)
/// closes the underlying connection.
#[derive(Debug, Clone)]
pub struct OllamaCompletionClient {
    client: reqwest::Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaCompletionClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> anyhow::Result<Self> {
        let endpoint = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?
            .join("/api/generate")
            .context("Failed to build generate URL")?;

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            model: config.completion_model.clone(),
            api_key: None,
        })
    }

    /// Send `Authorization: Bearer <key>` with every call
    #[inline]
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }
}

fn classify(error: &reqwest::Error) -> CompletionError {
    if error.is_timeout() {
        CompletionError::Timeout
    } else {
        CompletionError::Io(error.to_string())
    }
}

fn status_error(status: StatusCode) -> CompletionError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CompletionError::Io(format!("authentication rejected (HTTP {})", status.as_u16()))
        }
        other => CompletionError::Io(format!("HTTP {}", other.as_u16())),
    }
}

#[async_trait]
impl LanguageModel for OllamaCompletionClient {
    #[inline]
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, CompletionError> {
        let mut request = self
            .client
            .post(self.endpoint.as_str())
            .timeout(timeout)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
                format: "json",
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| classify(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        let text = response.text().await.map_err(|e| classify(&e))?;
        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| CompletionError::Io(format!("invalid response from Ollama: {e}")))?;

        debug!(
            "Ollama returned {} characters from {}",
            parsed.response.len(),
            self.model
        );
        Ok(parsed.response)
    }
}

// Document loader module
// Turns paths, uploaded bytes and URLs into normalized plain-text documents

pub mod extractor;


use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use self::extractor::{DocumentFormat, detect_format, extract_text};
use crate::models::{Document, Metadata};

/// Configuration for document loading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Timeout for fetching a URL source, in seconds
    pub url_timeout_seconds: u64,
    /// User agent sent with URL requests
    pub user_agent: String,
    /// Largest document accepted from any source
    pub max_document_bytes: u64,
}

impl Default for LoaderConfig {
    #[inline]
    fn default() -> Self {
        Self {
            url_timeout_seconds: 10,
            user_agent: concat!("worksheet-rag/", env!("CARGO_PKG_VERSION")).to_string(),
            max_document_bytes: 25 * 1024 * 1024,
        }
    }
}

/// An input the pipeline can turn into a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A file on the local filesystem
    Path(PathBuf),
    /// Uploaded content together with its original file name
    Bytes { name: String, content: Vec<u8> },
    /// A remote document fetched over HTTP(S)
    Url(String),
}

impl Source {
    /// Build a source from a `kind` and `value` pair supplied by a caller
    #[inline]
    pub fn from_descriptor(kind: &str, value: &str) -> Result<Self, LoadError> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "path" | "file" => Ok(Self::Path(PathBuf::from(value))),
            "url" => Ok(Self::Url(value.to_string())),
            "text" => Ok(Self::Bytes {
                name: "inline.txt".to_string(),
                content: value.as_bytes().to_vec(),
            }),
            other => Err(LoadError::UnsupportedSourceKind {
                kind: other.to_string(),
            }),
        }
    }

    /// Parse a `kind:value` descriptor such as `url:https://example.com/notes.html`
    #[inline]
    pub fn parse_descriptor(descriptor: &str) -> Result<Self, LoadError> {
        match descriptor.split_once(':') {
            Some((kind, value)) => Self::from_descriptor(kind, value),
            None => Err(LoadError::UnsupportedSourceKind {
                kind: descriptor.to_string(),
            }),
        }
    }

    /// Human readable identifier recorded as the document's `source_uri`
    #[inline]
    pub fn uri(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes { name, .. } => name.clone(),
            Self::Url(url) => url.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Unsupported source kind: {kind}")]
    UnsupportedSourceKind { kind: String },

    #[error("Invalid source {source_uri}: {message}")]
    InvalidSource { source_uri: String, message: String },

    #[error("Failed to read {source_uri}: {message}")]
    LoadIo { source_uri: String, message: String },

    #[error("Failed to extract text from {source_uri}: {message}")]
    Extraction { source_uri: String, message: String },

    #[error("Document {source_uri} contains no text")]
    EmptyDocument { source_uri: String },

    #[error("No sources were provided")]
    NoSources,
}

/// Raw bytes plus the hints used to detect their format
struct FetchedContent {
    bytes: Vec<u8>,
    extension: Option<String>,
    content_type: Option<String>,
}

/// Loads sources into normalized documents
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    config: LoaderConfig,
    agent: ureq::Agent,
}

impl DocumentLoader {
    #[inline]
    pub fn new(config: LoaderConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.url_timeout_seconds)))
            .build()
            .into();

        Self { config, agent }
    }

    /// Load every source, returning documents in the same order as the input
    #[inline]
    pub async fn load_all(&self, sources: &[Source]) -> Result<Vec<Document>, LoadError> {
        if sources.is_empty() {
            return Err(LoadError::NoSources);
        }

        let documents =
            futures::future::try_join_all(sources.iter().map(|source| self.load(source))).await?;

        info!("Loaded {} documents", documents.len());
        Ok(documents)
    }

    /// Load a single source into a document
    #[inline]
    pub async fn load(&self, source: &Source) -> Result<Document, LoadError> {
        let source_uri = source.uri();
        debug!("Loading source {}", source_uri);

        let mut metadata = Metadata::new();
        let fetched = match source {
            Source::Path(path) => self.read_path(path, &source_uri).await?,
            Source::Bytes { name, content } => {
                self.check_size(content.len() as u64, &source_uri)?;
                metadata.insert("filename".to_string(), name.clone());
                FetchedContent {
                    bytes: content.clone(),
                    extension: extension_of(Path::new(name)),
                    content_type: None,
                }
            }
            Source::Url(url) => self.fetch_url(url, &source_uri).await?,
        };

        let format = detect_format(
            fetched.extension.as_deref(),
            fetched.content_type.as_deref(),
            &fetched.bytes,
        )
        .ok_or_else(|| LoadError::UnsupportedSourceKind {
            kind: match &fetched.extension {
                Some(extension) => format!("file type '.{}' ({})", extension, source_uri),
                None => format!("unrecognized content ({})", source_uri),
            },
        })?;

        let bytes = fetched.bytes;
        let extracted = tokio::task::spawn_blocking(move || extract_text(format, &bytes))
            .await
            .map_err(|e| LoadError::Extraction {
                source_uri: source_uri.clone(),
                message: format!("extractor aborted: {}", e),
            })?
            .map_err(|e| LoadError::Extraction {
                source_uri: source_uri.clone(),
                message: format!("{:#}", e),
            })?;

        if extracted.text.trim().is_empty() {
            warn!("Source {} produced no text", source_uri);
            return Err(LoadError::EmptyDocument { source_uri });
        }

        metadata.insert("source".to_string(), source_uri.clone());
        metadata.insert("format".to_string(), format.as_str().to_string());
        if let Some(content_type) = fetched.content_type {
            metadata.insert("content_type".to_string(), content_type);
        }
        if let Some(title) = extracted.title {
            metadata.insert("title".to_string(), title);
        }

        let document =
            Document::new(source_uri, extracted.text, metadata).with_pages(extracted.pages);
        debug!(
            "Loaded document {} ({} chars, {} pages, format {})",
            document.id,
            document.char_len(),
            document.pages.len(),
            format
        );
        Ok(document)
    }

    async fn read_path(&self, path: &Path, source_uri: &str) -> Result<FetchedContent, LoadError> {
        let io_error = |e: std::io::Error| LoadError::LoadIo {
            source_uri: source_uri.to_string(),
            message: e.to_string(),
        };

        let file_metadata = tokio::fs::metadata(path).await.map_err(io_error)?;
        if !file_metadata.is_file() {
            return Err(LoadError::LoadIo {
                source_uri: source_uri.to_string(),
                message: "not a regular file".to_string(),
            });
        }
        self.check_size(file_metadata.len(), source_uri)?;

        let bytes = tokio::fs::read(path).await.map_err(io_error)?;

        Ok(FetchedContent {
            bytes,
            extension: extension_of(path),
            content_type: None,
        })
    }

    async fn fetch_url(&self, url: &str, source_uri: &str) -> Result<FetchedContent, LoadError> {
        let parsed = validate_url(url, source_uri)?;

        let agent = self.agent.clone();
        let user_agent = self.config.user_agent.clone();
        let limit = self.config.max_document_bytes;
        let target = parsed.to_string();

        debug!("Fetching {}", target);
        let (bytes, content_type) =
            tokio::task::spawn_blocking(move || http_get(&agent, &target, &user_agent, limit))
                .await
                .map_err(|e| LoadError::LoadIo {
                    source_uri: source_uri.to_string(),
                    message: format!("fetch aborted: {}", e),
                })?
                .map_err(|message| LoadError::LoadIo {
                    source_uri: source_uri.to_string(),
                    message,
                })?;

        debug!("Fetched {} bytes from {}", bytes.len(), source_uri);

        let extension = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|last| extension_of(Path::new(last)))
            .filter(|extension| DocumentFormat::from_extension(extension).is_some());

        Ok(FetchedContent {
            bytes,
            extension,
            content_type,
        })
    }

    fn check_size(&self, len: u64, source_uri: &str) -> Result<(), LoadError> {
        if len > self.config.max_document_bytes {
            return Err(LoadError::LoadIo {
                source_uri: source_uri.to_string(),
                message: format!(
                    "document is {} bytes, limit is {}",
                    len, self.config.max_document_bytes
                ),
            });
        }
        Ok(())
    }
}

impl Default for DocumentLoader {
    #[inline]
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}

/// Validate a URL source: it must parse and use HTTP or HTTPS
fn validate_url(url: &str, source_uri: &str) -> Result<Url, LoadError> {
    let parsed = Url::parse(url).map_err(|e| LoadError::InvalidSource {
        source_uri: source_uri.to_string(),
        message: format!("invalid URL: {}", e),
    })?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(LoadError::UnsupportedSourceKind {
            kind: format!("{} URL", parsed.scheme()),
        });
    }

    if parsed.host_str().is_none() {
        return Err(LoadError::InvalidSource {
            source_uri: source_uri.to_string(),
            message: "URL must have a host".to_string(),
        });
    }

    Ok(parsed)
}

/// Blocking HTTP GET returning the body and its content type
fn http_get(
    agent: &ureq::Agent,
    url: &str,
    user_agent: &str,
    limit: u64,
) -> Result<(Vec<u8>, Option<String>), String> {
    match agent.get(url).header("User-Agent", user_agent).call() {
        Ok(mut response) => {
            let content_type = response
                .headers()
                .get("content-type")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let bytes = response
                .body_mut()
                .with_config()
                .limit(limit)
                .read_to_vec()
                .map_err(|e| format!("failed to read response body: {}", e))?;
            Ok((bytes, content_type))
        }
        Err(ureq::Error::StatusCode(status)) => Err(format!("HTTP error {}", status)),
        Err(e) => Err(format!("request failed: {}", e)),
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase)
}

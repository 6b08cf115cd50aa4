use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::builder::Artifact;
use crate::config::Config;
use crate::embeddings::{EmbeddingProvider, OllamaClient};
use crate::loader::Source;
use crate::pipeline::Pipeline;
use crate::prompt::TaskParams;

/// Environment variable holding the credential for the completion endpoint
pub const API_KEY_ENV: &str = "WORKSHEET_RAG_API_KEY";

/// Options for a single `generate` invocation
#[derive(Debug, Clone)]
pub struct GenerateOptions<'a> {
    pub sources: &'a [String],
    pub kind: &'a str,
    pub count: usize,
    pub difficulty: &'a str,
    pub subject: &'a str,
    pub output: Option<&'a Path>,
}

/// Parse `kind:value` descriptors given on the command line
#[inline]
pub fn parse_sources(descriptors: &[String]) -> Result<Vec<Source>> {
    descriptors
        .iter()
        .map(|descriptor| {
            Source::parse_descriptor(descriptor).with_context(|| format!("Invalid source {descriptor:?}"))
        })
        .collect()
}

/// Run the pipeline once and print the artifact as pretty JSON
#[inline]
pub async fn generate_artifact(options: &GenerateOptions<'_>) -> Result<()> {
    let config = Config::load()?;
    config.validate().context("Invalid configuration")?;

    let params = TaskParams::new(options.kind, options.count, options.difficulty, options.subject)?;
    params.validate(&config.prompt)?;
    let sources = parse_sources(options.sources)?;

    if config.embedding.provider == EmbeddingProvider::Ollama {
        check_ollama(&config)?;
    }

    let api_key = std::env::var(API_KEY_ENV).ok();
    let pipeline = Pipeline::from_config(&config, api_key)?;

    let bar = if console::user_attended_stderr() {
        let bar = ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg} [{elapsed}]").expect("style template is valid"),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(format!(
        "Generating {} {} about {}",
        params.count, params.kind, params.subject
    ));

    let outcome = pipeline.run(&sources, &params).await;
    bar.finish_and_clear();

    let artifact = match outcome {
        Ok(artifact) => artifact,
        Err(e) => {
            eprintln!(
                "{} {} ({:?})",
                style("✗ Generation failed:").red().bold(),
                e,
                e.class()
            );
            return Err(e.into());
        }
    };

    let json = render_artifact(&artifact)?;
    match options.output {
        Some(path) => {
            std::fs::write(path, format!("{json}\n"))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "{} {} with {} items written to {}",
                style("✓").green(),
                artifact.kind(),
                artifact.item_count(),
                style(path.display()).cyan()
            );
        }
        None => println!("{json}"),
    }

    info!("Finished generating {}", artifact.kind());
    Ok(())
}

#[inline]
pub fn render_artifact(artifact: &Artifact) -> Result<String> {
    serde_json::to_string_pretty(artifact).context("Failed to serialize artifact")
}

/// Report whether the configured Ollama instance is reachable
#[inline]
pub fn show_status() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("📊 Worksheet RAG Status");
    println!("{}", "=".repeat(40));
    println!();

    println!("🤖 Ollama:");
    match config.ollama.ollama_url() {
        Ok(url) => println!("   URL: {url}"),
        Err(e) => println!("   ❌ Invalid URL - {e}"),
    }
    println!("   Completion model: {}", config.ollama.completion_model);
    match check_ollama(&config) {
        Ok(()) => println!("   ✅ Connected"),
        Err(e) => println!("   ❌ Unreachable - {e:#}"),
    }

    println!();
    println!("🔢 Embeddings: {} ({} dimensions)", config.embedding.provider, config.embedding.dimension);
    if config.embedding.provider == EmbeddingProvider::Ollama {
        println!("   Model: {}", config.ollama.embedding_model);
    }

    println!();
    println!("⚙️  Pipeline:");
    println!(
        "   Chunks: {} characters, {} overlap",
        config.chunking.chunk_size, config.chunking.overlap
    );
    println!("   Top-K: {}", config.retrieval.top_k);
    println!(
        "   Generation: {}s timeout, {} attempts",
        config.generation.timeout_seconds, config.generation.max_attempts
    );

    if std::env::var(API_KEY_ENV).is_err() {
        println!();
        println!("   No {API_KEY_ENV} set; requests are sent without credentials");
    }

    Ok(())
}

fn check_ollama(config: &Config) -> Result<()> {
    let client = OllamaClient::new(&config.ollama)?.with_retry_attempts(1);
    client.health_check().inspect_err(|e| {
        warn!("Ollama health check failed: {:#}", e);
    })
}

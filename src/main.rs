use clap::{Parser, Subcommand};
use std::path::PathBuf;
use worksheet_rag::Result;
use worksheet_rag::commands::{GenerateOptions, generate_artifact, show_status};
use worksheet_rag::config::{run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "worksheet-rag")]
#[command(about = "Generate quizzes and worksheets grounded in your own documents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and pipeline settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Generate a quiz or worksheet from one or more documents
    Generate {
        /// Document to draw from, as kind:value (path:notes.pdf, url:https://..., text:...)
        #[arg(long = "source", required = true)]
        sources: Vec<String>,
        /// Artifact to produce: quiz or worksheet
        #[arg(long, default_value = "quiz")]
        kind: String,
        /// Number of items to produce
        #[arg(long, default_value_t = 5)]
        count: usize,
        /// easy, medium or hard
        #[arg(long, default_value = "medium")]
        difficulty: String,
        /// Topic the items should cover
        #[arg(long)]
        subject: String,
        /// Write the artifact to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Check connectivity and show effective pipeline settings
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Generate {
            sources,
            kind,
            count,
            difficulty,
            subject,
            output,
        } => {
            generate_artifact(&GenerateOptions {
                sources: &sources,
                kind: &kind,
                count,
                difficulty: &difficulty,
                subject: &subject,
                output: output.as_deref(),
            })
            .await?;
        }
        Commands::Status => {
            show_status()?;
        }
    }

    Ok(())
}

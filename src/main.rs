//! # Claimcheck CLI
//!
//! The `claimcheck` binary drives the fact-check pipeline: store
//! initialization, document ingestion, similarity queries, verdict
//! generation, and the HTTP API server.
//!
//! ## Usage
//!
//! ```bash
//! claimcheck --config ./config/claimcheck.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `claimcheck init` | Create the SQLite vector store and schema |
//! | `claimcheck ingest <file>` | Ingest a single document |
//! | `claimcheck ingest-dir [dir]` | Ingest every supported file in a directory |
//! | `claimcheck query "<text>"` | Show the most similar chunks with confidence |
//! | `claimcheck fact-check "<text>"` | Retrieve context and generate a verdict |
//! | `claimcheck stats` | Show vector store statistics |
//! | `claimcheck files` | List ingested source files with chunk counts |
//! | `claimcheck delete <file>` | Remove a source file's chunks |
//! | `claimcheck clear` | Drop every stored chunk |
//! | `claimcheck serve` | Start the HTTP API server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use claimcheck::{config, factcheck, ingest, retrieval, server, store};

/// Claimcheck — a retrieval-augmented fact-checking service.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/claimcheck.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "claimcheck",
    about = "Claimcheck — a retrieval-augmented fact-checking service",
    version,
    long_about = "Claimcheck ingests reference documents into a local SQLite vector store and \
    answers fact-check queries by retrieving the most similar chunks and asking an LLM for a \
    structured verdict over that evidence. It exposes both a CLI and an HTTP API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/claimcheck.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the vector store schema.
    ///
    /// Creates the SQLite database file and the chunk and collection tables.
    /// This command is idempotent, running it multiple times is safe.
    Init,

    /// Ingest a single document.
    ///
    /// Extracts text, chunks it, embeds the chunks, and stores them.
    /// Requires `OPENAI_API_KEY`.
    Ingest {
        /// Path to a supported document (txt, pdf, docx, csv).
        file: PathBuf,

        /// URL of the original document, attached to every chunk.
        #[arg(long)]
        source_url: Option<String>,
    },

    /// Ingest every supported file in a directory.
    ///
    /// Files are processed concurrently; per-file failures are reported at
    /// the end without aborting the run.
    IngestDir {
        /// Directory to scan. Defaults to `[documents].dir` from config.
        dir: Option<PathBuf>,
    },

    /// Show the chunks most similar to a query.
    Query {
        /// The query text.
        text: String,

        /// Number of results to return.
        #[arg(short, long, default_value_t = 5)]
        n_results: usize,
    },

    /// Retrieve context and generate a fact-check verdict.
    FactCheck {
        /// The claim to check.
        text: String,

        /// Number of context chunks to retrieve.
        #[arg(short, long, default_value_t = 5)]
        n_results: usize,
    },

    /// Show vector store statistics.
    Stats,

    /// List ingested source files with chunk counts.
    Files,

    /// Remove every chunk belonging to a source file.
    Delete {
        /// Exact source file name as stored (e.g. `facts.txt`).
        file: String,
    },

    /// Drop every stored chunk and reset the collection.
    Clear,

    /// Start the HTTP API server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("claimcheck=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            store::run_init(&cfg).await?;
        }
        Commands::Ingest { file, source_url } => {
            ingest::run_ingest_file(&cfg, &file, source_url.as_deref().unwrap_or("")).await?;
        }
        Commands::IngestDir { dir } => {
            let dir = dir.unwrap_or_else(|| cfg.documents.dir.clone());
            ingest::run_ingest_dir(&cfg, &dir).await?;
        }
        Commands::Query { text, n_results } => {
            retrieval::run_query(&cfg, &text, n_results).await?;
        }
        Commands::FactCheck { text, n_results } => {
            factcheck::run_fact_check(&cfg, &text, n_results).await?;
        }
        Commands::Stats => {
            store::run_stats(&cfg).await?;
        }
        Commands::Files => {
            store::run_files(&cfg).await?;
        }
        Commands::Delete { file } => {
            store::run_delete(&cfg, &file).await?;
        }
        Commands::Clear => {
            store::run_clear(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

//! # docqa CLI
//!
//! The `docqa` binary is the primary interface for the question answering
//! engine. It provides commands for initialization, page ingestion,
//! retrieval inspection, one-shot question answering, and starting the
//! HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Write a starter config and create the storage files |
//! | `docqa ingest [page-id]` | Fetch, chunk, embed, and index a source page |
//! | `docqa search "<query>"` | Run fused retrieval and print scored results |
//! | `docqa ask "<question>"` | Answer a question from the indexed documents |
//! | `docqa stats` | Print index statistics |
//! | `docqa clear` | Delete every indexed document |
//! | `docqa serve` | Start the JSON HTTP server |

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docqa::config;
use docqa::pipeline::RagEngine;
use docqa::query::QueryProcessor;
use docqa::server;

const DEFAULT_CONFIG: &str = r#"# docqa configuration

[storage]
metadata_path = "./data/docqa.db"
vector_path = "./data/vectors.bin"

[chunking]
max_chars = 500
overlap_chars = 50

[retrieval]
top_k = 5
base_threshold = 0.3
dynamic_threshold = true

[conversation]
timeout_minutes = 30
max_history = 20

[embedding]
# "hash" needs no credentials; "openai" reads OPENAI_API_KEY.
provider = "hash"
dims = 384

[answer]
# "extractive" needs no credentials; "openai" reads OPENAI_API_KEY.
provider = "extractive"
model = "gpt-4o-mini"

[source]
base_url = "https://api.notion.com/v1"
# token = "..."            # or set NOTION_TOKEN
# page_id = "..."          # default page for `docqa ingest`

[server]
bind = "127.0.0.1:7431"
# webhook_secret = "..."   # required for POST /webhook
"#;

/// docqa — retrieval-augmented question answering over a personal
/// document collection.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. `docqa init` writes a commented starter config.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "docqa — retrieval-augmented question answering over your documents",
    version,
    long_about = "docqa ingests pages from a document source, chunks and embeds them into a \
    local vector index, and answers questions through multi-query fused retrieval with \
    conversation memory, served via a CLI and a JSON HTTP API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and storage.
    ///
    /// Writes a commented starter config (unless one already exists) and
    /// creates the metadata database and vector index file. Idempotent.
    Init,

    /// Ingest a page from the configured source.
    ///
    /// Fetches the page, cleans and chunks the text, embeds every chunk,
    /// and stores them. A page ingested before is re-indexed from scratch.
    Ingest {
        /// Source page id. Defaults to `[source].page_id` from the config.
        page_id: Option<String>,

        /// Ingest a local text file instead of a source page.
        #[arg(long, conflicts_with = "page_id")]
        file: Option<PathBuf>,
    },

    /// Run fused retrieval and print scored results.
    ///
    /// Shows the raw, recency, length, and final scores for each match,
    /// which is the quickest way to tune the retrieval settings.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to print.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Answer a question from the indexed documents.
    Ask {
        /// The question.
        question: String,
    },

    /// Print index statistics.
    Stats,

    /// Delete every indexed document and vector.
    Clear {
        /// Skip the confirmation requirement.
        #[arg(long)]
        yes: bool,
    },

    /// Start the JSON HTTP server.
    ///
    /// Binds to `[server].bind` and serves `/ask`, `/webhook`, `/health`,
    /// and `/stats` until the process is terminated.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docqa=info")),
        )
        .init();

    let cli = Cli::parse();

    // `init` runs before a config file necessarily exists.
    if let Commands::Init = cli.command {
        return run_init(&cli.config).await;
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Ingest { page_id, file } => {
            let engine = RagEngine::open(cfg).await?;
            let added = if let Some(path) = file {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let source = format!("file_{}", path.display());
                engine.ingest_text(&source, &raw).await?
            } else {
                let page_id = page_id
                    .or_else(|| engine.config().source.page_id.clone())
                    .context("no page id given and [source].page_id is not set")?;
                engine.ingest_page(&page_id).await?
            };
            println!("Ingested {} chunks.", added);
            engine.close().await;
        }
        Commands::Search { query, limit } => {
            let engine = RagEngine::open(cfg).await?;
            run_search(&engine, &query, limit).await?;
            engine.close().await;
        }
        Commands::Ask { question } => {
            let engine = RagEngine::open(cfg).await?;
            let answer = engine.answer(&question, "").await?;
            println!("{}", answer);
            engine.close().await;
        }
        Commands::Stats => {
            let engine = RagEngine::open(cfg).await?;
            print_stats(&engine).await?;
            engine.close().await;
        }
        Commands::Clear { yes } => {
            if !yes {
                anyhow::bail!("this deletes every indexed document; re-run with --yes to confirm");
            }
            let engine = RagEngine::open(cfg).await?;
            engine.store().clear().await?;
            println!("Index cleared.");
            engine.close().await;
        }
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
    }

    Ok(())
}

/// Write the starter config (if absent) and create the storage files.
async fn run_init(config_path: &PathBuf) -> anyhow::Result<()> {
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
    } else {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_path, DEFAULT_CONFIG)?;
        println!("Wrote starter config to {}", config_path.display());
    }

    let cfg = config::load_config(config_path)?;
    let engine = RagEngine::open(cfg).await?;
    println!(
        "Storage initialized ({} indexed chunks).",
        engine.store().count().await
    );
    engine.close().await;
    Ok(())
}

async fn run_search(engine: &RagEngine, query: &str, limit: usize) -> anyhow::Result<()> {
    let analysis = QueryProcessor::new().process(query);
    println!("intent: {:?}  keywords: {:?}", analysis.intent, analysis.keywords);

    let results = engine
        .fused_search(&analysis, limit)
        .await
        .map_err(anyhow::Error::from)?;

    if results.is_empty() || results[0].is_empty_corpus() {
        println!("No results.");
        return Ok(());
    }

    for (i, r) in results.iter().enumerate() {
        let preview: String = r.content.chars().take(120).collect();
        println!(
            "{:2}. final {:.3}  (raw {:.3}, recency {:.2}, length {:.2})  [{}]",
            i + 1,
            r.final_score,
            r.raw_score,
            r.recency_score,
            r.length_score,
            r.source
        );
        println!("    {}", preview);
        println!();
    }
    Ok(())
}

async fn print_stats(engine: &RagEngine) -> anyhow::Result<()> {
    let stats = engine.store().stats().await?;

    println!("docqa — Index Stats");
    println!("===================");
    println!();
    println!("  Records:      {}", stats.total_records);
    println!("  Vectors:      {}", stats.total_vectors);
    println!("  Dimensions:   {}", stats.dims);
    println!("  Avg length:   {:.0} chars", stats.avg_content_length);

    if !stats.per_source_counts.is_empty() {
        println!();
        println!("  By source:");
        let mut sources: Vec<_> = stats.per_source_counts.iter().collect();
        sources.sort_by(|a, b| b.1.cmp(a.1));
        for (source, count) in sources {
            println!("    {:40} {}", source, count);
        }
    }
    println!();
    Ok(())
}

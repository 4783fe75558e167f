//! UniMem command line
//!
//! Loads notes into an in-process engine and queries them with
//! multi-dimensional retrieval.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;
use unimem_core::utils::string::truncate_at_char_boundary;
use unimem_core::{EngineConfig, MemoryEngine};

#[derive(Parser)]
#[command(name = "unimem")]
#[command(about = "Associative memory and multi-strategy retrieval", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); UNIMEM_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Remember each non-empty line of a file, then query
    Recall {
        /// File with one note per line
        #[arg(short, long)]
        notes: PathBuf,

        /// Maximum number of results (defaults to retrieval.top_k)
        #[arg(short, long)]
        top_k: Option<usize>,

        /// Output format (text or json)
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Search query
        query: String,
    },

    /// Print the effective configuration with API keys redacted
    ShowConfig,
}

fn init_tracing(log_level: &str) {
    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::new(format!(
        "unimem={level},unimem_core={level},reqwest=warn,hyper=warn,rusqlite=warn",
        level = level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn recall(
    config: EngineConfig,
    notes: PathBuf,
    top_k: Option<usize>,
    format: &str,
    query: &str,
) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(&notes)
        .await
        .with_context(|| format!("reading notes from {}", notes.display()))?;

    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let engine = MemoryEngine::from_config(config).await?;
    debug!("Capabilities: {:?}", engine.capabilities());

    let mut remembered = 0usize;
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        engine.remember(line, Utc::now(), Vec::new()).await?;
        remembered += 1;
    }
    debug!("Remembered {} notes", remembered);

    let results = engine.multi_dimensional_retrieval(query, None, top_k).await?;
    engine.shutdown();

    if format == "json" {
        let json_results: Vec<_> = results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.memory.id.to_string(),
                    "content": r.memory.content,
                    "context": r.memory.context,
                    "keywords": r.memory.keywords,
                    "tags": r.memory.tags,
                    "links": r.memory.links,
                    "score": r.score,
                    "retrieval_method": r.retrieval_method,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::json!({
                "results": json_results,
                "count": json_results.len()
            })
        );
    } else if results.is_empty() {
        println!("No memories found matching '{}'", query);
    } else {
        println!("Found {} memories:\n", results.len());
        for (i, result) in results.iter().enumerate() {
            let memory = &result.memory;
            println!("{}. {} (score: {:.4})", i + 1, memory.id, result.score);
            println!("   Context: {}", memory.context);
            if !memory.tags.is_empty() {
                println!("   Tags: {}", memory.tags.join(", "));
            }
            println!("   Links: {}", memory.links.len());
            println!("   Content: {}\n", truncate_at_char_boundary(&memory.content, 100));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    debug!("UniMem v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Recall {
            notes,
            top_k,
            format,
            query,
        } => recall(config, notes, top_k, &format, &query).await,
        Commands::ShowConfig => {
            print!("{}", config.redacted().to_toml()?);
            Ok(())
        }
    }
}

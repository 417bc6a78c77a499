//! # AskAccess CLI (`askaccess`)
//!
//! ## Usage
//!
//! ```bash
//! askaccess --config ./config/askaccess.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askaccess init` | Create the data directory and index database |
//! | `askaccess ingest <file>` | Ingest one document (txt, md, html, pdf, csv) |
//! | `askaccess ingest-cases <json>` | Ingest a JSON array of CRM case records |
//! | `askaccess ask "<question>"` | Answer a question from the knowledge base |
//! | `askaccess logs` | Show recent query log entries |
//! | `askaccess status` | Show index counts and backend configuration |
//! | `askaccess serve` | Start the HTTP API |

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use askaccess::app::App;
use askaccess::config::load_config;
use askaccess::models::{CaseRecord, Metadata};
use askaccess::server::run_server;

const DEFAULT_LOG_FILTER: &str = "askaccess=info,tower_http=warn,sqlx=warn";

/// AskAccess: retrieval-augmented answers over your knowledge base.
#[derive(Parser)]
#[command(
    name = "askaccess",
    about = "AskAccess: answers employee and customer questions from ingested documents and CRM cases",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askaccess.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and index database.
    ///
    /// Idempotent: running it on an existing data root changes nothing.
    Init,

    /// Ingest a single file.
    Ingest {
        /// Path to the document.
        path: PathBuf,

        /// Extra metadata as a JSON object.
        #[arg(long)]
        metadata: Option<String>,

        /// Extra metadata as `key=value` pairs (applied after `--metadata`).
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },

    /// Ingest CRM case records from a JSON file (an array of cases).
    IngestCases {
        /// Path to the JSON export.
        path: PathBuf,
    },

    /// Ask a question.
    Ask {
        question: String,

        /// Number of chunks to retrieve (defaults to `[retrieval].default_k`).
        #[arg(long, short = 'k')]
        max_results: Option<usize>,

        /// Do not print the source chunks.
        #[arg(long)]
        no_sources: bool,
    },

    /// Show the most recent query log entries.
    Logs {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Show index counts and backend configuration.
    Status,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

/// Parse a `key=value` pair for `--meta` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "askaccess=debug,tower_http=debug,sqlx=warn"
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli.config)?;
    let app = Arc::new(App::from_config(config).await?);

    let result = run_command(&app, cli.command).await;
    app.close().await;
    result
}

async fn run_command(app: &Arc<App>, command: Commands) -> Result<()> {
    match command {
        Commands::Init => {
            std::fs::create_dir_all(app.config.data.uploads_dir())?;
            std::fs::create_dir_all(app.config.data.query_logs_dir())?;
            println!("Initialized index at {}", app.store.path().display());
        }
        Commands::Ingest {
            path,
            metadata,
            meta,
        } => {
            let mut fields = match metadata {
                Some(raw) => serde_json::from_str::<Metadata>(&raw)
                    .context("--metadata must be a JSON object")?,
                None => Metadata::new(),
            };
            for (k, v) in meta {
                fields.insert(k, Value::String(v));
            }
            let document_id = app.pipeline.ingest_file(&path, fields).await?;
            let record = app.store.get_record(&document_id).await?;
            println!("ingested {}", path.display());
            println!("  document_id: {}", document_id);
            if let Some(record) = record {
                println!("  chunks: {}", record.chunk_count);
            }
            println!("ok");
        }
        Commands::IngestCases { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let records: Vec<CaseRecord> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON array of case records", path.display()))?;
            let report = app.pipeline.ingest_structured_records(&records).await;
            println!("ingested cases from {}", path.display());
            println!("  documents: {}", report.document_ids.len());
            for id in &report.document_ids {
                println!("    {}", id);
            }
            println!("  failures: {}", report.failures.len());
            for f in &report.failures {
                println!("    [{}] {}", f.index, f.message);
            }
            if report.document_ids.is_empty() && !report.failures.is_empty() {
                bail!("no case records were ingested");
            }
            println!("ok");
        }
        Commands::Ask {
            question,
            max_results,
            no_sources,
        } => {
            if question.trim().is_empty() {
                bail!("question must not be empty");
            }
            let k = app.config.retrieval.resolve_k(max_results)?;
            let outcome = app.processor.process_query(&question, k, !no_sources).await;
            if let Some(error) = outcome.error {
                bail!(error);
            }
            println!("{}", outcome.answer.unwrap_or_default());
            if let Some(sources) = outcome.sources.filter(|s| !s.is_empty()) {
                println!();
                println!("Sources:");
                for (i, s) in sources.iter().enumerate() {
                    let origin = s
                        .metadata
                        .get("file_name")
                        .or_else(|| s.metadata.get("case_id"))
                        .or_else(|| s.metadata.get("source"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    println!("  {}. {}", i + 1, origin);
                }
            }
            println!();
            println!("({:.2}s)", outcome.processing_time);
        }
        Commands::Logs { limit } => {
            let logs = app.logger.get_query_logs(limit).await?;
            if logs.is_empty() {
                println!("No query logs.");
            }
            for entry in logs {
                let flag = if entry.is_error { " [error]" } else { "" };
                println!(
                    "{} ({:.2}s){} {}",
                    entry.timestamp.to_rfc3339(),
                    entry.processing_time,
                    flag,
                    entry.query
                );
                println!("  {}", entry.answer);
            }
        }
        Commands::Status => {
            let consistency = app.store.check_consistency().await?;
            println!("index: {}", app.store.path().display());
            println!("  documents: {}", app.store.document_count().await?);
            println!("  chunks: {}", app.store.chunk_count().await?);
            println!(
                "  consistent: {}",
                if consistency.is_consistent() { "yes" } else { "no" }
            );
            println!(
                "embedding: {} ({})",
                app.config.embedding.provider,
                configured(app.embedding_configured())
            );
            println!(
                "generation: {} ({})",
                app.config.generation.provider,
                configured(app.generation_configured())
            );
        }
        Commands::Serve => run_server(app.clone()).await?,
    }
    Ok(())
}

fn configured(ok: bool) -> &'static str {
    if ok {
        "configured"
    } else {
        "not configured"
    }
}

//! # mandiao CLI
//!
//! Commands for setting up the local model runtime, indexing documents,
//! and asking questions against them.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mandiao init` | Write a config template and create the database |
//! | `mandiao setup` | Install the runtime, start it, pull required models |
//! | `mandiao status` | Runtime and model status (`--json` for scripts) |
//! | `mandiao ingest <path>...` | Index PDF / text files or directories |
//! | `mandiao clear` | Drop all indexed chunks |
//! | `mandiao search "<query>"` | Show the nearest stored chunks |
//! | `mandiao ask "<query>"` | Stream an answer grounded in indexed documents |
//!
//! Logs go to stderr, filtered by `MANDIAO_LOG` (default `warn`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use mandiao::assistant::Assistant;
use mandiao::config::{self, Config};
use mandiao::progress::{ProgressMode, ProgressReporter};
use mandiao::store::VectorStore;

/// mandiao: a local retrieval-augmented assistant.
#[derive(Parser)]
#[command(
    name = "mandiao",
    about = "A local retrieval-augmented assistant",
    version,
    long_about = "mandiao installs and starts a local model runtime, indexes your documents \
    into an embedded vector store, and answers questions by streaming the model's completion \
    of a prompt augmented with the most relevant passages."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `~/.mandiao/config.toml`; built-in defaults apply when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Setup progress on stderr: `human`, `json`, or `off`.
    /// Defaults to `human` when stderr is a terminal.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config template (if missing) and create the database.
    ///
    /// Idempotent: running it again keeps the existing config and data.
    Init,

    /// Bring the runtime to a ready state.
    ///
    /// Installs the runtime if needed, starts it, and pulls every required
    /// model that is not present yet.
    Setup,

    /// Show runtime, model, and setup status.
    Status {
        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ingest files or directories (.pdf, .txt, .md).
    ///
    /// Chunks already stored are skipped, so re-ingesting is cheap.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Remove every indexed chunk.
    Clear,

    /// Show the stored chunks nearest to a query.
    Search {
        query: String,

        /// Maximum number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Answer a question using indexed documents as context.
    Ask { query: String },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("MANDIAO_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn progress_mode(arg: Option<&str>) -> Result<ProgressMode> {
    match arg {
        None => Ok(ProgressMode::default_for_tty()),
        Some("human") => Ok(ProgressMode::Human),
        Some("json") => Ok(ProgressMode::Json),
        Some("off") => Ok(ProgressMode::Off),
        Some(other) => bail!("Unknown progress mode: '{}'. Use human, json, or off.", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Init => return run_init(cli.config).await,
        other => other,
    };

    let cfg = config::resolve_config(cli.config.as_deref())?;
    let assistant = Assistant::new(cfg).await?;

    match command {
        Commands::Init => {}
        Commands::Setup => {
            let reporter: Arc<dyn ProgressReporter> =
                Arc::from(progress_mode(cli.progress.as_deref())?.reporter());
            let state = assistant.ensure_ready(reporter).await?;
            println!(
                "Runtime ready ({} model{}).",
                state.models.len(),
                if state.models.len() == 1 { "" } else { "s" }
            );
        }
        Commands::Status { json } => {
            let status = assistant.status().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("installed: {}", status.installed);
                println!("running:   {}", status.running);
                for (model, present) in &status.models_installed {
                    println!("model {}: {}", model, if *present { "installed" } else { "missing" });
                }
                println!("setup:     {} ({}%)", status.progress.stage, status.progress.percent);
                if let Some(err) = &status.error {
                    println!("error:     {}", err);
                }
                if let Some(reason) = &status.store_degraded {
                    println!("store:     degraded ({})", reason);
                }
            }
        }
        Commands::Ingest { paths } => {
            let mut total = 0;
            for path in &paths {
                let reports = assistant
                    .ingest(path)
                    .await
                    .with_context(|| format!("Failed to ingest {}", path.display()))?;
                for r in reports {
                    println!(
                        "{}: {} new chunk{} ({} already stored, {} page{})",
                        r.source,
                        r.inserted,
                        if r.inserted == 1 { "" } else { "s" },
                        r.skipped,
                        r.pages,
                        if r.pages == 1 { "" } else { "s" }
                    );
                    total += r.inserted;
                }
            }
            println!("Ingested {} new chunks.", total);
        }
        Commands::Clear => {
            assistant.clear().await?;
            println!("Vector store cleared.");
        }
        Commands::Search { query, limit } => {
            let k = limit.unwrap_or(assistant.config().retrieval.top_k);
            let results = assistant.search(&query, k).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, r) in results.iter().enumerate() {
                let snippet: String = r.text.chars().take(160).collect();
                println!("{}. [{:.4}] {} p.{} ({})", i + 1, r.distance, r.source, r.page, r.id);
                println!("   {}", snippet.replace('\n', " "));
            }
        }
        Commands::Ask { query } => {
            let mut stream = assistant.retrieve_and_generate(&query).await?;
            let mut stdout = std::io::stdout().lock();
            while let Some(fragment) = stream.next().await {
                stdout.write_all(fragment.as_bytes())?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
        }
    }

    assistant.store().close().await;
    Ok(())
}

async fn run_init(explicit: Option<PathBuf>) -> Result<()> {
    let config_path = explicit.unwrap_or_else(config::default_config_path);
    if !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&config_path, config::CONFIG_TEMPLATE)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("Wrote config template to {}", config_path.display());
    }

    let cfg: Config = config::load_config(&config_path)?;
    let store = VectorStore::open(&cfg.db.path, Assistant::table_spec(&cfg)).await?;
    if let Some(reason) = store.degraded_reason() {
        bail!("Could not initialize database at {}: {}", cfg.db.path.display(), reason);
    }
    let count = store.count().await?;
    store.close().await;
    println!(
        "Database initialized at {} ({} chunks stored).",
        cfg.db.path.display(),
        count
    );
    Ok(())
}

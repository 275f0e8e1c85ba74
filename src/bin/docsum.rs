//! Worker binary for edgequake-docsum.
//!
//! A thin shim over the library: reads the environment into a
//! `WorkerConfig`, installs logging, and runs the worker until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_docsum::{InstanceStatus, InstanceStore, JsonFileStore, Worker, WorkerConfig};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the worker until Ctrl-C, polling the input container every 10 s
  docsum

  # Process whatever is in the input container now, then exit
  docsum --once

  # Local directory instead of a blob account
  BLOB_STORAGE_ENDPOINT=./data docsum --once

  # Show every recorded instance
  docsum --list

ENVIRONMENT VARIABLES:
  BLOB_STORAGE_ENDPOINT          Blob account URL with SAS, SAS connection string, or directory
  COGNITIVE_SERVICES_ENDPOINT    Document-analysis endpoint
  COGNITIVE_SERVICES_KEY         Document-analysis key
  AZURE_OPENAI_ENDPOINT          Azure OpenAI resource endpoint
  AZURE_OPENAI_KEY               Azure OpenAI key
  CHAT_MODEL_DEPLOYMENT_NAME     Chat deployment used for summaries
  AZURE_OPENAI_API_VERSION       Default: 2025-01-01-preview
  DOCSUM_LLM_PROVIDER            Use an edgequake-llm provider instead (openai, anthropic, ollama, …)
  DOCSUM_LLM_MODEL               Model for DOCSUM_LLM_PROVIDER
  DOCSUM_INPUT_CONTAINER         Default: input
  DOCSUM_OUTPUT_CONTAINER        Default: output
  DOCSUM_RETRY_INITIAL_DELAY_MS  Default: 5000
  DOCSUM_RETRY_MAX_ATTEMPTS      Default: 3
  DOCSUM_RETRY_BACKOFF           Default: 1.0 (constant delay)
  RUST_LOG                       Overrides --verbose / --quiet
"#;

/// Summarize uploaded PDFs: analyze → summarize → persist, durably.
#[derive(Parser, Debug)]
#[command(
    name = "docsum",
    version,
    about = "Durable worker that summarizes uploaded PDF documents",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory holding one JSON record per workflow instance.
    #[arg(long, env = "DOCSUM_STATE_DIR", default_value = ".docsum/state")]
    state_dir: PathBuf,

    /// Seconds between listings of the input container.
    #[arg(long, env = "DOCSUM_POLL_INTERVAL", default_value_t = 10,
          value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: u64,

    /// Resume unfinished instances, poll once, wait for all instances, exit.
    #[arg(long)]
    once: bool,

    /// Print recorded instances and exit (no service credentials needed).
    #[arg(long, conflicts_with = "once")]
    list: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCSUM_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCSUM_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if cli.list {
        return list_instances(&cli.state_dir).await;
    }

    // ── Build config ─────────────────────────────────────────────────────
    let mut config = WorkerConfig::from_env().context("Invalid configuration")?;
    // The flag (or its env var) wins over DOCSUM_STATE_DIR read by the library.
    config.state_dir = cli.state_dir.clone();

    let worker = Worker::from_config(&config)
        .await
        .context("Failed to start worker")?;

    if cli.once {
        return run_once(&worker).await;
    }

    worker
        .run(Duration::from_secs(cli.poll_interval), async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("Worker stopped")?;
    Ok(())
}

/// Single pass: resume, poll, drain.
async fn run_once(worker: &Worker) -> Result<()> {
    let resumed = worker.recover().await.context("Recovery failed")?;
    let started = worker
        .poll_once()
        .await
        .context("Polling the input container failed")?;
    worker.engine().wait_idle().await;

    let mut failed = 0usize;
    for id in resumed.iter().chain(started.iter()) {
        let record = worker.engine().status(*id).await?;
        match record.status {
            InstanceStatus::Completed => eprintln!(
                "  {} {}  →  {}",
                green("✓"),
                record.input,
                record
                    .output
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
            ),
            _ => {
                failed += 1;
                let reason = record
                    .failure
                    .as_ref()
                    .map(|f| f.error.clone())
                    .unwrap_or_else(|| record.status.to_string());
                eprintln!("  {} {}  {}", red("✗"), record.input, red(&reason));
            }
        }
    }

    let total = resumed.len() + started.len();
    if failed > 0 {
        anyhow::bail!("{failed} of {total} instance(s) failed");
    }
    eprintln!("{} {} instance(s) processed", green("✔"), total);
    Ok(())
}

/// `--list`: one line per recorded instance, oldest first.
async fn list_instances(state_dir: &Path) -> Result<()> {
    let store = JsonFileStore::open(state_dir)
        .await
        .with_context(|| format!("Failed to open state directory {}", state_dir.display()))?;
    let records = store.list().await?;
    if records.is_empty() {
        eprintln!("{}", dim("no instances recorded"));
        return Ok(());
    }
    for r in records {
        let status = match r.status {
            InstanceStatus::Completed => green(&r.status.to_string()),
            InstanceStatus::Failed => red(&r.status.to_string()),
            _ => cyan(&r.status.to_string()),
        };
        println!(
            "{}  {:<18}  {}  {}",
            r.id,
            status,
            r.input,
            dim(&r.updated_at.to_rfc3339())
        );
    }
    Ok(())
}

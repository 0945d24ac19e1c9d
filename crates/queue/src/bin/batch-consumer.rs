//! batch-consumer — one scheduled invocation of the SQS batch consumer.
//!
//! Meant to be started by an external timer (nominally every 10 minutes).
//! Reads the depth estimate, drains and processes a batch if there is enough
//! backlog, deletes what was processed, and exits. Exit status is non-zero
//! on any fatal error; failed deletes alone are logged but do not fail the run.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use drainbatch_core::config::{self, Config, PROFILE_ENV};
use drainbatch_queue::{BatchConsumer, BatchError, ConsumerSettings, LogProcessor, SqsQueue};

// ── CLI ─────────────────────────────────────────────────────────────

/// Drain an SQS queue as one batch once enough messages have accumulated.
#[derive(Parser, Debug)]
#[command(name = "batch-consumer", version, about)]
struct Cli {
    /// Config profile; keys are read as {PROFILE}_{KEY} before {KEY}.
    /// Falls back to DRAINBATCH_PROFILE.
    #[arg(long)]
    profile: Option<String>,

    /// Env file to load instead of ./.env.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.env_file {
        Some(path) => config::load_dotenv_from(path).map_err(BatchError::from)?,
        None => config::load_dotenv(),
    }

    let profile = cli
        .profile
        .or_else(|| std::env::var(PROFILE_ENV).ok())
        .unwrap_or_default();
    let config = Config::for_profile(&profile).map_err(BatchError::from)?;
    config.log_summary();

    let settings = ConsumerSettings::from_config(&config).map_err(BatchError::from)?;
    let client = SqsQueue::new(&config.aws, &config.queue)?;
    let consumer = BatchConsumer::new(client, LogProcessor::new(), settings);

    let report = consumer.run_once().await?;
    info!(
        report = %serde_json::to_string(&report)?,
        "batch-consumer invocation complete"
    );
    Ok(())
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        let kind = e
            .downcast_ref::<BatchError>()
            .map_or("setup", |b| b.kind());
        error!(kind, error = %format!("{e:#}"), "batch-consumer invocation failed");
        return Err(e);
    }
    Ok(())
}

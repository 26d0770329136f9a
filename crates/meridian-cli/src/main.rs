//! Meridian: synchronized dual-store ETL for biomedical reference data.
//! Entry point for the pipeline binary.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use meridian_db::{StoreRole, StoreSet};
use meridian_ingestion::{run_pipeline, PipelineProgress, RunStatus};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "meridian", version, about = "Load reference entities into two stores and reconcile them")]
struct Cli {
    /// Configuration file (defaults to ./meridian.toml when present)
    #[arg(long, env = "MERIDIAN_CONFIG")]
    config: Option<PathBuf>,

    /// Entity types to load, comma separated
    #[arg(long, value_delimiter = ',')]
    types: Option<Vec<String>>,

    /// Records per entity type
    #[arg(long)]
    count: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Concurrent entity-type workers
    #[arg(long)]
    parallelism: Option<usize>,

    /// Write the JSON run report here instead of stdout
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> config::Overrides {
        config::Overrides {
            types: self.types.clone(),
            count: self.count,
            seed: self.seed,
            parallelism: self.parallelism,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("meridian=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("Meridian {}", env!("CARGO_PKG_VERSION"));

    let mut config = config::Config::load(cli.config.as_deref())?;
    config.apply_overrides(cli.overrides());
    let run_config = config.run_config();

    let primary = config.stores.primary.open(StoreRole::Primary).await?;
    let secondary = config.stores.secondary.open(StoreRole::Secondary).await?;
    let stores = StoreSet::new(primary.store.clone(), secondary.store.clone());

    // Ctrl-C: stop at the next batch boundary, still produce a report
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing in-flight batches");
                cancel.cancel();
            }
        });
    }

    let (progress_tx, mut progress_rx) = broadcast::channel::<PipelineProgress>(256);
    tokio::spawn(async move {
        loop {
            match progress_rx.recv().await {
                Ok(p) => debug!(
                    stage = %p.stage,
                    entity_type = p.entity_type.as_deref().unwrap_or("-"),
                    processed = p.processed,
                    "{}", p.message
                ),
                Err(broadcast::error::RecvError::Lagged(n)) => debug!(skipped = n, "Progress receiver lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let report = run_pipeline(run_config, stores, cancel, Some(progress_tx)).await?;

    primary.flush().await?;
    secondary.flush().await?;

    let json = report.to_json_pretty().context("serialising run report")?;
    match &cli.report {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing report to {}", path.display()))?;
            info!(path = %path.display(), "Run report written");
        }
        None => println!("{json}"),
    }

    info!(
        status        = %report.status,
        quality_score = report.validation.quality_score,
        errors        = report.total_errors(),
        "Done"
    );

    Ok(match report.status {
        RunStatus::Success => ExitCode::SUCCESS,
        RunStatus::Partial => ExitCode::from(1),
        RunStatus::Failed  => ExitCode::from(2),
    })
}

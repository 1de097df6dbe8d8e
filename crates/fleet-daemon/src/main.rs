//! Fleet Sync daemon - runs the reconciliation jobs on their schedules.
//!
//! With `--once` every selected job runs a single time and the process exits
//! non-zero when any of them failed. Otherwise the jobs keep running until
//! Ctrl+C, and a run in progress is abandoned without committing.

use anyhow::{Context, Result};
use clap::Parser;
use fleet_sync::{CancellationToken, FleetSync, Settings};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const SETTINGS_FILENAME: &str = "fleet.json";
const APP_DIR_NAME: &str = "fleet-sync";

#[derive(Parser, Debug)]
#[command(name = "fleet-syncd")]
#[command(about = "Keeps the local device store in sync with the IoT registry")]
struct Args {
    /// Settings file (defaults to fleet.json in the data directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for the database and model images
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Run the selected jobs once and exit
    #[arg(long)]
    once: bool,

    /// Only run this job (sync-things, sync-thing-types, sync-edge-devices,
    /// sync-edge-deployments)
    #[arg(long)]
    job: Option<String>,
}

fn init_logging(args: &Args) {
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    // RUST_LOG wins over --debug when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    if args.json_logs {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn data_dir(args: &Args) -> Result<PathBuf> {
    match &args.data_dir {
        Some(dir) => Ok(dir.clone()),
        None => dirs::data_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .context("No data directory available on this platform, pass --data-dir"),
    }
}

/// Load settings from `--config`, the data directory, or defaults.
///
/// An explicitly named settings file must exist.
fn load_settings(config: Option<&Path>, data_dir: &Path) -> Result<Settings> {
    let settings = match config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => {
            let path = data_dir.join(SETTINGS_FILENAME);
            if path.exists() {
                Settings::load(&path)
                    .with_context(|| format!("Failed to load settings from {}", path.display()))?
            } else {
                warn!("No settings at {}, using defaults", path.display());
                Settings::default()
            }
        }
    };
    Ok(settings.resolve_paths(data_dir))
}

async fn run_once(fleet: &FleetSync, only: Option<&str>) -> Result<()> {
    let cancel = CancellationToken::new();
    let scheduler = fleet.scheduler(cancel, only)?;

    let mut failed = Vec::new();
    for (job, result) in scheduler.run_all_once().await {
        match result {
            Ok(report) => info!("{}", report),
            Err(e) => {
                error!("{} failed: {}", job, e);
                failed.push(job);
            }
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} job(s) failed: {}", failed.len(), failed.join(", "))
    }
}

async fn run_scheduled(fleet: &FleetSync, only: Option<&str>) -> Result<()> {
    let cancel = CancellationToken::new();
    let scheduler = fleet.scheduler(cancel.clone(), only)?;
    if scheduler.is_empty() {
        warn!("Every job is disabled, nothing to run");
        return Ok(());
    }

    let handles = scheduler.spawn();
    info!("Scheduler running {} job(s)", handles.len());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping jobs");
    cancel.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Job task ended abnormally: {}", e);
        }
    }
    info!("All jobs stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("Starting Fleet Sync daemon");

    let data_dir = data_dir(&args)?;
    info!("Data directory: {}", data_dir.display());
    let settings = load_settings(args.config.as_deref(), &data_dir)?;

    let fleet = FleetSync::builder(settings)
        .build()
        .context("Failed to initialize fleet sync")?;

    if args.once {
        run_once(&fleet, args.job.as_deref()).await
    } else {
        run_scheduled(&fleet, args.job.as_deref()).await
    }
}

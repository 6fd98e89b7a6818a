//! Command implementations behind the `dcasync` binary.
//!
//! Each `run_*` function loads what it needs from [`Config`], drives the
//! [`SyncModeController`], and prints results to stdout. Logs and progress go
//! to stderr.

use anyhow::{bail, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;
use crate::controller::{SyncEvent, SyncModeController, SyncOutcome};
use crate::migrate;
use crate::models::{DatasetSnapshot, SyncMode};
use crate::progress::{NoProgress, UploadProgressReporter};

async fn open(config: &Config, reporter: Arc<dyn UploadProgressReporter>) -> Result<SyncModeController> {
    let controller = SyncModeController::from_config(config, reporter).await?;
    controller.hydrate().await?;
    Ok(controller)
}

fn print_snapshot(snapshot: &DatasetSnapshot) {
    println!(
        "{}  v{}  {} rows  {} columns",
        snapshot.filename,
        snapshot.rolled_back_to.unwrap_or(snapshot.version),
        snapshot.rows,
        snapshot.columns.len()
    );
    for err in &snapshot.replay_errors {
        println!("  warning: derived column '{}' failed: {}", err.name, err.error);
    }
}

fn print_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Applied(snapshot) => print_snapshot(snapshot),
        SyncOutcome::Busy => println!("A sync is already in progress."),
    }
}

pub async fn run_init(config: &Config) -> Result<()> {
    migrate::run_migrations(config).await?;
    println!("Handle store initialized at {}.", config.db.path.display());
    Ok(())
}

pub async fn run_import(
    config: &Config,
    path: &Path,
    reporter: Arc<dyn UploadProgressReporter>,
) -> Result<()> {
    let controller = SyncModeController::from_config(config, reporter).await?;
    let outcome = controller.import_file(path).await?;
    print_outcome(&outcome);
    if let Some(watched) = controller.watched_file().await {
        println!("Watching {}", watched.location().display());
    }
    Ok(())
}

pub async fn run_grant(config: &Config, path: &Path) -> Result<()> {
    let controller = SyncModeController::from_config(config, Arc::new(NoProgress)).await?;
    let handle = controller.grant_file(path).await?;
    println!(
        "Watching {} (modified {})",
        handle.location().display(),
        handle.last_known_modified_ms()
    );
    Ok(())
}

pub async fn run_forget(config: &Config) -> Result<()> {
    let controller = SyncModeController::from_config(config, Arc::new(NoProgress)).await?;
    controller.forget_file().await?;
    println!("No file is watched.");
    Ok(())
}

pub async fn run_status(config: &Config) -> Result<()> {
    let controller = open(config, Arc::new(NoProgress)).await?;

    println!("Sync mode:   {}", config.sync.mode);
    match controller.watched_file().await {
        Some(handle) => {
            println!("Watching:    {}", handle.location().display());
            println!("Permission:  {:?}", handle.permission());
            println!("Last synced: {} ms", handle.last_known_modified_ms());
        }
        None => println!("Watching:    (none)"),
    }

    match controller.dataset() {
        Some(ds) => {
            println!("Dataset:     {}", ds.filename);
            println!("Version:     v{}", ds.current_version);
            println!("Rows:        {}", ds.row_count);
            println!("Columns:     {}", ds.column_names.join(", "));
            if let Some(ts) = &ds.last_import_timestamp {
                println!("Imported:    {}", ts);
            }
        }
        None => println!("Dataset:     (none loaded)"),
    }
    Ok(())
}

pub async fn run_build(config: &Config, reporter: Arc<dyn UploadProgressReporter>) -> Result<()> {
    let controller = open(config, reporter).await?;
    let outcome = controller.trigger_manual_build().await?;
    print_outcome(&outcome);
    Ok(())
}

/// Arm `mode` and print every sync event until Ctrl-C.
pub async fn run_watch(
    config: &Config,
    mode: Option<SyncMode>,
    interval_ms: Option<u64>,
    reporter: Arc<dyn UploadProgressReporter>,
) -> Result<()> {
    let mode = mode.unwrap_or(config.sync.mode);
    if mode == SyncMode::Manual {
        bail!("watch needs an automatic mode: pass --mode auto or --mode scheduled");
    }

    let controller = open(config, reporter).await?;
    if let Some(ms) = interval_ms {
        controller.set_schedule_interval(ms)?;
    }
    let mut events = controller.subscribe();
    controller.set_mode(mode);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "event consumer lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    controller.shutdown();
    Ok(())
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::SnapshotApplied { trigger, snapshot } => {
            print!("[{}] ", trigger);
            print_snapshot(snapshot);
        }
        // Already printed as part of the snapshot line.
        SyncEvent::ReplayWarning { .. } => {}
        SyncEvent::SyncFailed { trigger, message } => {
            println!("[{}] sync failed: {}", trigger, message);
        }
        SyncEvent::ModeChanged { mode, interval_ms } => match interval_ms {
            Some(ms) => println!("Mode {} (every {} ms). Ctrl-C to stop.", mode, ms),
            None => println!("Mode {}.", mode),
        },
    }
}

pub async fn run_versions_list(config: &Config) -> Result<()> {
    let controller = SyncModeController::from_config(config, Arc::new(NoProgress)).await?;
    let listing = controller.list_versions().await?;

    if listing.versions.is_empty() {
        println!("No versions.");
        return Ok(());
    }

    println!("  {:<8} {:<28} {:>10} {:>8}  {}", "VERSION", "TIMESTAMP", "ROWS", "COLUMNS", "STATUS");
    println!("  {}", "-".repeat(66));
    for v in &listing.versions {
        let marker = if v.version == listing.current_version { "*" } else { " " };
        println!(
            "{} {:<8} {:<28} {:>10} {:>8}  {}",
            marker,
            format!("v{}", v.version),
            v.timestamp,
            v.rows,
            v.columns,
            v.status.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

pub async fn run_versions_rollback(config: &Config, version: u64) -> Result<()> {
    let controller = SyncModeController::from_config(config, Arc::new(NoProgress)).await?;
    let snapshot = controller.rollback(version).await?;
    print!("Rolled back: ");
    print_snapshot(&snapshot);
    Ok(())
}

pub async fn run_pipeline(config: &Config) -> Result<()> {
    let controller = SyncModeController::from_config(config, Arc::new(NoProgress)).await?;
    let columns = controller.derived_columns().await?;

    if columns.is_empty() {
        println!("No derived columns.");
        return Ok(());
    }
    for (i, col) in columns.iter().enumerate() {
        println!("{}. {} = {}", i + 1, col.name, col.formula);
    }
    Ok(())
}

//! # DCA Sync CLI (`dcasync`)
//!
//! Keeps a local production-data file in step with a running decline-curve
//! analysis service.
//!
//! ## Usage
//!
//! ```bash
//! dcasync --config ./config/dcasync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dcasync init` | Create the handle store database |
//! | `dcasync import <path>` | Chunk-upload a file as a new dataset and watch it |
//! | `dcasync grant <path>` | Watch a file without uploading it |
//! | `dcasync forget` | Stop watching the current file |
//! | `dcasync status` | Show the watched file and the active dataset |
//! | `dcasync build` | Sync now (the Build button) |
//! | `dcasync watch` | Run in auto or scheduled mode until Ctrl-C |
//! | `dcasync versions list` | Show the version ledger |
//! | `dcasync versions rollback <N>` | Make version N current |
//! | `dcasync pipeline` | List the derived columns replayed after each sync |

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use dca_sync::models::SyncMode;
use dca_sync::progress::{ProgressMode, UploadProgressReporter};
use dca_sync::{commands, config, logging};

/// DCA Sync: keep a local data file and its server-side dataset in step.
#[derive(Parser)]
#[command(name = "dcasync", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dcasync.toml")]
    config: PathBuf,

    /// Upload progress on stderr: `off`, `human`, or `json`.
    /// Defaults to `human` when stderr is a terminal.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the handle store database. Safe to run repeatedly.
    Init,

    /// Upload a file as a new dataset through the chunked protocol, then
    /// watch it for changes.
    Import {
        /// Local CSV or Excel file.
        path: PathBuf,
    },

    /// Watch a file without uploading it. Replaces any previously watched file.
    Grant { path: PathBuf },

    /// Stop watching the current file.
    Forget,

    /// Show the watched file, its permission state, and the active dataset.
    Status,

    /// Sync the watched file now, or ask the server to reload its copy when
    /// no file is watched.
    Build,

    /// Keep syncing in an automatic mode until interrupted.
    Watch {
        /// `auto` or `scheduled`. Defaults to `[sync] mode`.
        #[arg(long, value_parser = parse_mode)]
        mode: Option<SyncMode>,

        /// Scheduled-mode period in milliseconds.
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Inspect and roll back the dataset's version history.
    Versions {
        #[command(subcommand)]
        action: VersionsAction,
    },

    /// List the derived-column pipeline.
    Pipeline,
}

#[derive(Subcommand)]
enum VersionsAction {
    /// List versions, oldest first; `*` marks the current one.
    List,
    /// Make an earlier version current without deleting later ones.
    Rollback { version: u64 },
}

fn parse_mode(s: &str) -> Result<SyncMode, String> {
    s.parse()
}

fn progress_reporter(flag: Option<&str>) -> Result<Arc<dyn UploadProgressReporter>> {
    let mode = match flag {
        Some(s) => match ProgressMode::parse(s) {
            Some(m) => m,
            None => bail!("Unknown --progress value: '{}'. Must be off, human, or json.", s),
        },
        None => ProgressMode::default_for_tty(),
    };
    Ok(Arc::from(mode.reporter()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    let reporter = progress_reporter(cli.progress.as_deref())?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Import { path } => commands::run_import(&cfg, &path, reporter).await?,
        Commands::Grant { path } => commands::run_grant(&cfg, &path).await?,
        Commands::Forget => commands::run_forget(&cfg).await?,
        Commands::Status => commands::run_status(&cfg).await?,
        Commands::Build => commands::run_build(&cfg, reporter).await?,
        Commands::Watch { mode, interval_ms } => {
            commands::run_watch(&cfg, mode, interval_ms, reporter).await?
        }
        Commands::Versions { action } => match action {
            VersionsAction::List => commands::run_versions_list(&cfg).await?,
            VersionsAction::Rollback { version } => {
                commands::run_versions_rollback(&cfg, version).await?
            }
        },
        Commands::Pipeline => commands::run_pipeline(&cfg).await?,
    }

    Ok(())
}

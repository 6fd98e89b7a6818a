use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::SyncMode;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub service: ServiceConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub base_url: String,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_prefix() -> String {
    "/api".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}

impl ServiceConfig {
    /// Base URL joined with the API prefix, without a trailing slash.
    pub fn api_root(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let prefix = self.api_prefix.trim_matches('/');
        if prefix.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, prefix)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_chunk_size() -> usize {
    5 * 1024 * 1024
}
fn default_poll_interval_ms() -> u64 {
    500
}

impl UploadConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default = "default_auto_interval_ms")]
    pub auto_interval_ms: u64,
    #[serde(default = "default_schedule_interval_ms")]
    pub schedule_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Manual,
            auto_interval_ms: default_auto_interval_ms(),
            schedule_interval_ms: default_schedule_interval_ms(),
        }
    }
}

fn default_auto_interval_ms() -> u64 {
    3_000
}
fn default_schedule_interval_ms() -> u64 {
    600_000
}

/// Smallest accepted schedule period.
pub const MIN_SCHEDULE_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: default_log_format(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// A config pointing at a local service with every other setting defaulted.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/dcasync.sqlite"),
            },
            service: ServiceConfig {
                base_url: "http://127.0.0.1:8000".to_string(),
                api_prefix: default_api_prefix(),
                timeout_secs: default_timeout_secs(),
            },
            upload: UploadConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if !(config.service.base_url.starts_with("http://")
        || config.service.base_url.starts_with("https://"))
    {
        anyhow::bail!(
            "service.base_url must start with http:// or https:// (got '{}')",
            config.service.base_url
        );
    }

    if config.service.timeout_secs == 0 {
        anyhow::bail!("service.timeout_secs must be > 0");
    }

    if config.upload.chunk_size_bytes == 0 {
        anyhow::bail!("upload.chunk_size_bytes must be > 0");
    }

    if config.upload.poll_interval_ms == 0 {
        anyhow::bail!("upload.poll_interval_ms must be > 0");
    }

    if config.sync.auto_interval_ms == 0 {
        anyhow::bail!("sync.auto_interval_ms must be > 0");
    }

    if config.sync.schedule_interval_ms < MIN_SCHEDULE_INTERVAL_MS {
        anyhow::bail!(
            "sync.schedule_interval_ms must be >= {}",
            MIN_SCHEDULE_INTERVAL_MS
        );
    }

    match config.logging.format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!("Unknown logging.format: '{}'. Must be text or json.", other),
    }

    Ok(())
}

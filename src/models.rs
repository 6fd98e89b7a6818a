//! Core data models shared by the upload, versioning, and sync layers.
//!
//! Wire payloads (`DatasetSnapshot`, `VersionListing`, `StatusReport`) mirror
//! the JSON the dataset service returns; [`Dataset`] is the client-side
//! mirror of the active dataset.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which trigger mechanism drives synchronization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Manual,
    Auto,
    Scheduled,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncMode::Manual => "manual",
            SyncMode::Auto => "auto",
            SyncMode::Scheduled => "scheduled",
        };
        f.write_str(s)
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(SyncMode::Manual),
            "auto" => Ok(SyncMode::Auto),
            "scheduled" => Ok(SyncMode::Scheduled),
            other => Err(format!(
                "unknown sync mode '{}': must be manual, auto, or scheduled",
                other
            )),
        }
    }
}

/// Read access state of a watched-file capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    /// Access lapsed; only an explicit user action may re-request it.
    Prompt,
    Denied,
}

/// A derived column that failed to re-apply after new data arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayError {
    #[serde(alias = "column")]
    pub name: String,
    #[serde(alias = "message")]
    pub error: String,
}

/// The "ready-shape" payload: everything needed to render a queryable dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    #[serde(default)]
    pub dataset_id: Option<String>,
    pub filename: String,
    pub rows: u64,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub numeric_columns: Vec<String>,
    #[serde(default)]
    pub date_columns: Vec<String>,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub last_import: Option<String>,
    #[serde(default)]
    pub has_disk_path: bool,
    #[serde(default)]
    pub replay_errors: Vec<ReplayError>,
    #[serde(default)]
    pub rolled_back_to: Option<u64>,
}

/// Client-side mirror of the active server dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub id: Option<String>,
    pub filename: String,
    pub row_count: u64,
    pub column_names: Vec<String>,
    pub numeric_column_names: Vec<String>,
    pub date_column_names: Vec<String>,
    pub current_version: u64,
    pub last_import_timestamp: Option<String>,
    pub has_disk_path: bool,
}

impl Dataset {
    /// Build the mirror from a snapshot, keeping `previous`'s id when the
    /// snapshot omits one (the one-shot sync endpoints do not always echo it).
    pub fn from_snapshot(snapshot: &DatasetSnapshot, previous: Option<&Dataset>) -> Self {
        let id = snapshot
            .dataset_id
            .clone()
            .or_else(|| previous.and_then(|d| d.id.clone()));
        Self {
            id,
            filename: snapshot.filename.clone(),
            row_count: snapshot.rows,
            column_names: snapshot.columns.clone(),
            numeric_column_names: snapshot.numeric_columns.clone(),
            date_column_names: snapshot.date_columns.clone(),
            current_version: snapshot.rolled_back_to.unwrap_or(snapshot.version),
            last_import_timestamp: snapshot.last_import.clone(),
            has_disk_path: snapshot.has_disk_path,
        }
    }
}

/// One entry of the server's version ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetVersion {
    pub version: u64,
    pub timestamp: String,
    #[serde(alias = "row_count")]
    pub rows: u64,
    #[serde(alias = "column_count")]
    pub columns: u64,
    #[serde(default)]
    pub status: Option<String>,
}

/// `GET /versions` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionListing {
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub versions: Vec<DatasetVersion>,
    pub current_version: u64,
}

impl VersionListing {
    pub fn contains(&self, version: u64) -> bool {
        self.versions.iter().any(|v| v.version == version)
    }
}

/// Server-side processing state of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Initialized,
    Uploading,
    Finalizing,
    Processing,
    Ready,
    Error,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Ready | UploadStatus::Error)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadStatus::Initialized => "initialized",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Finalizing => "finalizing",
            UploadStatus::Processing => "processing",
            UploadStatus::Ready => "ready",
            UploadStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// `GET /dataset/{id}/status` response. On `ready`, the ready-shape fields
/// are flattened alongside the status.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusReport {
    pub status: UploadStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub snapshot: Option<DatasetSnapshot>,
}

/// `POST /upload/init` response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InitResponse {
    pub dataset_id: String,
    #[serde(default)]
    pub chunk_size: Option<usize>,
}

/// `GET /file_status` response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileStatus {
    pub modified: bool,
    #[serde(default)]
    pub has_disk_path: bool,
    #[serde(default)]
    pub disk_mtime: Option<f64>,
}

/// A registered derived column replayed after every sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedColumn {
    pub name: String,
    pub formula: String,
}

/// State of one chunked upload attempt. Lives only for the attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSession {
    pub dataset_id: String,
    pub total_chunks: usize,
    pub chunk_size: usize,
    pub chunks_sent: usize,
    pub status: UploadStatus,
    pub progress_percent: u8,
    pub error_message: Option<String>,
}

impl UploadSession {
    pub fn new(dataset_id: String, file_size: usize, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            dataset_id,
            total_chunks: file_size.div_ceil(chunk_size),
            chunk_size,
            chunks_sent: 0,
            status: UploadStatus::Initialized,
            progress_percent: 0,
            error_message: None,
        }
    }
}

/// A local file read into memory together with its modification time.
#[derive(Debug, Clone)]
pub struct FileContents {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub modified_ms: i64,
}

//! Watched-file capability and timestamp-based change detection.
//!
//! A [`FileCapability`] is a reusable reference to one local file that can
//! report its modification time, read its bytes, and answer permission
//! queries. [`WatchedFileHandle`] pairs the capability with the last
//! modification time that was successfully synced, and persists both through
//! a [`HandleStore`] so change detection survives restarts.
//!
//! Change detection never reads file contents: a file has changed only when
//! its modification time is strictly greater than the recorded baseline.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{Result, SyncError};
use crate::handle_store::{HandleStore, StoredHandle};
use crate::models::{FileContents, PermissionState};

/// Read capability for a single local file.
#[async_trait]
pub trait FileCapability: Send + Sync {
    /// Display name sent to the service (the file's base name).
    fn filename(&self) -> &str;

    /// Location persisted in the handle store.
    fn location(&self) -> &Path;

    /// Current modification time in Unix milliseconds.
    async fn modified_ms(&self) -> Result<i64>;

    /// Read the whole file together with the modification time it was read at.
    async fn read(&self) -> Result<FileContents>;

    /// Check access without prompting.
    async fn query_permission(&self) -> PermissionState;

    /// Ask for access. Only manual user actions may call this.
    async fn request_permission(&self) -> PermissionState;
}

/// [`FileCapability`] over a path on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFileCapability {
    path: PathBuf,
    filename: String,
}

impl LocalFileCapability {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self { path, filename }
    }
}

fn io_to_sync_error(path: &Path, e: std::io::Error) -> SyncError {
    match e.kind() {
        ErrorKind::PermissionDenied => {
            SyncError::Permission(format!("read access denied: {}", path.display()))
        }
        _ => SyncError::Io(e),
    }
}

fn system_time_ms(t: SystemTime) -> i64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl FileCapability for LocalFileCapability {
    fn filename(&self) -> &str {
        &self.filename
    }

    fn location(&self) -> &Path {
        &self.path
    }

    async fn modified_ms(&self) -> Result<i64> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| io_to_sync_error(&self.path, e))?;
        let modified = metadata.modified().map_err(SyncError::Io)?;
        Ok(system_time_ms(modified))
    }

    async fn read(&self) -> Result<FileContents> {
        // Stat before reading: a write racing the read then shows up as a
        // newer timestamp on the next check instead of being lost.
        let modified_ms = self.modified_ms().await?;
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| io_to_sync_error(&self.path, e))?;
        Ok(FileContents {
            filename: self.filename.clone(),
            bytes,
            modified_ms,
        })
    }

    async fn query_permission(&self) -> PermissionState {
        match tokio::fs::File::open(&self.path).await {
            Ok(_) => PermissionState::Granted,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => PermissionState::Denied,
            Err(_) => PermissionState::Prompt,
        }
    }

    async fn request_permission(&self) -> PermissionState {
        // The filesystem has no interactive grant; asking again is a re-check.
        self.query_permission().await
    }
}

/// The single watched file and its last synced modification time.
#[derive(Clone)]
pub struct WatchedFileHandle {
    capability: Arc<dyn FileCapability>,
    last_known_modified_ms: i64,
    permission: PermissionState,
}

impl std::fmt::Debug for WatchedFileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchedFileHandle")
            .field("location", &self.capability.location())
            .field("filename", &self.capability.filename())
            .field("last_known_modified_ms", &self.last_known_modified_ms)
            .field("permission", &self.permission)
            .finish()
    }
}

impl WatchedFileHandle {
    /// Wrap a capability with an explicit baseline, without touching storage.
    pub fn with_baseline(capability: Arc<dyn FileCapability>, last_known_modified_ms: i64) -> Self {
        Self {
            capability,
            last_known_modified_ms,
            permission: PermissionState::Granted,
        }
    }

    /// Acquire read access to a file, record its current modification time,
    /// and persist it as the watched file, replacing any previous one.
    pub async fn grant(
        capability: Arc<dyn FileCapability>,
        store: &dyn HandleStore,
    ) -> Result<Self> {
        let permission = capability.request_permission().await;
        if permission != PermissionState::Granted {
            return Err(SyncError::Permission(format!(
                "read access to {} was not granted ({:?})",
                capability.location().display(),
                permission
            )));
        }

        let modified_ms = capability.modified_ms().await?;
        Self::adopt(capability, modified_ms, store).await
    }

    /// Persist an already-readable capability with a known baseline, e.g. the
    /// timestamp of the bytes an import just uploaded.
    pub async fn adopt(
        capability: Arc<dyn FileCapability>,
        last_known_modified_ms: i64,
        store: &dyn HandleStore,
    ) -> Result<Self> {
        let handle = Self::with_baseline(capability, last_known_modified_ms);
        handle.persist(store).await?;

        tracing::info!(
            file = %handle.filename(),
            modified_ms = last_known_modified_ms,
            "watching file"
        );
        Ok(handle)
    }

    /// Rebuild the watched file from storage. Permission is checked without
    /// prompting; a lapsed permission still yields a handle.
    pub async fn restore(store: &dyn HandleStore) -> Result<Option<Self>> {
        let Some(stored) = store.get().await? else {
            return Ok(None);
        };

        let capability: Arc<dyn FileCapability> = Arc::new(LocalFileCapability::new(&stored.path));
        let permission = capability.query_permission().await;
        if permission != PermissionState::Granted {
            tracing::debug!(
                path = %stored.path.display(),
                ?permission,
                "restored watched file without read access"
            );
        }

        Ok(Some(Self {
            capability,
            last_known_modified_ms: stored.last_known_modified_ms,
            permission,
        }))
    }

    pub fn filename(&self) -> &str {
        self.capability.filename()
    }

    pub fn location(&self) -> &Path {
        self.capability.location()
    }

    pub fn last_known_modified_ms(&self) -> i64 {
        self.last_known_modified_ms
    }

    /// Permission state observed by the most recent check or request.
    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    /// Re-check read access without prompting. Never fails: a lapsed
    /// permission is reported as a state for the caller to act on.
    pub async fn check_permission(&mut self) -> PermissionState {
        self.permission = self.capability.query_permission().await;
        self.permission
    }

    /// Actively ask for read access again.
    pub async fn request_permission(&mut self) -> PermissionState {
        self.permission = self.capability.request_permission().await;
        self.permission
    }

    pub(crate) fn record_permission(&mut self, permission: PermissionState) {
        self.permission = permission;
    }

    /// Strict comparison against the baseline; equal or older timestamps
    /// (clock skew, an untouched file) are not changes.
    pub fn is_newer(&self, candidate_ms: i64) -> bool {
        candidate_ms > self.last_known_modified_ms
    }

    pub async fn has_changed(&self) -> Result<bool> {
        let current = self.capability.modified_ms().await?;
        Ok(self.is_newer(current))
    }

    pub async fn read(&self) -> Result<FileContents> {
        self.capability.read().await
    }

    /// Advance the baseline after a successful sync and persist it. The
    /// baseline never moves backwards.
    pub async fn mark_seen(&mut self, modified_ms: i64, store: &dyn HandleStore) -> Result<()> {
        if modified_ms <= self.last_known_modified_ms {
            return Ok(());
        }
        self.last_known_modified_ms = modified_ms;
        self.persist(store).await
    }

    async fn persist(&self, store: &dyn HandleStore) -> Result<()> {
        store
            .put(&StoredHandle {
                path: self.location().to_path_buf(),
                filename: self.filename().to_string(),
                last_known_modified_ms: self.last_known_modified_ms,
                saved_at: chrono::Utc::now().timestamp_millis(),
            })
            .await
    }
}

//! Sync mode controller: the single authority over trigger modes and the
//! single funnel for every sync attempt.
//!
//! # Modes
//!
//! | Mode | Timer | Each tick |
//! |------|-------|-----------|
//! | `manual` | none | only [`SyncModeController::trigger_manual_build`] syncs |
//! | `auto` | `sync.auto_interval_ms` | sync when the watched file's mtime advanced |
//! | `scheduled` | `sync.schedule_interval_ms` | sync the watched file when readable, otherwise ask the server whether its copy went stale |
//!
//! Timers are cancellable tasks owned by the controller. Switching mode aborts
//! the previous ticker before arming the next one; each tick runs as its own
//! task, so a mode switch never cancels a sync that already started. Every
//! switch also bumps a generation counter: a tick still checking the file
//! when its mode is replaced sends nothing.
//!
//! # Mutual exclusion
//!
//! An atomic `syncing` flag is claimed before the first suspension point of
//! every attempt and released by a drop guard whatever the outcome. A trigger
//! that finds it claimed is dropped, not queued: the next periodic tick
//! re-observes the file and converges.
//!
//! # Consumers
//!
//! Every applied snapshot, replay warning, failure, and mode change is
//! broadcast as a [`SyncEvent`]; subscribe with [`SyncModeController::subscribe`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{Config, MIN_SCHEDULE_INTERVAL_MS};
use crate::db;
use crate::error::{Result, SyncError};
use crate::handle_store::{HandleStore, SqliteHandleStore};
use crate::models::{
    Dataset, DatasetSnapshot, DerivedColumn, FileContents, PermissionState, SyncMode,
    VersionListing,
};
use crate::progress::{UploadProgressEvent, UploadProgressReporter};
use crate::service::{DatasetService, HttpDatasetService};
use crate::upload::ChunkedUploadOrchestrator;
use crate::versions::VersionStore;
use crate::watched_file::{FileCapability, LocalFileCapability, WatchedFileHandle};

const EVENT_CAPACITY: usize = 64;

/// What started a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Manual,
    Auto,
    Scheduled,
    Import,
    Rollback,
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncTrigger::Manual => "manual",
            SyncTrigger::Auto => "auto",
            SyncTrigger::Scheduled => "scheduled",
            SyncTrigger::Import => "import",
            SyncTrigger::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// Result of a sync attempt that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The snapshot was applied to the workspace.
    Applied(DatasetSnapshot),
    /// Another attempt was in flight; nothing was sent.
    Busy,
}

/// Notifications for the layers that render the workspace.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    SnapshotApplied {
        trigger: SyncTrigger,
        snapshot: DatasetSnapshot,
    },
    /// A derived column failed to replay; the sync itself succeeded.
    ReplayWarning { column: String, message: String },
    SyncFailed { trigger: SyncTrigger, message: String },
    ModeChanged { mode: SyncMode, interval_ms: Option<u64> },
}

struct TimerState {
    mode: SyncMode,
    schedule_interval_ms: u64,
    /// Bumped by every `set_mode`; ticks armed under an older value are stale.
    generation: u64,
    ticker: Option<JoinHandle<()>>,
}

struct EngineInner {
    service: Arc<dyn DatasetService>,
    store: Arc<dyn HandleStore>,
    uploader: ChunkedUploadOrchestrator,
    versions: VersionStore,
    reporter: Arc<dyn UploadProgressReporter>,
    watched: tokio::sync::Mutex<Option<WatchedFileHandle>>,
    workspace: RwLock<Option<Dataset>>,
    syncing: AtomicBool,
    timers: Mutex<TimerState>,
    events: broadcast::Sender<SyncEvent>,
    auto_interval: Duration,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let timers = self.timers.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(ticker) = timers.ticker.take() {
            ticker.abort();
        }
    }
}

/// Clears the in-flight flag when the attempt ends, however it ends.
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the sync mode, its timer, the in-flight flag, the watched file, and
/// the cached dataset mirror. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncModeController {
    inner: Arc<EngineInner>,
}

impl SyncModeController {
    /// Build an idle controller in manual mode. Call [`set_mode`](Self::set_mode)
    /// to arm the configured mode.
    pub fn new(
        service: Arc<dyn DatasetService>,
        store: Arc<dyn HandleStore>,
        config: &Config,
        reporter: Arc<dyn UploadProgressReporter>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let uploader = ChunkedUploadOrchestrator::new(service.clone(), &config.upload, reporter.clone());
        let versions = VersionStore::new(service.clone());

        Self {
            inner: Arc::new(EngineInner {
                service,
                store,
                uploader,
                versions,
                reporter,
                watched: tokio::sync::Mutex::new(None),
                workspace: RwLock::new(None),
                syncing: AtomicBool::new(false),
                timers: Mutex::new(TimerState {
                    mode: SyncMode::Manual,
                    schedule_interval_ms: config.sync.schedule_interval_ms,
                    generation: 0,
                    ticker: None,
                }),
                events,
                auto_interval: Duration::from_millis(config.sync.auto_interval_ms),
            }),
        }
    }

    /// Wire the HTTP service and the SQLite handle store from `config`.
    pub async fn from_config(
        config: &Config,
        reporter: Arc<dyn UploadProgressReporter>,
    ) -> Result<Self> {
        let service = Arc::new(HttpDatasetService::new(&config.service)?);
        let pool = db::connect(config).await?;
        let store = Arc::new(SqliteHandleStore::new(pool).await?);
        Ok(Self::new(service, store, config, reporter))
    }

    /// Restore the watched file from storage and the dataset mirror from the
    /// service. An unreachable service leaves the workspace empty.
    pub async fn hydrate(&self) -> Result<()> {
        let restored = WatchedFileHandle::restore(self.inner.store.as_ref()).await?;
        if let Some(handle) = &restored {
            tracing::info!(
                file = %handle.filename(),
                permission = ?handle.permission(),
                "restored watched file"
            );
        }
        *self.inner.watched.lock().await = restored;

        match self.inner.service.current().await {
            Ok(Some(snapshot)) => {
                let mut ws = self.workspace_write();
                let dataset = Dataset::from_snapshot(&snapshot, ws.as_ref());
                *ws = Some(dataset);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "could not load current dataset"),
        }
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn mode(&self) -> SyncMode {
        self.timers().mode
    }

    pub fn schedule_interval_ms(&self) -> u64 {
        self.timers().schedule_interval_ms
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }

    /// Cached mirror of the active dataset.
    pub fn dataset(&self) -> Option<Dataset> {
        self.inner
            .workspace
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub async fn watched_file(&self) -> Option<WatchedFileHandle> {
        self.inner.watched.lock().await.clone()
    }

    // ── Mode and timers ────────────────────────────────────────────────

    /// Cancel the current ticker, then arm the one for `mode`. Re-applying
    /// the current mode re-arms it, which is how an edited interval takes
    /// effect. Must be called from within a Tokio runtime.
    pub fn set_mode(&self, mode: SyncMode) {
        let interval_ms = {
            let mut timers = self.timers();
            if let Some(ticker) = timers.ticker.take() {
                ticker.abort();
            }
            timers.mode = mode;
            timers.generation += 1;

            let period = match mode {
                SyncMode::Manual => None,
                SyncMode::Auto => Some(self.inner.auto_interval),
                SyncMode::Scheduled => Some(Duration::from_millis(timers.schedule_interval_ms)),
            };
            if let Some(period) = period {
                timers.ticker = Some(spawn_ticker(
                    Arc::downgrade(&self.inner),
                    mode,
                    period,
                    timers.generation,
                ));
            }
            period.map(|p| p.as_millis() as u64)
        };

        tracing::info!(%mode, ?interval_ms, "sync mode set");
        let _ = self
            .inner
            .events
            .send(SyncEvent::ModeChanged { mode, interval_ms });
    }

    /// Change the scheduled period; re-arms the timer if scheduled mode is active.
    pub fn set_schedule_interval(&self, interval_ms: u64) -> Result<()> {
        if interval_ms < MIN_SCHEDULE_INTERVAL_MS {
            return Err(SyncError::Validation(format!(
                "schedule interval must be at least {} ms",
                MIN_SCHEDULE_INTERVAL_MS
            )));
        }
        let mode = {
            let mut timers = self.timers();
            timers.schedule_interval_ms = interval_ms;
            timers.mode
        };
        if mode == SyncMode::Scheduled {
            self.set_mode(SyncMode::Scheduled);
        }
        Ok(())
    }

    /// Stop all timers and return to manual mode.
    pub fn shutdown(&self) {
        self.set_mode(SyncMode::Manual);
    }

    // ── Watched file ───────────────────────────────────────────────────

    pub async fn grant_file(&self, path: &Path) -> Result<WatchedFileHandle> {
        self.grant_capability(Arc::new(LocalFileCapability::new(path)))
            .await
    }

    /// Make `capability` the watched file, replacing any previous one.
    pub async fn grant_capability(
        &self,
        capability: Arc<dyn FileCapability>,
    ) -> Result<WatchedFileHandle> {
        let handle = WatchedFileHandle::grant(capability, self.inner.store.as_ref()).await?;
        *self.inner.watched.lock().await = Some(handle.clone());
        Ok(handle)
    }

    pub async fn forget_file(&self) -> Result<()> {
        let mut watched = self.inner.watched.lock().await;
        self.inner.store.delete().await?;
        *watched = None;
        Ok(())
    }

    // ── Sync paths ─────────────────────────────────────────────────────

    /// Claim the in-flight flag, or `None` when another attempt holds it.
    fn try_begin(&self) -> Option<SyncingGuard<'_>> {
        self.inner
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncingGuard(&self.inner.syncing))
    }

    /// Upload an in-memory file in one request and apply the result. Returns
    /// [`SyncOutcome::Busy`] without any request when a sync is in flight.
    /// On failure the workspace and the watched baseline are left untouched.
    pub async fn perform_sync(
        &self,
        file: FileContents,
        trigger: SyncTrigger,
    ) -> Result<SyncOutcome> {
        let Some(_guard) = self.try_begin() else {
            tracing::debug!(%trigger, "sync already in flight; dropping request");
            return Ok(SyncOutcome::Busy);
        };

        self.report_stage("uploading", 40);
        let modified_ms = file.modified_ms;
        let filename = file.filename.clone();

        let snapshot = match self
            .inner
            .service
            .sync_upload(&file.filename, file.bytes)
            .await
        {
            Ok(s) => s,
            Err(e) => return Err(self.failed(trigger, e)),
        };

        self.report_stage("applying", 80);
        self.apply(&snapshot, trigger);
        self.mark_seen(&filename, modified_ms).await;
        self.report_stage("complete", 100);

        Ok(SyncOutcome::Applied(snapshot))
    }

    /// Ask the server to re-read the originally imported path.
    async fn reload_from_server(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
        let Some(_guard) = self.try_begin() else {
            return Ok(SyncOutcome::Busy);
        };

        match self.inner.service.reload().await {
            Ok(snapshot) => {
                self.apply(&snapshot, trigger);
                Ok(SyncOutcome::Applied(snapshot))
            }
            Err(e) => Err(self.failed(trigger, e)),
        }
    }

    /// Explicit Build action. Prefers the watched file (re-requesting access
    /// if it lapsed) and falls back to a server-side reload.
    pub async fn trigger_manual_build(&self) -> Result<SyncOutcome> {
        if self.is_syncing() {
            tracing::info!("sync already in progress");
            return Ok(SyncOutcome::Busy);
        }

        if let Some(mut handle) = self.watched_file().await {
            let mut permission = handle.check_permission().await;
            if permission != PermissionState::Granted {
                permission = handle.request_permission().await;
            }
            self.remember_permission(&handle).await;

            if permission == PermissionState::Granted {
                match handle.read().await {
                    Ok(file) => return self.perform_sync(file, SyncTrigger::Manual).await,
                    Err(e) => tracing::warn!(
                        error = %e,
                        "could not read watched file; falling back to server reload"
                    ),
                }
            } else {
                tracing::warn!(
                    file = %handle.filename(),
                    ?permission,
                    "read access not granted; falling back to server reload"
                );
            }
        }

        self.reload_from_server(SyncTrigger::Manual).await
    }

    /// First-time import of a local file through the chunked upload protocol.
    /// On success the file becomes the watched file.
    pub async fn import_file(&self, path: &Path) -> Result<SyncOutcome> {
        self.import_capability(Arc::new(LocalFileCapability::new(path)))
            .await
    }

    pub async fn import_capability(
        &self,
        capability: Arc<dyn FileCapability>,
    ) -> Result<SyncOutcome> {
        let Some(_guard) = self.try_begin() else {
            return Ok(SyncOutcome::Busy);
        };

        let file = match capability.read().await {
            Ok(f) => f,
            Err(e) => return Err(self.failed(SyncTrigger::Import, e)),
        };

        let snapshot = match self.inner.uploader.import(&file).await {
            Ok(s) => s,
            Err(e) => return Err(self.failed(SyncTrigger::Import, e)),
        };
        self.apply(&snapshot, SyncTrigger::Import);

        match WatchedFileHandle::adopt(capability, file.modified_ms, self.inner.store.as_ref())
            .await
        {
            Ok(handle) => *self.inner.watched.lock().await = Some(handle),
            Err(e) => tracing::warn!(error = %e, "imported file could not be watched"),
        }

        Ok(SyncOutcome::Applied(snapshot))
    }

    // ── Versions ───────────────────────────────────────────────────────

    pub async fn list_versions(&self) -> Result<VersionListing> {
        self.inner.versions.list().await
    }

    /// Roll the dataset back and apply the result like a completed sync.
    pub async fn rollback(&self, version: u64) -> Result<DatasetSnapshot> {
        let snapshot = self.inner.versions.rollback(version).await?;
        self.apply(&snapshot, SyncTrigger::Rollback);
        Ok(snapshot)
    }

    pub async fn derived_columns(&self) -> Result<Vec<DerivedColumn>> {
        self.inner.service.derived_columns().await
    }

    // ── Timer ticks ────────────────────────────────────────────────────

    /// Auto mode: sync only when the watched file's mtime advanced. Every
    /// failure is logged and swallowed; the next tick retries.
    async fn auto_tick(&self, generation: u64) {
        if self.is_syncing() {
            return;
        }
        let Some(mut handle) = self.watched_file().await else {
            return;
        };

        let permission = handle.check_permission().await;
        if permission != PermissionState::Granted {
            tracing::debug!(?permission, "auto sync skipped: no read access");
            self.remember_permission(&handle).await;
            return;
        }

        match handle.has_changed().await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                tracing::warn!(error = %e, "auto sync check failed");
                return;
            }
        }

        let file = match handle.read().await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "auto sync read failed");
                return;
            }
        };
        if !self.is_armed(generation) {
            return;
        }
        if let Err(e) = self.perform_sync(file, SyncTrigger::Auto).await {
            tracing::debug!(error = %e, "auto sync attempt failed");
        }
    }

    /// Scheduled mode: sync the watched file unconditionally. Without a
    /// readable capability, ask the server whether its copy went stale and
    /// reload it if so.
    async fn scheduled_tick(&self, generation: u64) {
        if self.is_syncing() {
            return;
        }

        if let Some(mut handle) = self.watched_file().await {
            let permission = handle.check_permission().await;
            if permission == PermissionState::Granted {
                match handle.read().await {
                    Ok(file) => {
                        if !self.is_armed(generation) {
                            return;
                        }
                        if let Err(e) = self.perform_sync(file, SyncTrigger::Scheduled).await {
                            tracing::debug!(error = %e, "scheduled sync attempt failed");
                        }
                        return;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "scheduled read failed; checking server copy")
                    }
                }
            } else {
                tracing::debug!(?permission, "no read access; checking server copy");
                self.remember_permission(&handle).await;
            }
        }

        if !self.is_armed(generation) {
            return;
        }
        match self.inner.service.file_status().await {
            Ok(status) if status.modified => {
                if !self.is_armed(generation) {
                    return;
                }
                if let Err(e) = self.reload_from_server(SyncTrigger::Scheduled).await {
                    tracing::debug!(error = %e, "scheduled reload failed");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "server staleness check failed"),
        }
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn timers(&self) -> MutexGuard<'_, TimerState> {
        self.inner.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the ticker armed at `generation` is still the current one.
    fn is_armed(&self, generation: u64) -> bool {
        let current = self.timers().generation;
        if current != generation {
            tracing::debug!(generation, current, "mode changed during tick; nothing sent");
        }
        current == generation
    }

    fn workspace_write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Dataset>> {
        self.inner
            .workspace
            .write()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn report_stage(&self, stage: &str, percent: u8) {
        self.inner.reporter.report(UploadProgressEvent::Sync {
            stage: stage.to_string(),
            percent,
        });
    }

    /// Replace the dataset mirror and notify consumers.
    fn apply(&self, snapshot: &DatasetSnapshot, trigger: SyncTrigger) {
        let dataset = {
            let mut ws = self.workspace_write();
            let dataset = Dataset::from_snapshot(snapshot, ws.as_ref());
            *ws = Some(dataset.clone());
            dataset
        };

        tracing::info!(
            %trigger,
            file = %dataset.filename,
            version = dataset.current_version,
            rows = dataset.row_count,
            "dataset updated"
        );

        for err in &snapshot.replay_errors {
            tracing::warn!(column = %err.name, error = %err.error, "derived column failed to replay");
            let _ = self.inner.events.send(SyncEvent::ReplayWarning {
                column: err.name.clone(),
                message: err.error.clone(),
            });
        }

        let _ = self.inner.events.send(SyncEvent::SnapshotApplied {
            trigger,
            snapshot: snapshot.clone(),
        });
    }

    fn failed(&self, trigger: SyncTrigger, e: SyncError) -> SyncError {
        tracing::warn!(%trigger, error = %e, "sync failed");
        let _ = self.inner.events.send(SyncEvent::SyncFailed {
            trigger,
            message: e.to_string(),
        });
        e
    }

    /// Advance the watched baseline after a successful sync of that file.
    async fn mark_seen(&self, filename: &str, modified_ms: i64) {
        let mut watched = self.inner.watched.lock().await;
        if let Some(handle) = watched.as_mut() {
            if handle.filename() != filename {
                return;
            }
            if let Err(e) = handle
                .mark_seen(modified_ms, self.inner.store.as_ref())
                .await
            {
                tracing::warn!(error = %e, "could not persist watched file baseline");
            }
        }
    }

    /// Record a freshly observed permission state on the shared handle.
    async fn remember_permission(&self, observed: &WatchedFileHandle) {
        let mut watched = self.inner.watched.lock().await;
        if let Some(handle) = watched.as_mut() {
            if handle.location() == observed.location() {
                handle.record_permission(observed.permission());
            }
        }
    }
}

fn spawn_ticker(
    inner: Weak<EngineInner>,
    mode: SyncMode,
    period: Duration,
    generation: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(engine) = inner.upgrade() else {
                break;
            };
            let controller = SyncModeController { inner: engine };
            // Detached so aborting the ticker never cancels a started sync.
            tokio::spawn(async move {
                match mode {
                    SyncMode::Auto => controller.auto_tick(generation).await,
                    SyncMode::Scheduled => controller.scheduled_tick(generation).await,
                    SyncMode::Manual => {}
                }
            });
        }
    })
}

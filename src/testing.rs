//! In-process fakes shared by unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::{Result, SyncError};
use crate::models::{
    DatasetSnapshot, DatasetVersion, DerivedColumn, FileContents, FileStatus, InitResponse,
    PermissionState, ReplayError, StatusReport, UploadStatus, VersionListing,
};
use crate::progress::{UploadProgressEvent, UploadProgressReporter};
use crate::service::DatasetService;
use crate::watched_file::FileCapability;

/// A service call as observed by [`FakeService`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Init { filename: String, file_size: u64 },
    Chunk { dataset_id: String, index: usize, len: usize },
    Finalize { dataset_id: String },
    Status { dataset_id: String },
    SyncUpload { filename: String, len: usize },
    FileStatus,
    Reload,
    Current,
    ListVersions,
    Rollback { version: u64 },
    DerivedColumns,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    next_id: u32,
    chunk_size_hint: Option<usize>,
    init_failure: Option<String>,
    chunk_failure_at: Option<usize>,
    processing_polls: usize,
    polls_seen: HashMap<String, usize>,
    processing_failure: Option<String>,
    sync_failure: Option<String>,
    replay_errors: Vec<ReplayError>,
    versions: Vec<DatasetVersion>,
    current_version: u64,
    filename: String,
    file_modified: bool,
    has_current: bool,
}

/// Scriptable in-memory dataset service with a real version ledger.
#[derive(Default)]
pub struct FakeService {
    state: Mutex<FakeState>,
    sync_gate: Option<Arc<Semaphore>>,
}

pub fn snapshot(filename: &str, version: u64) -> DatasetSnapshot {
    DatasetSnapshot {
        dataset_id: Some("ds-1".to_string()),
        filename: filename.to_string(),
        rows: 100,
        columns: vec!["date".into(), "well".into(), "oil".into()],
        numeric_columns: vec!["oil".into()],
        date_columns: vec!["date".into()],
        version,
        last_import: Some("2026-01-01T00:00:00+00:00".into()),
        has_disk_path: false,
        replay_errors: vec![],
        rolled_back_to: None,
    }
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size_hint(self, size: usize) -> Self {
        self.state.lock().unwrap().chunk_size_hint = Some(size);
        self
    }

    pub fn with_init_failure(self, detail: &str) -> Self {
        self.state.lock().unwrap().init_failure = Some(detail.to_string());
        self
    }

    pub fn with_chunk_failure_at(self, index: usize) -> Self {
        self.state.lock().unwrap().chunk_failure_at = Some(index);
        self
    }

    pub fn with_processing_polls(self, polls: usize) -> Self {
        self.state.lock().unwrap().processing_polls = polls;
        self
    }

    pub fn with_processing_failure(self, message: &str) -> Self {
        self.state.lock().unwrap().processing_failure = Some(message.to_string());
        self
    }

    pub fn with_replay_errors(self, errors: Vec<ReplayError>) -> Self {
        self.state.lock().unwrap().replay_errors = errors;
        self
    }

    /// Seed a ledger of `count` versions with the last one current.
    pub fn with_versions(self, count: u64) -> Self {
        {
            let mut st = self.state.lock().unwrap();
            st.filename = "wells.csv".to_string();
            st.has_current = count > 0;
            for v in 1..=count {
                st.versions.push(version_entry(v));
            }
            st.current_version = count;
        }
        self
    }

    pub fn with_server_file_modified(self, modified: bool) -> Self {
        self.state.lock().unwrap().file_modified = modified;
        self
    }

    /// Hold every `sync_upload` until a permit is added to the returned gate.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.sync_gate = Some(gate.clone());
        (self, gate)
    }

    pub fn set_sync_failure(&self, detail: Option<&str>) {
        self.state.lock().unwrap().sync_failure = detail.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn version_count(&self) -> usize {
        self.state.lock().unwrap().versions.len()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn version_entry(v: u64) -> DatasetVersion {
    DatasetVersion {
        version: v,
        timestamp: format!("2026-01-0{}T00:00:00+00:00", v.min(9)),
        rows: 100 + v,
        columns: 3,
        status: Some("ok".to_string()),
    }
}

fn append_version(st: &mut FakeState) -> DatasetSnapshot {
    let v = st.versions.last().map(|e| e.version).unwrap_or(0) + 1;
    st.versions.push(version_entry(v));
    st.current_version = v;
    st.has_current = true;
    let mut snap = snapshot(&st.filename, v);
    snap.replay_errors = st.replay_errors.clone();
    snap
}

#[async_trait]
impl DatasetService for FakeService {
    async fn init_upload(&self, filename: &str, file_size: u64) -> Result<InitResponse> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(Call::Init {
            filename: filename.to_string(),
            file_size,
        });
        if let Some(detail) = &st.init_failure {
            return Err(SyncError::Validation(detail.clone()));
        }
        st.next_id += 1;
        st.filename = filename.to_string();
        Ok(InitResponse {
            dataset_id: format!("ds-{}", st.next_id),
            chunk_size: st.chunk_size_hint,
        })
    }

    async fn upload_chunk(
        &self,
        dataset_id: &str,
        chunk_index: usize,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(Call::Chunk {
            dataset_id: dataset_id.to_string(),
            index: chunk_index,
            len: bytes.len(),
        });
        if st.chunk_failure_at == Some(chunk_index) {
            return Err(SyncError::Transport(format!("chunk {} rejected", chunk_index)));
        }
        Ok(())
    }

    async fn finalize_upload(&self, dataset_id: &str) -> Result<()> {
        self.record(Call::Finalize {
            dataset_id: dataset_id.to_string(),
        });
        Ok(())
    }

    async fn dataset_status(&self, dataset_id: &str) -> Result<StatusReport> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(Call::Status {
            dataset_id: dataset_id.to_string(),
        });
        let seen = {
            let n = st.polls_seen.entry(dataset_id.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if seen <= st.processing_polls {
            return Ok(StatusReport {
                status: UploadStatus::Processing,
                progress: 30,
                error: None,
                snapshot: None,
            });
        }
        if let Some(message) = &st.processing_failure {
            return Ok(StatusReport {
                status: UploadStatus::Error,
                progress: 0,
                error: Some(message.clone()),
                snapshot: None,
            });
        }
        let mut snap = append_version(&mut st);
        snap.dataset_id = Some(dataset_id.to_string());
        Ok(StatusReport {
            status: UploadStatus::Ready,
            progress: 100,
            error: None,
            snapshot: Some(snap),
        })
    }

    async fn sync_upload(&self, filename: &str, bytes: Vec<u8>) -> Result<DatasetSnapshot> {
        self.record(Call::SyncUpload {
            filename: filename.to_string(),
            len: bytes.len(),
        });
        if let Some(gate) = &self.sync_gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| SyncError::Transport(e.to_string()))?;
            permit.forget();
        }
        let mut st = self.state.lock().unwrap();
        if let Some(detail) = &st.sync_failure {
            return Err(SyncError::processing(detail.clone()));
        }
        st.filename = filename.to_string();
        Ok(append_version(&mut st))
    }

    async fn file_status(&self) -> Result<FileStatus> {
        let st = {
            let mut st = self.state.lock().unwrap();
            st.calls.push(Call::FileStatus);
            st.file_modified
        };
        Ok(FileStatus {
            modified: st,
            has_disk_path: true,
            disk_mtime: None,
        })
    }

    async fn reload(&self) -> Result<DatasetSnapshot> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(Call::Reload);
        st.file_modified = false;
        if st.filename.is_empty() {
            st.filename = "wells.csv".to_string();
        }
        let mut snap = append_version(&mut st);
        snap.has_disk_path = true;
        Ok(snap)
    }

    async fn current(&self) -> Result<Option<DatasetSnapshot>> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(Call::Current);
        if !st.has_current {
            return Ok(None);
        }
        Ok(Some(snapshot(&st.filename, st.current_version)))
    }

    async fn list_versions(&self) -> Result<VersionListing> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(Call::ListVersions);
        Ok(VersionListing {
            dataset_id: Some("ds-1".to_string()),
            versions: st.versions.clone(),
            current_version: st.current_version,
        })
    }

    async fn rollback(&self, version: u64) -> Result<DatasetSnapshot> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(Call::Rollback { version });
        if !st.versions.iter().any(|v| v.version == version) {
            return Err(SyncError::Conflict(format!("Version {} not found.", version)));
        }
        st.current_version = version;
        let mut snap = snapshot(&st.filename, version);
        snap.rolled_back_to = Some(version);
        Ok(snap)
    }

    async fn derived_columns(&self) -> Result<Vec<DerivedColumn>> {
        self.record(Call::DerivedColumns);
        Ok(vec![DerivedColumn {
            name: "ratio".to_string(),
            formula: "oil / water".to_string(),
        }])
    }
}

struct FakeFileState {
    bytes: Vec<u8>,
    modified_ms: i64,
    permission: PermissionState,
    reads: usize,
}

/// A watched-file capability whose timestamp and permission tests control.
pub struct FakeFile {
    path: PathBuf,
    filename: String,
    state: Mutex<FakeFileState>,
    permission_gate: Option<Arc<Semaphore>>,
}

impl FakeFile {
    pub fn new(filename: &str, bytes: &[u8], modified_ms: i64) -> Self {
        Self {
            path: PathBuf::from("/fake").join(filename),
            filename: filename.to_string(),
            state: Mutex::new(FakeFileState {
                bytes: bytes.to_vec(),
                modified_ms,
                permission: PermissionState::Granted,
                reads: 0,
            }),
            permission_gate: None,
        }
    }

    /// Hold every `query_permission` until a permit is added to the returned gate.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.permission_gate = Some(gate.clone());
        (self, gate)
    }

    pub fn touch(&self, modified_ms: i64) {
        self.state.lock().unwrap().modified_ms = modified_ms;
    }

    pub fn set_permission(&self, permission: PermissionState) {
        self.state.lock().unwrap().permission = permission;
    }

    pub fn reads(&self) -> usize {
        self.state.lock().unwrap().reads
    }
}

#[async_trait]
impl FileCapability for FakeFile {
    fn filename(&self) -> &str {
        &self.filename
    }

    fn location(&self) -> &Path {
        &self.path
    }

    async fn modified_ms(&self) -> Result<i64> {
        let st = self.state.lock().unwrap();
        if st.permission != PermissionState::Granted {
            return Err(SyncError::Permission("fake file not readable".into()));
        }
        Ok(st.modified_ms)
    }

    async fn read(&self) -> Result<FileContents> {
        let mut st = self.state.lock().unwrap();
        if st.permission != PermissionState::Granted {
            return Err(SyncError::Permission("fake file not readable".into()));
        }
        st.reads += 1;
        Ok(FileContents {
            filename: self.filename.clone(),
            bytes: st.bytes.clone(),
            modified_ms: st.modified_ms,
        })
    }

    async fn query_permission(&self) -> PermissionState {
        if let Some(gate) = &self.permission_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.state.lock().unwrap().permission
    }

    async fn request_permission(&self) -> PermissionState {
        self.state.lock().unwrap().permission
    }
}

/// Collects progress events for assertions.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<UploadProgressEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<UploadProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl UploadProgressReporter for RecordingProgress {
    fn report(&self, event: UploadProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

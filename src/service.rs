//! Client side of the dataset-processing service.
//!
//! [`DatasetService`] names every call the engine makes; [`HttpDatasetService`]
//! implements it over HTTP with `reqwest`. Tests substitute in-process fakes.
//!
//! # Endpoints
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | `POST` | `/upload/init` | Reserve a dataset id for a chunked upload |
//! | `POST` | `/upload/chunk?dataset_id&chunk_index` | Append one chunk (multipart `file`) |
//! | `POST` | `/upload/finalize?dataset_id` | Start parsing/conversion |
//! | `GET`  | `/dataset/{id}/status` | Poll processing state |
//! | `POST` | `/sync/upload` | One-shot whole-file sync (multipart `file`) |
//! | `GET`  | `/file_status` | Server-side staleness check of the imported path |
//! | `GET`  | `/reload` | Re-read the imported path on the server |
//! | `GET`  | `/current` | Active dataset, 404 when none |
//! | `GET`  | `/versions` | Version ledger |
//! | `POST` | `/versions/rollback?version=N` | Make version N current |
//! | `GET`  | `/derived_columns` | Registered replay pipeline |
//!
//! # Error mapping
//!
//! Non-success responses carry `{"detail": "..."}`. Client errors (4xx) map to
//! the taxonomy entry that fits the call (validation for init, processing for
//! sync/reload, conflict for rollback); everything else is a transport error.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use crate::config::ServiceConfig;
use crate::error::{Result, SyncError};
use crate::models::{
    DatasetSnapshot, DerivedColumn, FileStatus, InitResponse, StatusReport, VersionListing,
};

#[async_trait]
pub trait DatasetService: Send + Sync {
    async fn init_upload(&self, filename: &str, file_size: u64) -> Result<InitResponse>;

    /// Send one chunk, tagged with its ordinal position.
    async fn upload_chunk(&self, dataset_id: &str, chunk_index: usize, bytes: Vec<u8>)
        -> Result<()>;

    async fn finalize_upload(&self, dataset_id: &str) -> Result<()>;

    async fn dataset_status(&self, dataset_id: &str) -> Result<StatusReport>;

    /// One-shot equivalent of init + chunks + finalize + poll for an
    /// already-imported dataset.
    async fn sync_upload(&self, filename: &str, bytes: Vec<u8>) -> Result<DatasetSnapshot>;

    async fn file_status(&self) -> Result<FileStatus>;

    async fn reload(&self) -> Result<DatasetSnapshot>;

    /// The active dataset, or `None` when the service has nothing loaded.
    async fn current(&self) -> Result<Option<DatasetSnapshot>>;

    async fn list_versions(&self) -> Result<VersionListing>;

    async fn rollback(&self, version: u64) -> Result<DatasetSnapshot>;

    async fn derived_columns(&self) -> Result<Vec<DerivedColumn>>;
}

/// Which taxonomy entry a 4xx response becomes for a given call.
#[derive(Clone, Copy)]
enum ClientErrorKind {
    Transport,
    Validation,
    Processing,
    Conflict,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

#[derive(Deserialize)]
struct DerivedColumnsBody {
    #[serde(default)]
    columns: Vec<DerivedColumn>,
}

/// [`DatasetService`] over HTTP.
pub struct HttpDatasetService {
    client: Client,
    api_root: String,
}

impl HttpDatasetService {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            api_root: config.api_root(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_root, path)
    }

    fn file_form(filename: &str, bytes: Vec<u8>) -> Form {
        Form::new().part("file", Part::bytes(bytes).file_name(filename.to_string()))
    }
}

/// Turn a non-success response into a [`SyncError`]; pass successes through.
async fn check(resp: Response, call: &str, kind: ClientErrorKind) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|b| b.detail)
        .unwrap_or_else(|| {
            if text.is_empty() {
                status.to_string()
            } else {
                text.clone()
            }
        });

    let retryable = status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS;
    if !status.is_client_error() || retryable {
        return Err(SyncError::Transport(format!(
            "{} failed ({}): {}",
            call, status, detail
        )));
    }

    Err(match kind {
        ClientErrorKind::Transport => {
            SyncError::Transport(format!("{} failed ({}): {}", call, status, detail))
        }
        ClientErrorKind::Validation => SyncError::Validation(detail),
        ClientErrorKind::Processing => SyncError::processing(detail),
        ClientErrorKind::Conflict => SyncError::Conflict(detail),
    })
}

async fn json<T: serde::de::DeserializeOwned>(resp: Response, call: &str) -> Result<T> {
    resp.json::<T>()
        .await
        .map_err(|e| SyncError::Transport(format!("{}: invalid response body: {}", call, e)))
}

#[async_trait]
impl DatasetService for HttpDatasetService {
    async fn init_upload(&self, filename: &str, file_size: u64) -> Result<InitResponse> {
        let resp = self
            .client
            .post(self.url("/upload/init"))
            .json(&serde_json::json!({ "filename": filename, "file_size": file_size }))
            .send()
            .await?;
        let resp = check(resp, "upload init", ClientErrorKind::Validation).await?;
        json(resp, "upload init").await
    }

    async fn upload_chunk(
        &self,
        dataset_id: &str,
        chunk_index: usize,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let form = Self::file_form(&format!("chunk_{}", chunk_index), bytes);
        let resp = self
            .client
            .post(self.url("/upload/chunk"))
            .query(&[("dataset_id", dataset_id.to_string()), ("chunk_index", chunk_index.to_string())])
            .multipart(form)
            .send()
            .await?;
        check(
            resp,
            &format!("chunk {}", chunk_index),
            ClientErrorKind::Transport,
        )
        .await?;
        Ok(())
    }

    async fn finalize_upload(&self, dataset_id: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.url("/upload/finalize"))
            .query(&[("dataset_id", dataset_id)])
            .send()
            .await?;
        check(resp, "finalize", ClientErrorKind::Transport).await?;
        Ok(())
    }

    async fn dataset_status(&self, dataset_id: &str) -> Result<StatusReport> {
        let resp = self
            .client
            .get(self.url(&format!("/dataset/{}/status", dataset_id)))
            .send()
            .await?;
        let resp = check(resp, "status check", ClientErrorKind::Transport).await?;
        json(resp, "status check").await
    }

    async fn sync_upload(&self, filename: &str, bytes: Vec<u8>) -> Result<DatasetSnapshot> {
        let resp = self
            .client
            .post(self.url("/sync/upload"))
            .multipart(Self::file_form(filename, bytes))
            .send()
            .await?;
        let resp = check(resp, "sync upload", ClientErrorKind::Processing).await?;
        json(resp, "sync upload").await
    }

    async fn file_status(&self) -> Result<FileStatus> {
        let resp = self.client.get(self.url("/file_status")).send().await?;
        let resp = check(resp, "file status", ClientErrorKind::Transport).await?;
        json(resp, "file status").await
    }

    async fn reload(&self) -> Result<DatasetSnapshot> {
        let resp = self.client.get(self.url("/reload")).send().await?;
        let resp = check(resp, "reload", ClientErrorKind::Processing).await?;
        json(resp, "reload").await
    }

    async fn current(&self) -> Result<Option<DatasetSnapshot>> {
        let resp = self.client.get(self.url("/current")).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check(resp, "current dataset", ClientErrorKind::Transport).await?;
        json(resp, "current dataset").await.map(Some)
    }

    async fn list_versions(&self) -> Result<VersionListing> {
        let resp = self.client.get(self.url("/versions")).send().await?;
        let resp = check(resp, "list versions", ClientErrorKind::Transport).await?;
        json(resp, "list versions").await
    }

    async fn rollback(&self, version: u64) -> Result<DatasetSnapshot> {
        let resp = self
            .client
            .post(self.url("/versions/rollback"))
            .query(&[("version", version)])
            .send()
            .await?;
        let resp = check(resp, "rollback", ClientErrorKind::Conflict).await?;
        json(resp, "rollback").await
    }

    async fn derived_columns(&self) -> Result<Vec<DerivedColumn>> {
        let resp = self.client.get(self.url("/derived_columns")).send().await?;
        let resp = check(resp, "derived columns", ClientErrorKind::Transport).await?;
        let body: DerivedColumnsBody = json(resp, "derived columns").await?;
        Ok(body.columns)
    }
}

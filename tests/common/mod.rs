//! A fake dataset service over real HTTP, served by axum on an ephemeral port.

#![allow(dead_code)]

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub dataset_id: String,
    pub index: usize,
    pub len: usize,
}

#[derive(Default)]
pub struct ServerState {
    pub next_id: u32,
    pub filename: String,
    pub rows: u64,
    pub columns: Vec<String>,
    pub versions: Vec<(u64, u64)>,
    pub current: Option<u64>,
    pub chunks: Vec<ChunkRecord>,
    pub status_polls: usize,
    pub sync_uploads: usize,
    pub file_modified: bool,
    pub has_disk_path: bool,
}

type Shared = Arc<Mutex<ServerState>>;

pub struct FakeServer {
    pub addr: SocketAddr,
    pub state: Shared,
}

impl FakeServer {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(ServerState::default()));
        let app = Router::new()
            .route("/api/upload/init", post(init))
            .route("/api/upload/chunk", post(chunk))
            .route("/api/upload/finalize", post(finalize))
            .route("/api/dataset/{id}/status", get(status))
            .route("/api/sync/upload", post(sync_upload))
            .route("/api/file_status", get(file_status))
            .route("/api/reload", get(reload))
            .route("/api/current", get(current))
            .route("/api/versions", get(versions))
            .route("/api/versions/rollback", post(rollback))
            .route("/api/derived_columns", get(derived_columns))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn chunks(&self) -> Vec<ChunkRecord> {
        self.state.lock().unwrap().chunks.clone()
    }

    pub fn sync_uploads(&self) -> usize {
        self.state.lock().unwrap().sync_uploads
    }

    pub fn version_count(&self) -> usize {
        self.state.lock().unwrap().versions.len()
    }

    pub fn set_file_modified(&self, modified: bool) {
        self.state.lock().unwrap().file_modified = modified;
    }
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

/// Parse CSV bytes the way the service would, keeping only the shape.
fn load(st: &mut ServerState, filename: &str, bytes: &[u8]) -> Result<(), String> {
    let text = std::str::from_utf8(bytes).map_err(|_| "Failed to parse file: not UTF-8".to_string())?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| "Failed to parse file: empty file".to_string())?;
    st.filename = filename.to_string();
    st.columns = header.split(',').map(|c| c.trim().to_string()).collect();
    st.rows = lines.count() as u64;
    Ok(())
}

fn append_version(st: &mut ServerState) -> u64 {
    let v = st.versions.last().map(|(v, _)| *v).unwrap_or(0) + 1;
    st.versions.push((v, st.rows));
    st.current = Some(v);
    v
}

fn ready_shape(st: &ServerState, version: u64) -> Value {
    json!({
        "dataset_id": "ds-1",
        "filename": st.filename,
        "rows": st.rows,
        "columns": st.columns,
        "numeric_columns": st.columns.iter().skip(1).collect::<Vec<_>>(),
        "date_columns": [],
        "version": version,
        "last_import": "2026-10-18T00:00:00+00:00",
        "has_disk_path": st.has_disk_path,
        "replay_errors": [],
    })
}

async fn file_bytes(mut multipart: Multipart) -> Result<(String, Vec<u8>), Response> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| detail(StatusCode::BAD_REQUEST, &e.to_string()))?
    {
        if field.name() == Some("file") {
            let name = field.file_name().unwrap_or("upload").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| detail(StatusCode::BAD_REQUEST, &e.to_string()))?;
            return Ok((name, bytes.to_vec()));
        }
    }
    Err(detail(StatusCode::BAD_REQUEST, "missing file field"))
}

#[derive(Deserialize)]
struct InitBody {
    filename: String,
    file_size: u64,
}

async fn init(State(state): State<Shared>, Json(body): Json<InitBody>) -> Response {
    if !(body.filename.ends_with(".csv") || body.filename.ends_with(".xlsx")) {
        return detail(StatusCode::BAD_REQUEST, "Unsupported file type");
    }
    if body.file_size == 0 {
        return detail(StatusCode::BAD_REQUEST, "Empty file");
    }
    let mut st = state.lock().unwrap();
    st.next_id += 1;
    st.filename = body.filename;
    Json(json!({ "dataset_id": format!("ds-{}", st.next_id) })).into_response()
}

#[derive(Deserialize)]
struct ChunkQuery {
    dataset_id: String,
    chunk_index: usize,
}

async fn chunk(
    State(state): State<Shared>,
    Query(q): Query<ChunkQuery>,
    multipart: Multipart,
) -> Response {
    let (_, bytes) = match file_bytes(multipart).await {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let mut st = state.lock().unwrap();
    let expected = st
        .chunks
        .iter()
        .filter(|c| c.dataset_id == q.dataset_id)
        .count();
    if q.chunk_index != expected {
        return detail(StatusCode::BAD_REQUEST, "chunk out of order");
    }
    st.chunks.push(ChunkRecord {
        dataset_id: q.dataset_id,
        index: q.chunk_index,
        len: bytes.len(),
    });
    Json(json!({ "received": q.chunk_index })).into_response()
}

#[derive(Deserialize)]
struct DatasetQuery {
    dataset_id: String,
}

async fn finalize(State(state): State<Shared>, Query(q): Query<DatasetQuery>) -> Response {
    let st = state.lock().unwrap();
    if !st.chunks.iter().any(|c| c.dataset_id == q.dataset_id) {
        return detail(StatusCode::NOT_FOUND, "Dataset not found");
    }
    Json(json!({ "status": "processing" })).into_response()
}

async fn status(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut st = state.lock().unwrap();
    st.status_polls += 1;
    if st.status_polls == 1 {
        return Json(json!({ "status": "processing", "progress": 50 })).into_response();
    }

    let total: usize = st
        .chunks
        .iter()
        .filter(|c| c.dataset_id == id)
        .map(|c| c.len)
        .sum();
    st.rows = total as u64;
    st.columns = vec!["date".into(), "oil".into()];
    let v = append_version(&mut st);
    let mut body = ready_shape(&st, v);
    body["status"] = json!("ready");
    body["progress"] = json!(100);
    body["dataset_id"] = json!(id);
    Json(body).into_response()
}

async fn sync_upload(State(state): State<Shared>, multipart: Multipart) -> Response {
    let (name, bytes) = match file_bytes(multipart).await {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let mut st = state.lock().unwrap();
    st.sync_uploads += 1;
    if let Err(message) = load(&mut st, &name, &bytes) {
        return detail(StatusCode::BAD_REQUEST, &message);
    }
    let v = append_version(&mut st);
    Json(ready_shape(&st, v)).into_response()
}

async fn file_status(State(state): State<Shared>) -> Response {
    let st = state.lock().unwrap();
    Json(json!({ "modified": st.file_modified, "has_disk_path": st.has_disk_path })).into_response()
}

async fn reload(State(state): State<Shared>) -> Response {
    let mut st = state.lock().unwrap();
    if st.current.is_none() {
        return detail(StatusCode::BAD_REQUEST, "No file loaded");
    }
    st.file_modified = false;
    let v = append_version(&mut st);
    Json(ready_shape(&st, v)).into_response()
}

async fn current(State(state): State<Shared>) -> Response {
    let st = state.lock().unwrap();
    match st.current {
        Some(v) => Json(ready_shape(&st, v)).into_response(),
        None => detail(StatusCode::NOT_FOUND, "No dataset loaded"),
    }
}

async fn versions(State(state): State<Shared>) -> Response {
    let st = state.lock().unwrap();
    let entries: Vec<Value> = st
        .versions
        .iter()
        .map(|(v, rows)| {
            json!({
                "version": v,
                "timestamp": format!("2026-10-18T00:00:0{}+00:00", v % 10),
                "rows": rows,
                "columns": st.columns.len(),
                "status": "ok",
            })
        })
        .collect();
    Json(json!({
        "dataset_id": "ds-1",
        "versions": entries,
        "current_version": st.current.unwrap_or(0),
    }))
    .into_response()
}

#[derive(Deserialize)]
struct RollbackQuery {
    version: u64,
}

async fn rollback(State(state): State<Shared>, Query(q): Query<RollbackQuery>) -> Response {
    let mut st = state.lock().unwrap();
    let Some((_, rows)) = st.versions.iter().find(|(v, _)| *v == q.version).copied() else {
        return detail(
            StatusCode::NOT_FOUND,
            &format!("Version {} not found.", q.version),
        );
    };
    st.current = Some(q.version);
    st.rows = rows;
    // Reports the ledger length as `version`, alongside the real target.
    let mut body = ready_shape(&st, st.versions.len() as u64);
    body["rolled_back_to"] = json!(q.version);
    Json(body).into_response()
}

async fn derived_columns() -> Json<Value> {
    Json(json!({
        "columns": [
            { "name": "water_cut", "formula": "water / (oil + water)" },
            { "name": "gor", "formula": "gas / oil" },
        ]
    }))
}

//! Upload and sync progress reporting.
//!
//! The chunked uploader fires an event after every chunk and every status
//! poll; the sync controller fires one per stage of a one-shot sync.
//! Progress goes to **stderr** so stdout stays parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum UploadProgressEvent {
    /// Chunk `sent` of `total` was accepted.
    Chunk {
        filename: String,
        sent: usize,
        total: usize,
        percent: u8,
    },
    /// A status poll returned; `status` is the server-reported state.
    Processing {
        filename: String,
        status: String,
        percent: u8,
    },
    /// A stage of a one-shot sync (reading, uploading, applying).
    Sync { stage: String, percent: u8 },
}

/// Receives progress events. Implementations must not block.
pub trait UploadProgressReporter: Send + Sync {
    fn report(&self, event: UploadProgressEvent);
}

/// Human-friendly progress on stderr: "upload wells.csv  chunk 2 / 3  (66%)".
pub struct StderrProgress;

impl UploadProgressReporter for StderrProgress {
    fn report(&self, event: UploadProgressEvent) {
        let line = match &event {
            UploadProgressEvent::Chunk {
                filename,
                sent,
                total,
                percent,
            } => format!(
                "upload {}  chunk {} / {}  ({}%)\n",
                filename, sent, total, percent
            ),
            UploadProgressEvent::Processing {
                filename,
                status,
                percent,
            } => format!("upload {}  {}  ({}%)\n", filename, status, percent),
            UploadProgressEvent::Sync { stage, percent } => {
                format!("sync  {}  ({}%)\n", stage, percent)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl UploadProgressReporter for JsonProgress {
    fn report(&self, event: UploadProgressEvent) {
        let obj = match &event {
            UploadProgressEvent::Chunk {
                filename,
                sent,
                total,
                percent,
            } => serde_json::json!({
                "event": "progress",
                "phase": "uploading",
                "filename": filename,
                "chunk": sent,
                "total": total,
                "percent": percent
            }),
            UploadProgressEvent::Processing {
                filename,
                status,
                percent,
            } => serde_json::json!({
                "event": "progress",
                "phase": "processing",
                "filename": filename,
                "status": status,
                "percent": percent
            }),
            UploadProgressEvent::Sync { stage, percent } => serde_json::json!({
                "event": "progress",
                "phase": "sync",
                "stage": stage,
                "percent": percent
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl UploadProgressReporter for NoProgress {
    fn report(&self, _event: UploadProgressEvent) {}
}

/// Percentage of `done` out of `total`, rounded, clamped to 100.
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (done as f64 / total as f64 * 100.0).round();
    pct.min(100.0) as u8
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn UploadProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

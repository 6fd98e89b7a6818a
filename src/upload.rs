//! Chunked upload of a fresh file into a queryable dataset.
//!
//! The protocol has four stages, each terminal on failure:
//!
//! 1. **begin**: validate the file and reserve a dataset id.
//! 2. **send_chunks**: fixed-size byte ranges, strictly in ascending index
//!    order, one request at a time.
//! 3. **finalize**: a one-shot signal for the service to parse and convert.
//! 4. **poll_status**: fixed-interval polling until `ready` or `error`.
//!
//! There is no retry and no resumption: a new attempt starts over at chunk 0,
//! and chunks accepted by a failed attempt are left for the service to reclaim.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use crate::config::UploadConfig;
use crate::error::{Result, SyncError};
use crate::models::{DatasetSnapshot, FileContents, UploadSession, UploadStatus};
use crate::progress::{percent, UploadProgressEvent, UploadProgressReporter};
use crate::service::DatasetService;

/// Byte ranges of each chunk, in send order. The last range may be short.
pub fn chunk_ranges(len: usize, chunk_size: usize) -> impl Iterator<Item = Range<usize>> {
    let chunk_size = chunk_size.max(1);
    (0..len.div_ceil(chunk_size)).map(move |i| {
        let start = i * chunk_size;
        start..(start + chunk_size).min(len)
    })
}

pub struct ChunkedUploadOrchestrator {
    service: Arc<dyn DatasetService>,
    chunk_size: usize,
    poll_interval: Duration,
    reporter: Arc<dyn UploadProgressReporter>,
}

impl ChunkedUploadOrchestrator {
    pub fn new(
        service: Arc<dyn DatasetService>,
        config: &UploadConfig,
        reporter: Arc<dyn UploadProgressReporter>,
    ) -> Self {
        Self {
            service,
            chunk_size: config.chunk_size_bytes,
            poll_interval: config.poll_interval(),
            reporter,
        }
    }

    /// Run the full protocol and return the ready dataset.
    pub async fn import(&self, file: &FileContents) -> Result<DatasetSnapshot> {
        let mut session = self.begin(file).await?;
        self.send_chunks(&mut session, file).await?;
        self.finalize(&mut session).await?;
        self.poll_status(&mut session, &file.filename).await
    }

    /// Validate the file and reserve a dataset id. Nothing is sent on failure.
    pub async fn begin(&self, file: &FileContents) -> Result<UploadSession> {
        if file.filename.trim().is_empty() {
            return Err(SyncError::Validation("filename must not be empty".into()));
        }
        if file.bytes.is_empty() {
            return Err(SyncError::Validation(format!(
                "{} is empty",
                file.filename
            )));
        }
        if self.chunk_size == 0 {
            return Err(SyncError::Validation("chunk size must be > 0".into()));
        }

        let init = self
            .service
            .init_upload(&file.filename, file.bytes.len() as u64)
            .await?;

        let chunk_size = match init.chunk_size {
            Some(hint) if hint > 0 => hint,
            _ => self.chunk_size,
        };

        let session = UploadSession::new(init.dataset_id, file.bytes.len(), chunk_size);
        tracing::debug!(
            dataset_id = %session.dataset_id,
            total_chunks = session.total_chunks,
            chunk_size,
            "upload session initialized"
        );
        Ok(session)
    }

    /// Send every chunk in ascending order, stopping at the first failure.
    pub async fn send_chunks(&self, session: &mut UploadSession, file: &FileContents) -> Result<()> {
        session.status = UploadStatus::Uploading;

        for (index, range) in chunk_ranges(file.bytes.len(), session.chunk_size).enumerate() {
            let bytes = file.bytes[range].to_vec();
            if let Err(e) = self
                .service
                .upload_chunk(&session.dataset_id, index, bytes)
                .await
            {
                return Err(fail(session, e));
            }

            session.chunks_sent = index + 1;
            session.progress_percent = percent(session.chunks_sent, session.total_chunks);
            self.reporter.report(UploadProgressEvent::Chunk {
                filename: file.filename.clone(),
                sent: session.chunks_sent,
                total: session.total_chunks,
                percent: session.progress_percent,
            });
        }

        Ok(())
    }

    /// Ask the service to start processing. Sent exactly once per attempt.
    pub async fn finalize(&self, session: &mut UploadSession) -> Result<()> {
        session.status = UploadStatus::Finalizing;
        if let Err(e) = self.service.finalize_upload(&session.dataset_id).await {
            return Err(fail(session, e));
        }
        session.status = UploadStatus::Processing;
        Ok(())
    }

    /// Poll at a fixed interval until the service reaches a terminal state.
    /// No backoff and no attempt ceiling.
    pub async fn poll_status(
        &self,
        session: &mut UploadSession,
        filename: &str,
    ) -> Result<DatasetSnapshot> {
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let report = match self.service.dataset_status(&session.dataset_id).await {
                Ok(r) => r,
                Err(e) => return Err(fail(session, e)),
            };

            session.status = report.status;
            session.progress_percent = report.progress.min(100);
            self.reporter.report(UploadProgressEvent::Processing {
                filename: filename.to_string(),
                status: report.status.to_string(),
                percent: session.progress_percent,
            });

            if !report.status.is_terminal() {
                continue;
            }
            if report.status == UploadStatus::Error {
                let message = report
                    .error
                    .unwrap_or_else(|| "Processing failed".to_string());
                return Err(fail(session, SyncError::processing(message)));
            }
            return match report.snapshot {
                Some(snapshot) => Ok(snapshot),
                None => Err(fail(
                    session,
                    SyncError::Transport("status reported ready without a dataset summary".into()),
                )),
            };
        }
    }
}

fn fail(session: &mut UploadSession, e: SyncError) -> SyncError {
    session.status = UploadStatus::Error;
    session.error_message = Some(e.to_string());
    tracing::warn!(dataset_id = %session.dataset_id, error = %e, "upload attempt failed");
    e
}

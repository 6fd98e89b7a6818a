use thiserror::Error;

use crate::models::ReplayError;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Rejected input: empty file, bad filename, unusable interval.
    #[error("validation error: {0}")]
    Validation(String),

    /// Network failure or a non-success response from the service.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service could not parse or convert the dataset.
    #[error("processing error: {message}")]
    Processing {
        message: String,
        replay_errors: Vec<ReplayError>,
    },

    /// Read access to the watched file is missing or was revoked.
    #[error("permission error: {0}")]
    Permission(String),

    /// Rollback to a version that does not exist or is already current.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn processing(message: impl Into<String>) -> Self {
        SyncError::Processing {
            message: message.into(),
            replay_errors: Vec::new(),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Transport(e.to_string())
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, SyncError>;

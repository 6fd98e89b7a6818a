//! Durable storage for the one watched-file capability.
//!
//! The [`HandleStore`] trait exposes atomic put/get/delete against a single
//! logical slot ([`CURRENT_FILE_SLOT`]). Storing a new handle overwrites any
//! previous occupant, so at most one watched file exists across restarts.
//!
//! Implementations must be `Send + Sync` to be shared with timer tasks.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;

use crate::error::Result;
use crate::migrate;

pub use memory::MemoryHandleStore;

/// The only slot the engine ever uses.
pub const CURRENT_FILE_SLOT: &str = "current_file";

/// A persisted watched-file capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredHandle {
    pub path: PathBuf,
    pub filename: String,
    pub last_known_modified_ms: i64,
    /// Unix milliseconds when the record was last written.
    pub saved_at: i64,
}

#[async_trait]
pub trait HandleStore: Send + Sync {
    /// Replace the slot's occupant.
    async fn put(&self, handle: &StoredHandle) -> Result<()>;

    async fn get(&self) -> Result<Option<StoredHandle>>;

    /// Clear the slot. Clearing an empty slot is not an error.
    async fn delete(&self) -> Result<()>;
}

/// [`HandleStore`] backed by the `file_handles` SQLite table.
pub struct SqliteHandleStore {
    pool: SqlitePool,
}

impl SqliteHandleStore {
    /// Wrap a pool, creating the table if it does not exist yet.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        migrate::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl HandleStore for SqliteHandleStore {
    async fn put(&self, handle: &StoredHandle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO file_handles (slot, path, filename, last_known_modified_ms, saved_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(slot) DO UPDATE SET
                path = excluded.path,
                filename = excluded.filename,
                last_known_modified_ms = excluded.last_known_modified_ms,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(CURRENT_FILE_SLOT)
        .bind(handle.path.to_string_lossy().to_string())
        .bind(&handle.filename)
        .bind(handle.last_known_modified_ms)
        .bind(handle.saved_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self) -> Result<Option<StoredHandle>> {
        let row = sqlx::query(
            "SELECT path, filename, last_known_modified_ms, saved_at FROM file_handles WHERE slot = ?",
        )
        .bind(CURRENT_FILE_SLOT)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let path: String = row.get("path");
            StoredHandle {
                path: PathBuf::from(path),
                filename: row.get("filename"),
                last_known_modified_ms: row.get("last_known_modified_ms"),
                saved_at: row.get("saved_at"),
            }
        }))
    }

    async fn delete(&self) -> Result<()> {
        sqlx::query("DELETE FROM file_handles WHERE slot = ?")
            .bind(CURRENT_FILE_SLOT)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

//! # DCA Sync
//!
//! Client-side synchronization engine that keeps one local production-data
//! file consistent with a remote decline-curve analysis service.
//!
//! The service turns uploaded CSV/Excel bytes into a versioned, queryable
//! dataset. This crate decides *when* to send the file (manually, when its
//! modification time advances, or on a fixed schedule), *how* to send it
//! (chunked for first imports, one-shot for re-syncs), and keeps a cached
//! mirror of the active dataset plus access to the service's version ledger.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────┐   ┌─────────────────┐
//! │ HandleStore  │──▶│ WatchedFile     │──▶│ SyncMode        │
//! │ (SQLite)     │   │ (mtime check)   │   │ Controller      │
//! └──────────────┘   └─────────────────┘   └───┬─────────┬───┘
//!                                              │         │
//!                                   ┌──────────▼──┐  ┌───▼──────────┐
//!                                   │ ChunkedUpload│  │ VersionStore │
//!                                   └──────┬──────┘  └───┬──────────┘
//!                                          ▼             ▼
//!                                     ┌───────────────────────┐
//!                                     │ DatasetService (HTTP) │
//!                                     └───────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Wire and workspace data types |
//! | [`error`] | Error taxonomy |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Handle store schema |
//! | [`handle_store`] | Durable slot for the watched file |
//! | [`watched_file`] | File capability and change detection |
//! | [`service`] | Dataset service trait and HTTP client |
//! | [`upload`] | Chunked upload protocol |
//! | [`versions`] | Version ledger and rollback |
//! | [`controller`] | Sync modes, timers, and mutual exclusion |
//! | [`progress`] | Upload progress reporting |
//! | [`logging`] | Tracing subscriber setup |
//! | [`commands`] | CLI command implementations |

pub mod commands;
pub mod config;
pub mod controller;
pub mod db;
pub mod error;
pub mod handle_store;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod service;
pub mod upload;
pub mod versions;
pub mod watched_file;

#[cfg(test)]
pub(crate) mod testing;

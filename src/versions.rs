//! The service's version ledger: listing and rollback.
//!
//! Rollback only moves the "current" pointer. The ledger length never changes
//! because of it, and a rollback to a missing or already-current version is
//! rejected before any request is sent.

use std::sync::Arc;

use crate::error::{Result, SyncError};
use crate::models::{DatasetSnapshot, VersionListing};
use crate::service::DatasetService;

pub struct VersionStore {
    service: Arc<dyn DatasetService>,
}

impl VersionStore {
    pub fn new(service: Arc<dyn DatasetService>) -> Self {
        Self { service }
    }

    /// Ordered version records (oldest first) and the active version.
    pub async fn list(&self) -> Result<VersionListing> {
        let mut listing = self.service.list_versions().await?;
        listing.versions.sort_by_key(|v| v.version);
        Ok(listing)
    }

    /// Make `version` current. The returned snapshot must be applied like a
    /// completed sync.
    pub async fn rollback(&self, version: u64) -> Result<DatasetSnapshot> {
        let listing = self.list().await?;

        if !listing.contains(version) {
            return Err(SyncError::Conflict(format!(
                "version {} does not exist (available: {})",
                version,
                describe(&listing)
            )));
        }
        if listing.current_version == version {
            return Err(SyncError::Conflict(format!(
                "version {} is already current",
                version
            )));
        }

        let mut snapshot = self.service.rollback(version).await?;
        // Some service builds report the ledger length as `version`; the
        // rollback target is the authoritative current version.
        let target = snapshot.rolled_back_to.unwrap_or(version);
        snapshot.version = target;
        snapshot.rolled_back_to = Some(target);

        tracing::info!(version = target, "rolled back dataset");
        Ok(snapshot)
    }
}

fn describe(listing: &VersionListing) -> String {
    if listing.versions.is_empty() {
        return "none".to_string();
    }
    listing
        .versions
        .iter()
        .map(|v| format!("v{}", v.version))
        .collect::<Vec<_>>()
        .join(", ")
}

//! In-memory [`HandleStore`] for tests and hosts without a database.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::Result;

use super::{HandleStore, StoredHandle};

#[derive(Default)]
pub struct MemoryHandleStore {
    slot: RwLock<Option<StoredHandle>>,
}

impl MemoryHandleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HandleStore for MemoryHandleStore {
    async fn put(&self, handle: &StoredHandle) -> Result<()> {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = Some(handle.clone());
        Ok(())
    }

    async fn get(&self) -> Result<Option<StoredHandle>> {
        Ok(self.slot.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn delete(&self) -> Result<()> {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

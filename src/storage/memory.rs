// src/storage/memory.rs

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::core::metadata::{CheckpointMetadata, StoredCheckpoint};
use crate::error::{CheckpointError, Result};
use crate::storage::{sort_newest_first, StorageBackend};

/// An in-memory storage backend for checkpoints.
///
/// Primarily used for tests and ephemeral sessions. Checkpoints are kept in a
/// `DashMap` keyed by id for thread-safe concurrent access.
///
/// It also includes a mechanism to simulate save failures for testing error
/// handling paths, configurable via `set_fail_on_save`.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    checkpoints: Arc<DashMap<String, StoredCheckpoint>>,
    fail_on_save: Arc<Mutex<bool>>,
}

impl MemoryStorage {
    /// Creates a new, empty `MemoryStorage` instance.
    pub fn new() -> Self {
        Self {
            checkpoints: Arc::new(DashMap::new()),
            fail_on_save: Arc::new(Mutex::new(false)),
        }
    }

    /// Makes every following `save` fail until cleared.
    pub fn set_fail_on_save(&self, fail: bool) {
        *self.fail_on_save.lock() = fail;
    }

    /// Number of stored checkpoints.
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    /// Checks if the storage contains no checkpoints.
    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// Removes all checkpoints.
    pub fn clear(&self) {
        self.checkpoints.clear();
    }

    /// Mutable access to a stored checkpoint, for simulating on-disk damage.
    pub fn with_stored_mut<R>(&self, id: &str, f: impl FnOnce(&mut StoredCheckpoint) -> R) -> Option<R> {
        self.checkpoints.get_mut(id).map(|mut entry| f(entry.value_mut()))
    }

    /// Helper to create a boxed version of `MemoryStorage`.
    pub fn boxed(self) -> Box<dyn StorageBackend> {
        Box::new(self)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn save(&self, checkpoint: &StoredCheckpoint) -> Result<()> {
        if *self.fail_on_save.lock() {
            return Err(CheckpointError::storage(format!(
                "Simulated MemoryStorage write failure for checkpoint {}",
                checkpoint.metadata.id
            )));
        }
        self.checkpoints.insert(checkpoint.metadata.id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<StoredCheckpoint>> {
        Ok(self.checkpoints.get(id).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.checkpoints.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<CheckpointMetadata>> {
        let mut entries: Vec<CheckpointMetadata> = self
            .checkpoints
            .iter()
            .map(|entry| entry.value().metadata.clone())
            .collect();
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

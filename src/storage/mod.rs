// src/storage/mod.rs

//! Persistence for checkpoints.
//!
//! [`StorageBackend`] is the raw key-value seam keyed by checkpoint id.
//! [`CheckpointStorage`] sits on top of any backend and adds the policy:
//! id generation, retention limits, age pruning and integrity checks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::core::metadata::{CheckpointMetadata, StoredCheckpoint};
use crate::error::Result;
use crate::types::StorageType;

#[cfg(feature = "file-storage")]
pub mod file;
#[cfg(feature = "memory-storage")]
pub mod memory;
pub mod checkpoint_storage;
pub mod lock;

pub use checkpoint_storage::CheckpointStorage;
#[cfg(feature = "file-storage")]
pub use file::FileStorage;
pub use lock::StorageLock;
#[cfg(feature = "memory-storage")]
pub use memory::MemoryStorage;

/// Summary of what a backend holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    /// Number of stored checkpoints.
    pub total_checkpoints: usize,
    /// Sum of the stored checkpoints' content sizes.
    pub total_size: u64,
    /// Creation time of the oldest checkpoint.
    pub oldest_checkpoint: Option<DateTime<Utc>>,
    /// Creation time of the newest checkpoint.
    pub newest_checkpoint: Option<DateTime<Utc>>,
    /// Where the checkpoints live (a directory, or `memory`).
    pub location: String,
}

impl StorageStats {
    /// Builds stats from a metadata listing.
    pub fn from_metadata(entries: &[CheckpointMetadata], location: impl Into<String>) -> Self {
        Self {
            total_checkpoints: entries.len(),
            total_size: entries.iter().map(|m| m.size).sum(),
            oldest_checkpoint: entries.iter().map(|m| m.created_at).min(),
            newest_checkpoint: entries.iter().map(|m| m.created_at).max(),
            location: location.into(),
        }
    }
}

/// Raw persistence of [`StoredCheckpoint`]s keyed by `metadata.id`.
///
/// Implementations must leave previously stored checkpoints intact when a
/// `save` fails part-way.
#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Creates the backing location. Idempotent.
    async fn initialize(&self) -> Result<()>;

    /// Persists a checkpoint under its id.
    async fn save(&self, checkpoint: &StoredCheckpoint) -> Result<()>;

    /// Loads a checkpoint; `Ok(None)` if the id is unknown.
    async fn load(&self, id: &str) -> Result<Option<StoredCheckpoint>>;

    /// Removes a checkpoint; `Ok(false)` if the id is unknown.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Metadata of every stored checkpoint, newest first.
    async fn list(&self) -> Result<Vec<CheckpointMetadata>>;

    /// Human-readable location of the stored data.
    fn location(&self) -> String;

    /// Counts and date range of the stored checkpoints.
    async fn stats(&self) -> Result<StorageStats> {
        let entries = self.list().await?;
        Ok(StorageStats::from_metadata(&entries, self.location()))
    }
}

/// Sorts newest first, with the id as a tie-breaker for equal timestamps.
pub(crate) fn sort_newest_first(entries: &mut [CheckpointMetadata]) {
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}

/// Builds the backend selected by `config.storage` and initializes it.
pub async fn create_storage_backend(config: &Config) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config.storage.storage_type {
        #[cfg(feature = "memory-storage")]
        StorageType::Memory => Arc::new(MemoryStorage::new()),
        #[cfg(feature = "file-storage")]
        StorageType::File => Arc::new(FileStorage::new(config.storage_path()).await?),
        #[allow(unreachable_patterns)]
        other => {
            return Err(crate::error::CheckpointError::invalid_input(format!(
                "storage type '{}' is not enabled in this build",
                other
            )))
        }
    };
    backend.initialize().await?;
    Ok(backend)
}

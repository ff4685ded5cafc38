//! Policy layer over a [`StorageBackend`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::config::Config;
use crate::core::metadata::{CheckpointMetadata, NewCheckpoint, StoredCheckpoint, CHECKPOINT_FORMAT_VERSION};
use crate::core::state::CapturedState;
use crate::error::{CheckpointError, Result};
use crate::storage::{StorageBackend, StorageStats};
use crate::types::EvictionPolicy;

/// Wraps a backend with id generation, retention and integrity checks.
///
/// `load` and `delete` never fail: backend errors are logged and reported as
/// `None` / `false`. `save` returns the error since the caller must know the
/// checkpoint was not created.
#[derive(Debug)]
pub struct CheckpointStorage {
    backend: Arc<dyn StorageBackend>,
    max_checkpoints: usize,
    eviction: EvictionPolicy,
    last_created: Mutex<Option<DateTime<Utc>>>,
}

impl CheckpointStorage {
    /// Creates a policy layer keeping at most `max_checkpoints` checkpoints.
    pub fn new(backend: Arc<dyn StorageBackend>, max_checkpoints: usize, eviction: EvictionPolicy) -> Self {
        Self {
            backend,
            max_checkpoints: max_checkpoints.max(1),
            eviction,
            last_created: Mutex::new(None),
        }
    }

    /// Creates a policy layer with limits taken from `config.storage`.
    pub fn from_config(backend: Arc<dyn StorageBackend>, config: &Config) -> Self {
        Self::new(backend, config.storage.max_checkpoints, config.storage.eviction)
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Maximum number of checkpoints kept.
    pub fn max_checkpoints(&self) -> usize {
        self.max_checkpoints
    }

    /// Eviction policy applied when the limit is exceeded.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.eviction
    }

    /// Creates the backing storage location. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        self.backend.initialize().await
    }

    /// Persists `state` as a new checkpoint and returns its generated id.
    ///
    /// After a successful save the retention limit is enforced; eviction
    /// failures are logged and do not fail the save.
    pub async fn save(&self, state: CapturedState, request: NewCheckpoint) -> Result<String> {
        let created_at = self.next_created_at();
        let id = generate_id(created_at);
        let metadata = CheckpointMetadata {
            id: id.clone(),
            name: request.name,
            description: request.description,
            created_at,
            state_hash: state.state_hash.clone(),
            tags: request.tags,
            size: state.total_size,
            file_count: state.file_count,
            parent_id: request.parent_id,
            version: CHECKPOINT_FORMAT_VERSION,
            compressed: false,
            encrypted: false,
            metadata: request.metadata,
        };
        let checkpoint = StoredCheckpoint { metadata, state };

        if let Err(e) = self.backend.save(&checkpoint).await {
            error!("Failed to save checkpoint '{}': {}", checkpoint.metadata.name, e);
            return Err(CheckpointError::storage(format!(
                "Failed to save checkpoint '{}': {}",
                checkpoint.metadata.name, e
            )));
        }
        info!(
            "Saved checkpoint {} ('{}', {} files, {} bytes)",
            id, checkpoint.metadata.name, checkpoint.metadata.file_count, checkpoint.metadata.size
        );

        if let Err(e) = self.enforce_limit(&id).await {
            warn!("Failed to enforce checkpoint limit after saving {}: {}", id, e);
        }
        Ok(id)
    }

    /// Loads a checkpoint. Unknown ids and backend failures both yield `None`.
    pub async fn load(&self, id: &str) -> Option<StoredCheckpoint> {
        match self.backend.load(id).await {
            Ok(found) => found,
            Err(e) => {
                error!("Failed to load checkpoint {}: {}", id, e);
                None
            }
        }
    }

    /// Deletes a checkpoint; `false` if it did not exist or could not be removed.
    pub async fn delete(&self, id: &str) -> bool {
        match self.backend.delete(id).await {
            Ok(true) => {
                info!("Deleted checkpoint {}", id);
                true
            }
            Ok(false) => false,
            Err(e) => {
                error!("Failed to delete checkpoint {}: {}", id, e);
                false
            }
        }
    }

    /// Metadata of all checkpoints, newest first.
    pub async fn list(&self) -> Result<Vec<CheckpointMetadata>> {
        self.backend.list().await
    }

    /// The most recently created checkpoint.
    pub async fn latest(&self) -> Result<Option<CheckpointMetadata>> {
        Ok(self.list().await?.into_iter().next())
    }

    /// Counts, total size, date range and location of the stored checkpoints.
    pub async fn get_stats(&self) -> Result<StorageStats> {
        self.backend.stats().await
    }

    /// Deletes every checkpoint created more than `days` days ago and returns
    /// how many were removed.
    pub async fn prune_older_than(&self, days: u32) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let mut removed = 0;
        for metadata in self.list().await? {
            if metadata.created_at < cutoff && self.delete(&metadata.id).await {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Pruned {} checkpoints older than {} days", removed, days);
        }
        Ok(removed)
    }

    /// Re-derives the state hash of a stored checkpoint and compares it with
    /// the recorded one. A missing or unreadable checkpoint is not intact.
    pub async fn verify_integrity(&self, id: &str) -> bool {
        let Some(checkpoint) = self.load(id).await else {
            warn!("Cannot verify checkpoint {}: not found or unreadable", id);
            return false;
        };
        let intact = checkpoint.verify_integrity();
        if !intact {
            error!(
                "INTEGRITY FAILURE: checkpoint {} ('{}') no longer matches its recorded state hash; corrupted files: {:?}",
                id,
                checkpoint.metadata.name,
                checkpoint.state.corrupted_files()
            );
        }
        intact
    }

    /// Checkpoints with exactly this name, newest first.
    pub async fn find_by_name(&self, name: &str) -> Result<Vec<CheckpointMetadata>> {
        Ok(self.list().await?.into_iter().filter(|m| m.name == name).collect())
    }

    /// Checkpoints carrying this tag, newest first.
    pub async fn find_by_tag(&self, tag: &str) -> Result<Vec<CheckpointMetadata>> {
        Ok(self.list().await?.into_iter().filter(|m| m.has_tag(tag)).collect())
    }

    /// Deletes every checkpoint and returns how many were removed.
    pub async fn clear_all(&self) -> Result<usize> {
        let mut removed = 0;
        for metadata in self.list().await? {
            if self.delete(&metadata.id).await {
                removed += 1;
            }
        }
        info!("Cleared {} checkpoints", removed);
        Ok(removed)
    }

    /// Creation timestamps are strictly increasing within one storage so the
    /// retention order is well defined even for checkpoints saved in a burst.
    fn next_created_at(&self) -> DateTime<Utc> {
        let mut last = self.last_created.lock();
        let mut now = Utc::now();
        if let Some(previous) = *last {
            if now <= previous {
                now = previous + Duration::microseconds(1);
            }
        }
        *last = Some(now);
        now
    }

    async fn enforce_limit(&self, just_saved: &str) -> Result<()> {
        let mut entries = self.list().await?;
        if entries.len() <= self.max_checkpoints {
            return Ok(());
        }
        let excess = entries.len() - self.max_checkpoints;
        entries.retain(|m| m.id != just_saved);

        for victim in select_victims(entries, excess, self.eviction) {
            debug!("Evicting checkpoint {} ('{}')", victim.id, victim.name);
            if self.delete(&victim.id).await {
                info!("Evicted checkpoint {} to respect max_checkpoints = {}", victim.id, self.max_checkpoints);
            }
        }
        Ok(())
    }
}

/// Picks `count` checkpoints to delete according to `policy`.
fn select_victims(
    mut entries: Vec<CheckpointMetadata>,
    count: usize,
    policy: EvictionPolicy,
) -> Vec<CheckpointMetadata> {
    entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    if policy == EvictionPolicy::AutomaticFirst {
        // Stable sort keeps age order within each group.
        entries.sort_by_key(|m| !m.is_automatic());
    }
    entries.truncate(count);
    entries
}

/// `ckpt-<unix millis>-<8 random hex chars>`.
fn generate_id(created_at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("ckpt-{:013}-{}", created_at.timestamp_millis(), &suffix[..8])
}

//! The checkpoint façade.
//!
//! [`CheckpointManager`] ties capture, storage and restore together for one
//! project root. Mutating operations are serialized twice: an in-process
//! mutex, and an advisory [`StorageLock`] file so that two processes sharing a
//! storage directory do not interleave. The automatic timer never waits for
//! either; it skips a tick while a manual operation runs.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureEngine, CaptureOptions};
use crate::config::Config;
use crate::core::metadata::{CheckpointMetadata, NewCheckpoint, StoredCheckpoint, AUTO_TAG, PRE_OPERATION_TAG};
use crate::core::state::StateDiff;
use crate::error::{CheckpointError, Result};
use crate::restore::{ConflictPrompt, ConflictRecord, RestoreEngine, RestoreOptions, RestoreResult};
use crate::storage::{create_storage_backend, CheckpointStorage, StorageLock, StorageStats};
use crate::types::StorageType;

/// Defaults the manager applies to every operation.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Capture options for `create`.
    pub capture: CaptureOptions,
    /// Restore options used when a call passes none.
    pub restore: RestoreOptions,
    /// Period of the automatic checkpoint timer.
    pub auto_interval: Duration,
    /// Default age limit for `prune`.
    pub retention_days: Option<u32>,
    /// Checkpoint storage directory; left out of captures and backups when it
    /// lies inside the project root.
    pub storage_dir: Option<PathBuf>,
    /// Directory holding the advisory lock file; `None` disables it.
    pub lock_dir: Option<PathBuf>,
    /// Age after which a leftover lock file is replaced.
    pub lock_stale_after: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            capture: CaptureOptions::default(),
            restore: RestoreOptions::default(),
            auto_interval: Duration::from_secs(300),
            retention_days: None,
            storage_dir: None,
            lock_dir: None,
            lock_stale_after: Duration::from_secs(300),
        }
    }
}

impl ManagerOptions {
    /// Options from a loaded configuration. A relative storage path is taken
    /// relative to `root`.
    pub fn from_config(root: &Path, config: &Config) -> Self {
        let storage_dir = match config.storage.storage_type {
            StorageType::File => Some(resolve_against(root, &config.storage_path())),
            StorageType::Memory => None,
        };
        Self {
            capture: config.capture_options(),
            restore: config.restore_options(),
            auto_interval: config.auto_checkpoint.interval(),
            retention_days: config.retention.max_age_days,
            lock_dir: storage_dir.clone(),
            storage_dir,
            lock_stale_after: Duration::from_secs(config.storage.lock_stale_seconds),
        }
    }
}

fn resolve_against(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

struct AutoTimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Creates, lists, compares, verifies, prunes and restores checkpoints of
/// one project root.
pub struct CheckpointManager {
    root: PathBuf,
    storage: Arc<CheckpointStorage>,
    options: ManagerOptions,
    restore_engine: Arc<RestoreEngine>,
    op_lock: AsyncMutex<()>,
    auto_timer: Mutex<Option<AutoTimer>>,
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("root", &self.root)
            .field("storage", &self.storage)
            .field("auto_checkpoint_running", &self.is_auto_checkpoint_running())
            .finish()
    }
}

impl CheckpointManager {
    /// Creates a manager for `root` over an already initialized storage.
    pub fn new(root: impl Into<PathBuf>, storage: Arc<CheckpointStorage>, options: ManagerOptions) -> Self {
        Self {
            root: root.into(),
            storage,
            options,
            restore_engine: Arc::new(RestoreEngine::new()),
            op_lock: AsyncMutex::new(()),
            auto_timer: Mutex::new(None),
        }
    }

    /// Builds storage and manager from `config` and starts the automatic
    /// timer if `auto_checkpoint.enabled` is set.
    pub async fn from_config(root: impl Into<PathBuf>, config: &Config) -> Result<Arc<Self>> {
        let root = root.into();
        let options = ManagerOptions::from_config(&root, config);

        let mut storage_config = config.clone();
        if let Some(dir) = &options.storage_dir {
            storage_config.storage.path = dir.to_string_lossy().into_owned();
        }
        let backend = create_storage_backend(&storage_config).await?;
        let storage = Arc::new(CheckpointStorage::from_config(backend, config));

        let manager = Arc::new(Self::new(root, storage, options));
        if config.auto_checkpoint.enabled {
            manager.start_auto_checkpoint()?;
        }
        Ok(manager)
    }

    /// Installs the callback consulted under `conflict_resolution = prompt`.
    pub fn with_conflict_prompt(mut self, prompt: Arc<dyn ConflictPrompt>) -> Self {
        self.restore_engine = Arc::new(RestoreEngine::with_prompt(prompt));
        self
    }

    /// The project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The storage policy layer.
    pub fn storage(&self) -> &Arc<CheckpointStorage> {
        &self.storage
    }

    /// The defaults in effect.
    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Captures the root and saves it as a new checkpoint. Returns its id.
    pub async fn create(&self, request: NewCheckpoint) -> Result<String> {
        let options = self.options.capture.clone();
        self.create_with(request, options).await
    }

    /// Like [`create`](Self::create) with explicit capture options.
    pub async fn create_with(&self, request: NewCheckpoint, options: CaptureOptions) -> Result<String> {
        let _guard = self.op_lock.lock().await;
        self.create_locked(request, options).await
    }

    /// Captures relative to the latest checkpoint: files whose modification
    /// time is unchanged are carried over without being read again. Falls
    /// back to a full capture when no checkpoint exists yet.
    pub async fn create_incremental(&self, request: NewCheckpoint) -> Result<String> {
        let _guard = self.op_lock.lock().await;
        let mut options = self.options.capture.clone();
        let mut request = request;

        if let Some(latest) = self.storage.latest().await? {
            match self.storage.load(&latest.id).await {
                Some(base) => {
                    options = options.incremental_from(base.state);
                    request.parent_id = Some(latest.id);
                }
                None => warn!("Latest checkpoint {} is unreadable; taking a full capture", latest.id),
            }
        } else {
            info!("No previous checkpoint; incremental create takes a full capture");
        }
        self.create_locked(request, options).await
    }

    /// Creates a checkpoint tagged `pre-operation` as a safety net before
    /// `operation` runs.
    pub async fn create_before_operation(&self, operation: &str) -> Result<String> {
        let request = NewCheckpoint::named(format!("before {}", operation))
            .with_tag(PRE_OPERATION_TAG)
            .with_metadata("operation", operation);
        self.create(request).await
    }

    async fn create_locked(&self, mut request: NewCheckpoint, options: CaptureOptions) -> Result<String> {
        let _lock = self.acquire_storage_lock()?;

        if request.parent_id.is_none() {
            request.parent_id = self.storage.latest().await?.map(|m| m.id);
        }
        let options = self.exclude_storage_dir(options);
        let (state, stats) = CaptureEngine::new().capture_async(self.root.clone(), options).await?;
        if !stats.errors.is_empty() {
            warn!(
                "Checkpoint '{}' captured with {} unreadable entries",
                request.name,
                stats.errors.len()
            );
        }
        self.storage.save(state, request).await
    }

    /// Restores a checkpoint given its id or, failing that, its name (the
    /// newest checkpoint with that name wins). `None` uses the default options.
    pub async fn restore(&self, id_or_name: &str, options: Option<RestoreOptions>) -> Result<RestoreResult> {
        let _guard = self.op_lock.lock().await;
        let _lock = self.acquire_storage_lock()?;
        let checkpoint = self.resolve(id_or_name).await?;
        let options = self.restore_options(options);
        let engine = Arc::clone(&self.restore_engine);
        tokio::task::spawn_blocking(move || engine.restore(&checkpoint, &options)).await?
    }

    /// Restores only `paths` of a checkpoint.
    pub async fn restore_partial(
        &self,
        id_or_name: &str,
        paths: Vec<String>,
        options: Option<RestoreOptions>,
    ) -> Result<RestoreResult> {
        let _guard = self.op_lock.lock().await;
        let _lock = self.acquire_storage_lock()?;
        let checkpoint = self.resolve(id_or_name).await?;
        let options = self.restore_options(options);
        let engine = Arc::clone(&self.restore_engine);
        tokio::task::spawn_blocking(move || engine.restore_partial(&checkpoint, &paths, &options)).await?
    }

    /// Restores the most recently created checkpoint.
    pub async fn restore_latest(&self, options: Option<RestoreOptions>) -> Result<RestoreResult> {
        let latest = self
            .storage
            .latest()
            .await?
            .ok_or_else(|| CheckpointError::not_found("no checkpoints exist"))?;
        self.restore(&latest.id, options).await
    }

    /// Conflicts recorded by the most recent restore.
    pub fn last_conflicts(&self) -> Vec<ConflictRecord> {
        self.restore_engine.conflicts()
    }

    /// Files added, modified and deleted from checkpoint `id1` to `id2`.
    pub async fn compare(&self, id1: &str, id2: &str) -> Result<StateDiff> {
        let old = self.load(id1).await?;
        let new = self.load(id2).await?;
        Ok(CaptureEngine::calculate_diff(&old.state, &new.state))
    }

    /// Whether a checkpoint still matches its recorded state hash.
    pub async fn verify(&self, id: &str) -> bool {
        self.storage.verify_integrity(id).await
    }

    /// Deletes checkpoints older than `days`, or than the configured
    /// `retention.max_age_days` when `days` is `None`.
    pub async fn prune(&self, days: Option<u32>) -> Result<usize> {
        let Some(days) = days.or(self.options.retention_days) else {
            debug!("No retention age configured; nothing to prune");
            return Ok(0);
        };
        let _guard = self.op_lock.lock().await;
        let _lock = self.acquire_storage_lock()?;
        self.storage.prune_older_than(days).await
    }

    /// All checkpoints, newest first.
    pub async fn list(&self) -> Result<Vec<CheckpointMetadata>> {
        self.storage.list().await
    }

    /// Deletes a checkpoint; `false` if it did not exist.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.op_lock.lock().await;
        let _lock = self.acquire_storage_lock()?;
        Ok(self.storage.delete(id).await)
    }

    /// Counts, size, date range and location of the stored checkpoints.
    pub async fn stats(&self) -> Result<StorageStats> {
        self.storage.get_stats().await
    }

    /// Starts the automatic checkpoint timer.
    ///
    /// Every `auto_interval` a checkpoint tagged `auto` is created. A tick is
    /// skipped while another operation is in progress, and failures are only
    /// logged.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::AlreadyInUse`] if the timer is already running,
    /// [`CheckpointError::InvalidInput`] for a zero interval.
    pub fn start_auto_checkpoint(self: &Arc<Self>) -> Result<()> {
        if self.options.auto_interval.is_zero() {
            return Err(CheckpointError::invalid_input("automatic checkpoint interval must be greater than 0"));
        }
        let mut slot = self.auto_timer.lock();
        if slot.as_ref().is_some_and(|timer| !timer.handle.is_finished()) {
            return Err(CheckpointError::already_in_use("automatic checkpoint timer"));
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_auto_checkpoints(Arc::downgrade(self), self.options.auto_interval, cancel.clone()));
        info!(
            "Automatic checkpoints every {:?} for '{}'",
            self.options.auto_interval,
            self.root.display()
        );
        *slot = Some(AutoTimer { cancel, handle });
        Ok(())
    }

    /// Stops the automatic timer and waits for it to finish. Returns whether
    /// it was running.
    pub async fn stop_auto_checkpoint(&self) -> bool {
        let Some(timer) = self.auto_timer.lock().take() else {
            return false;
        };
        timer.cancel.cancel();
        if let Err(e) = timer.handle.await {
            warn!("Automatic checkpoint task ended abnormally: {}", e);
        }
        true
    }

    /// Whether the automatic timer is running.
    pub fn is_auto_checkpoint_running(&self) -> bool {
        self.auto_timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.cancel.is_cancelled() && !timer.handle.is_finished())
    }

    /// One automatic checkpoint, unless a manual operation holds the lock.
    /// Returns the new id, or `None` if the tick was skipped.
    async fn auto_checkpoint_tick(&self) -> Result<Option<String>> {
        let Ok(_guard) = self.op_lock.try_lock() else {
            debug!("Operation in progress; skipping automatic checkpoint");
            return Ok(None);
        };
        let request = NewCheckpoint::named(format!("auto-{}", Utc::now().format("%Y%m%dT%H%M%S")))
            .with_tag(AUTO_TAG);
        let options = self.options.capture.clone();
        self.create_locked(request, options).await.map(Some)
    }

    async fn load(&self, id: &str) -> Result<StoredCheckpoint> {
        self.storage
            .load(id)
            .await
            .ok_or_else(|| CheckpointError::not_found(format!("checkpoint {}", id)))
    }

    async fn resolve(&self, id_or_name: &str) -> Result<StoredCheckpoint> {
        if let Some(checkpoint) = self.storage.load(id_or_name).await {
            return Ok(checkpoint);
        }
        let by_name = self.storage.find_by_name(id_or_name).await?;
        match by_name.first() {
            Some(metadata) => self.load(&metadata.id).await,
            None => Err(CheckpointError::not_found(format!("checkpoint '{}'", id_or_name))),
        }
    }

    fn restore_options(&self, options: Option<RestoreOptions>) -> RestoreOptions {
        let mut options = options.unwrap_or_else(|| self.options.restore.clone());
        if options.target_path.is_none() {
            options.target_path = Some(self.root.clone());
        }
        if let Some(rel) = self.storage_dir_relative() {
            options.backup_exclude.push(format!("{}/**", rel));
            options.backup_exclude.push(format!("{}/", rel));
        }
        options
    }

    fn exclude_storage_dir(&self, mut options: CaptureOptions) -> CaptureOptions {
        if let Some(rel) = self.storage_dir_relative() {
            options.exclude.push(format!("{}/**", rel));
            options.exclude.push(format!("{}/", rel));
        }
        options
    }

    fn storage_dir_relative(&self) -> Option<String> {
        let dir = self.options.storage_dir.as_ref()?;
        crate::capture::relative_slash_path(&self.root, dir)
    }

    fn acquire_storage_lock(&self) -> Result<Option<StorageLock>> {
        match &self.options.lock_dir {
            Some(dir) => StorageLock::acquire(dir, self.options.lock_stale_after).map(Some),
            None => Ok(None),
        }
    }
}

impl Drop for CheckpointManager {
    fn drop(&mut self) {
        if let Some(timer) = self.auto_timer.get_mut().take() {
            timer.cancel.cancel();
        }
    }
}

async fn run_auto_checkpoints(manager: Weak<CheckpointManager>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("Automatic checkpoint timer stopped");
                break;
            }
            _ = interval.tick() => {
                let Some(manager) = manager.upgrade() else { break };
                match manager.auto_checkpoint_tick().await {
                    Ok(Some(id)) => info!("Automatic checkpoint {} created", id),
                    Ok(None) => {}
                    Err(e) => error!("Automatic checkpoint failed: {}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::types::EvictionPolicy;
    use assert_matches::assert_matches;
    use std::fs;
    use tempfile::tempdir;

    fn manager(root: &Path) -> CheckpointManager {
        let storage = Arc::new(CheckpointStorage::new(
            Arc::new(MemoryStorage::new()),
            10,
            EvictionPolicy::OldestFirst,
        ));
        CheckpointManager::new(root, storage, ManagerOptions::default())
    }

    #[tokio::test]
    async fn test_create_sets_parent_chain() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"one").unwrap();
        let mgr = manager(dir.path());

        let first = mgr.create(NewCheckpoint::named("first")).await.unwrap();
        let second = mgr.create(NewCheckpoint::named("second")).await.unwrap();

        let list = mgr.list().await.unwrap();
        assert_eq!(list[0].id, second);
        assert_eq!(list[0].parent_id.as_deref(), Some(first.as_str()));
        assert_eq!(list[1].parent_id, None);
    }

    #[tokio::test]
    async fn test_restore_by_name() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"good").unwrap();
        let mgr = manager(dir.path());
        mgr.create(NewCheckpoint::named("known-good")).await.unwrap();

        fs::write(dir.path().join("a.txt"), b"broken").unwrap();
        let options = RestoreOptions { create_backup: false, ..RestoreOptions::default() };
        let result = mgr.restore("known-good", Some(options)).await.unwrap();
        assert!(result.success);
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"good");
        assert_eq!(mgr.last_conflicts().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_checkpoint() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        assert_matches!(mgr.restore("nope", None).await, Err(CheckpointError::NotFound(_)));
        assert_matches!(mgr.restore_latest(None).await, Err(CheckpointError::NotFound(_)));
        assert_matches!(mgr.compare("a", "b").await, Err(CheckpointError::NotFound(_)));
        assert!(!mgr.verify("nope").await);
        assert!(!mgr.delete("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_before_operation_tags() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let id = mgr.create_before_operation("refactor").await.unwrap();
        let found = mgr.storage().find_by_tag(PRE_OPERATION_TAG).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
        assert_eq!(found[0].name, "before refactor");
    }

    #[tokio::test]
    async fn test_prune_without_policy_is_noop() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.create(NewCheckpoint::named("x")).await.unwrap();
        assert_eq!(mgr.prune(None).await.unwrap(), 0);
        assert_eq!(mgr.prune(Some(1)).await.unwrap(), 0);
        assert_eq!(mgr.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_auto_tick_skips_while_busy() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());

        let guard = mgr.op_lock.lock().await;
        assert_eq!(mgr.auto_checkpoint_tick().await.unwrap(), None);
        drop(guard);

        let id = mgr.auto_checkpoint_tick().await.unwrap().expect("tick should create");
        let list = mgr.list().await.unwrap();
        assert_eq!(list[0].id, id);
        assert!(list[0].is_automatic());
    }

    #[tokio::test]
    async fn test_start_and_stop_timer() {
        let dir = tempdir().unwrap();
        let mgr = Arc::new(manager(dir.path()));
        mgr.start_auto_checkpoint().unwrap();
        assert!(mgr.is_auto_checkpoint_running());
        assert_matches!(mgr.start_auto_checkpoint(), Err(CheckpointError::AlreadyInUse(_)));
        assert!(mgr.stop_auto_checkpoint().await);
        assert!(!mgr.is_auto_checkpoint_running());
        assert!(!mgr.stop_auto_checkpoint().await);
    }

    #[test]
    fn test_options_from_config_resolve_storage() {
        let config = Config::default();
        let options = ManagerOptions::from_config(Path::new("/project"), &config);
        assert_eq!(options.storage_dir, Some(PathBuf::from("/project/.checkpoints")));
        assert_eq!(options.lock_dir, options.storage_dir);
        assert_eq!(options.auto_interval, Duration::from_secs(300));
    }
}

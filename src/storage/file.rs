// src/storage/file.rs

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use log::{debug, warn};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::core::metadata::{CheckpointMetadata, StoredCheckpoint};
use crate::core::state::CapturedState;
use crate::error::{CheckpointError, Result};
use crate::storage::{sort_newest_first, StorageBackend};

const METADATA_SUBDIR: &str = "metadata";
const STATE_FILE_NAME: &str = "state.json";
const TMP_EXTENSION: &str = "tmp";

/// A storage backend that persists checkpoints to the file system.
///
/// Layout:
/// `base_path/metadata/<id>.json` holds the `CheckpointMetadata`,
/// `base_path/<id>/state.json` holds the full `CapturedState`.
///
/// The state is written first and the metadata file last, each through a
/// temporary file and a rename. A checkpoint is visible only once its
/// metadata exists, so an interrupted save never shows up in `list`.
#[derive(Debug)]
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Creates a new `FileStorage` rooted at `base_path` and creates the
    /// directory layout if it does not exist yet.
    pub async fn new<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        let storage = Self { base_path: base_path.as_ref().to_path_buf() };
        storage.initialize().await?;
        Ok(storage)
    }

    /// Root directory of this storage.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.base_path.join(METADATA_SUBDIR).join(format!("{}.json", id))
    }

    fn checkpoint_dir(&self, id: &str) -> PathBuf {
        self.base_path.join(id)
    }

    /// Path of the `state.json` for a checkpoint.
    pub fn state_path(&self, id: &str) -> PathBuf {
        self.checkpoint_dir(id).join(STATE_FILE_NAME)
    }

    /// Writes to a temporary file, fsyncs it, renames it over `path` and
    /// fsyncs the parent directory so the rename itself is durable.
    async fn write_atomic(path: &Path, contents: Vec<u8>) -> Result<()> {
        let tmp = path.with_extension(TMP_EXTENSION);
        let write_err = |e: std::io::Error| CheckpointError::storage(format!("Failed to write '{}': {}", tmp.display(), e));

        let mut file = fs::File::create(&tmp).await.map_err(write_err)?;
        file.write_all(&contents).await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        fs::rename(&tmp, path).await.map_err(|e| {
            CheckpointError::storage(format!("Failed to commit '{}': {}", path.display(), e))
        })?;
        if let Some(parent) = path.parent() {
            sync_dir(parent).await?;
        }
        Ok(())
    }

    async fn write_checkpoint(&self, checkpoint: &StoredCheckpoint) -> Result<()> {
        let id = &checkpoint.metadata.id;
        let dir = self.checkpoint_dir(id);
        fs::create_dir_all(&dir).await.map_err(|e| {
            CheckpointError::storage(format!("Failed to create checkpoint directory '{}': {}", dir.display(), e))
        })?;

        let state_json = serde_json::to_vec(&checkpoint.state)?;
        Self::write_atomic(&self.state_path(id), state_json).await?;

        let metadata_json = serde_json::to_vec_pretty(&checkpoint.metadata)?;
        Self::write_atomic(&self.metadata_path(id), metadata_json).await
    }

    async fn read_metadata(&self, path: &Path) -> Result<CheckpointMetadata> {
        let json = fs::read(path).await.map_err(|e| {
            CheckpointError::storage(format!("Failed to read metadata '{}': {}", path.display(), e))
        })?;
        Ok(serde_json::from_slice(&json)?)
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
    let handle = fs::File::open(dir).await?;
    handle.sync_all().await.map_err(|e| {
        CheckpointError::storage(format!("Failed to sync directory '{}': {}", dir.display(), e))
    })
}

// Directories cannot be opened for syncing outside unix.
#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id != METADATA_SUBDIR
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::invalid_input(format!("Invalid checkpoint id '{}'", id)))
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn initialize(&self) -> Result<()> {
        let metadata_dir = self.base_path.join(METADATA_SUBDIR);
        fs::create_dir_all(&metadata_dir).await.map_err(|e| {
            CheckpointError::storage(format!(
                "Failed to create storage directory '{}': {}",
                metadata_dir.display(),
                e
            ))
        })
    }

    async fn save(&self, checkpoint: &StoredCheckpoint) -> Result<()> {
        let id = &checkpoint.metadata.id;
        validate_id(id)?;

        if let Err(e) = self.write_checkpoint(checkpoint).await {
            // Roll back whatever part of this checkpoint reached the disk.
            let _ = fs::remove_file(self.metadata_path(id).with_extension(TMP_EXTENSION)).await;
            let _ = fs::remove_dir_all(self.checkpoint_dir(id)).await;
            return Err(e);
        }
        debug!("Wrote checkpoint {} to '{}'", id, self.base_path.display());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<StoredCheckpoint>> {
        validate_id(id)?;
        let metadata_path = self.metadata_path(id);
        if !fs::try_exists(&metadata_path).await? {
            return Ok(None);
        }

        let metadata = self.read_metadata(&metadata_path).await?;
        let state_path = self.state_path(id);
        let state_json = fs::read(&state_path).await.map_err(|e| {
            CheckpointError::storage(format!("Failed to read state '{}': {}", state_path.display(), e))
        })?;
        let state: CapturedState = serde_json::from_slice(&state_json)?;

        Ok(Some(StoredCheckpoint { metadata, state }))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        let metadata_path = self.metadata_path(id);
        let existed = fs::try_exists(&metadata_path).await?;
        if existed {
            fs::remove_file(&metadata_path).await.map_err(|e| {
                CheckpointError::storage(format!("Failed to delete metadata '{}': {}", metadata_path.display(), e))
            })?;
        }

        let dir = self.checkpoint_dir(id);
        if fs::try_exists(&dir).await? {
            fs::remove_dir_all(&dir).await.map_err(|e| {
                CheckpointError::storage(format!("Failed to delete checkpoint data '{}': {}", dir.display(), e))
            })?;
        }
        Ok(existed)
    }

    async fn list(&self) -> Result<Vec<CheckpointMetadata>> {
        let metadata_dir = self.base_path.join(METADATA_SUBDIR);
        if !fs::try_exists(&metadata_dir).await? {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(&metadata_dir).await.map_err(|e| {
            CheckpointError::storage(format!("Failed to read '{}': {}", metadata_dir.display(), e))
        })?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match self.read_metadata(&path).await {
                Ok(metadata) => entries.push(metadata),
                Err(e) => warn!("Ignoring unreadable checkpoint metadata '{}': {}", path.display(), e),
            }
        }

        sort_newest_first(&mut entries);
        Ok(entries)
    }

    fn location(&self) -> String {
        self.base_path.display().to_string()
    }
}

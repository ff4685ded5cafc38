//! Advisory lock file guarding mutating checkpoint operations.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{CheckpointError, Result};

/// File name of the lock inside the storage directory.
pub const LOCK_FILE_NAME: &str = "checkpoint.lock";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockContent {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held lock on a storage directory; the file is removed on drop.
#[derive(Debug)]
pub struct StorageLock {
    path: PathBuf,
}

impl StorageLock {
    /// Takes the lock in `dir`, replacing a leftover lock older than `stale_after`
    /// or one whose content cannot be read.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::AlreadyInUse`] while another holder's lock is fresh.
    pub fn acquire(dir: &Path, stale_after: Duration) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            CheckpointError::storage(format!("Failed to create lock directory '{}': {}", dir.display(), e))
        })?;
        let path = dir.join(LOCK_FILE_NAME);

        match Self::try_create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if Self::is_stale(&path, stale_after) {
                    warn!("Removing stale checkpoint lock '{}'", path.display());
                    fs::remove_file(&path).or_else(|e| {
                        if e.kind() == ErrorKind::NotFound {
                            Ok(())
                        } else {
                            Err(e)
                        }
                    })?;
                    Self::try_create(&path).map_err(|e| match e.kind() {
                        ErrorKind::AlreadyExists => Self::held(&path),
                        _ => CheckpointError::Io(e),
                    })
                } else {
                    Err(Self::held(&path))
                }
            }
            Err(e) => Err(CheckpointError::storage(format!(
                "Failed to create lock file '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let content = LockContent {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let serialized = serde_json::to_string(&content)?;
        file.write_all(serialized.as_bytes())?;
        file.sync_all()?;
        debug!("Acquired checkpoint lock '{}'", path.display());
        Ok(Self { path: path.to_path_buf() })
    }

    fn is_stale(path: &Path, stale_after: Duration) -> bool {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            // Vanished between the create attempt and now.
            Err(e) if e.kind() == ErrorKind::NotFound => return true,
            Err(_) => return false,
        };
        match serde_json::from_str::<LockContent>(&content) {
            Ok(lock) => {
                let age = Utc::now().signed_duration_since(lock.acquired_at);
                age.to_std().map(|age| age > stale_after).unwrap_or(false)
            }
            Err(_) => true,
        }
    }

    fn held(path: &Path) -> CheckpointError {
        CheckpointError::already_in_use(format!(
            "checkpoint storage is locked by another operation ('{}')",
            path.display()
        ))
    }
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

// src/lib.rs

//! Project-state checkpoints: content-addressed directory snapshots with a
//! retention policy and a verified, conflict-aware restore.
//!
//! ```no_run
//! use checkpoint_engine::{init, CheckpointManager, NewCheckpoint};
//!
//! # async fn run() -> checkpoint_engine::Result<()> {
//! let config = init(Some("checkpoint.toml"))?;
//! let manager = CheckpointManager::from_config("/path/to/project", &config).await?;
//! let id = manager.create(NewCheckpoint::named("before upgrade")).await?;
//! let result = manager.restore(&id, None).await?;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod core;
pub mod error;
pub mod manager;
pub mod restore;
pub mod storage;
pub mod types;

pub use capture::{CaptureEngine, CaptureOptions, CaptureStats};
pub use config::Config;
pub use core::{CapturedDirectory, CapturedFile, CapturedState, CheckpointMetadata, NewCheckpoint, StateDiff, StoredCheckpoint};
pub use error::{CheckpointError, Result};
pub use manager::{CheckpointManager, ManagerOptions};
pub use restore::{ConflictDecision, ConflictPrompt, ConflictRecord, RestoreEngine, RestoreOptions, RestoreResult};
pub use storage::{CheckpointStorage, StorageBackend, StorageStats};
pub use types::{ConflictResolution, EvictionPolicy, LogLevel, StorageType};

/// Loads the configuration and sets up console logging.
///
/// With `None` the built-in defaults are used, still subject to `CKPT_`
/// environment overrides and validation.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or is invalid, or
/// [`CheckpointError::InvalidInput`] if a global logger is already installed.
pub fn init(config_path: Option<&str>) -> Result<Config> {
    let config = match config_path {
        Some(path) => Config::load(path)?,
        None => {
            let mut config = Config::default();
            config.apply_env_vars()?;
            config.validate()?;
            config
        }
    };

    if config.logging.console {
        init_logger(&config)?;
    }
    log::info!(
        "checkpoint-engine initialized (storage: {}, {})",
        config.storage.storage_type,
        config.storage.path
    );
    Ok(config)
}

#[cfg(feature = "logging")]
fn init_logger(config: &Config) -> Result<()> {
    env_logger::Builder::new()
        .filter_level(config.logging.level.to_level_filter())
        .parse_default_env()
        .try_init()
        .map_err(|e| CheckpointError::invalid_input(format!("Logger already initialized: {}", e)))
}

#[cfg(not(feature = "logging"))]
fn init_logger(_config: &Config) -> Result<()> {
    Ok(())
}

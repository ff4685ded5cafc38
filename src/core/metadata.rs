//! Identity and bookkeeping for persisted checkpoints.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::state::CapturedState;

/// Format version written into every new checkpoint's metadata.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Tag carried by checkpoints created by the automatic timer.
pub const AUTO_TAG: &str = "auto";

/// Tag carried by checkpoints created as a pre-operation safety net.
pub const PRE_OPERATION_TAG: &str = "pre-operation";

/// Metadata describing one persisted checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointMetadata {
    /// Globally unique id, generated at save time.
    pub id: String,
    /// Human-readable name; not required to be unique.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When the checkpoint was saved.
    pub created_at: DateTime<Utc>,
    /// Copy of the state's hash, so integrity can be checked against it.
    pub state_hash: String,
    /// Free-form labels (`auto`, `pre-operation`, ...).
    #[serde(default)]
    pub tags: Vec<String>,
    /// Total size of captured file content in bytes.
    pub size: u64,
    /// Number of captured files.
    pub file_count: usize,
    /// Previous checkpoint in the chain, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Format version of the stored checkpoint.
    pub version: u32,
    /// Reserved; always false.
    #[serde(default)]
    pub compressed: bool,
    /// Reserved; always false.
    #[serde(default)]
    pub encrypted: bool,
    /// Free-form key/value annotations supplied by the caller.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckpointMetadata {
    /// Whether the checkpoint carries the given tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Whether the checkpoint was created by the automatic timer.
    pub fn is_automatic(&self) -> bool {
        self.has_tag(AUTO_TAG)
    }
}

/// The unit the storage backend persists and the restore engine consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    /// Checkpoint identity and bookkeeping.
    pub metadata: CheckpointMetadata,
    /// The captured tree.
    pub state: CapturedState,
}

impl StoredCheckpoint {
    /// True when the content still hashes to what the metadata recorded.
    ///
    /// Every file's bytes are re-hashed against its recorded hash, then the
    /// aggregate is recomputed and compared with `metadata.state_hash`.
    pub fn verify_integrity(&self) -> bool {
        self.state.corrupted_files().is_empty()
            && self.state.recompute_hash() == self.metadata.state_hash
    }
}

/// Caller-supplied part of the metadata for a new checkpoint. Everything else
/// (id, timestamps, hash, sizes, version) is filled in at save time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewCheckpoint {
    /// Human-readable name.
    pub name: String,
    /// Optional longer description.
    pub description: Option<String>,
    /// Labels to attach.
    pub tags: Vec<String>,
    /// Previous checkpoint in the chain.
    pub parent_id: Option<String>,
    /// Free-form annotations.
    pub metadata: HashMap<String, String>,
}

impl NewCheckpoint {
    /// Starts a request with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Adds a key/value annotation.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Sets the parent checkpoint.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

// src/core/mod.rs

/// SHA-256 helpers, including the order-independent state hash.
pub mod hash;
/// Captured files, directories and whole-tree states, plus state diffing.
pub mod state;
/// Checkpoint metadata and the persisted `StoredCheckpoint` unit.
pub mod metadata;
/// Glob include/exclude filtering shared by capture and restore.
pub mod filter;

pub use filter::PathFilter;
pub use metadata::{CheckpointMetadata, NewCheckpoint, StoredCheckpoint};
pub use state::{CapturedDirectory, CapturedFile, CapturedState, StateDiff};

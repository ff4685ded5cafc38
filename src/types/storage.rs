use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum StorageType {
    /// In-memory storage (for testing)
    Memory,
    /// File-based storage (persistent)
    File,
}

impl Default for StorageType {
    fn default() -> Self {
        Self::File
    }
}

/// Which checkpoints are evicted first once the retention limit is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Strictly oldest `created_at` first, regardless of origin.
    OldestFirst,
    /// Checkpoints tagged `auto` (oldest first), then manual ones.
    AutomaticFirst,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::OldestFirst
    }
}

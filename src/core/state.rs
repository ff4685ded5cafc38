//! Snapshot data model: captured files, directories and whole-tree states.
//!
//! A [`CapturedState`] is produced once by a capture pass and never mutated
//! afterwards. Storage persists it, restore and diff only read it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::hash::{compute_state_hash, sha256_hex};

/// Serde adapter storing raw bytes as a base64 string, since `state.json` is text.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// One snapshotted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedFile {
    /// Slash-separated path relative to the capture root.
    pub path: String,
    /// Raw file bytes (base64 on disk).
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    /// Byte length of the original content.
    pub size: u64,
    /// POSIX permission bits at capture time.
    pub mode: u32,
    /// Last modification time at capture time.
    pub modified: DateTime<Utc>,
    /// Hex SHA-256 of `content`.
    pub hash: String,
    /// Reserved; content is always stored uncompressed.
    #[serde(default)]
    pub compressed: bool,
}

impl CapturedFile {
    /// Builds a file entry, deriving `size` and `hash` from `content`.
    pub fn new(path: impl Into<String>, content: Vec<u8>, mode: u32, modified: DateTime<Utc>) -> Self {
        let hash = sha256_hex(&content);
        Self {
            path: path.into(),
            size: content.len() as u64,
            content,
            mode,
            modified,
            hash,
            compressed: false,
        }
    }

    /// Whether `content` still hashes to the recorded `hash`.
    pub fn content_matches_hash(&self) -> bool {
        sha256_hex(&self.content) == self.hash
    }
}

/// A directory recorded independently of files, so empty directories and
/// their permissions survive a restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedDirectory {
    /// Slash-separated path relative to the capture root.
    pub path: String,
    /// POSIX permission bits at capture time.
    pub mode: u32,
    /// Last modification time at capture time.
    pub modified: DateTime<Utc>,
}

/// The atomic snapshot unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedState {
    /// When the capture finished.
    pub timestamp: DateTime<Utc>,
    /// The directory that was captured.
    pub root_path: PathBuf,
    /// Captured files; paths are unique, order carries no meaning.
    pub files: Vec<CapturedFile>,
    /// Captured directories; paths are unique, order carries no meaning.
    pub directories: Vec<CapturedDirectory>,
    /// Sum of all file sizes.
    pub total_size: u64,
    /// Number of entries in `files`.
    pub file_count: usize,
    /// SHA-256 over the sorted per-file hashes.
    pub state_hash: String,
    /// Free-form capture context (options used, statistics).
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl CapturedState {
    /// Assembles a state and derives `total_size`, `file_count` and `state_hash`.
    pub fn new(
        root_path: PathBuf,
        files: Vec<CapturedFile>,
        directories: Vec<CapturedDirectory>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        let total_size = files.iter().map(|f| f.size).sum();
        let file_count = files.len();
        let state_hash = compute_state_hash(files.iter().map(|f| f.hash.as_str()));
        Self {
            timestamp: Utc::now(),
            root_path,
            files,
            directories,
            total_size,
            file_count,
            state_hash,
            metadata,
        }
    }

    /// Recomputes the aggregate hash from the recorded per-file hashes.
    pub fn recompute_hash(&self) -> String {
        compute_state_hash(self.files.iter().map(|f| f.hash.as_str()))
    }

    /// Paths of files whose content no longer matches their recorded hash.
    pub fn corrupted_files(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| !f.content_matches_hash())
            .map(|f| f.path.clone())
            .collect()
    }

    /// Looks up a file by its relative path.
    pub fn file(&self, path: &str) -> Option<&CapturedFile> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Returns a new state holding only the named files, plus the directories
    /// that are ancestors of at least one of them.
    pub fn subset(&self, paths: &[String]) -> CapturedState {
        let wanted: BTreeSet<&str> = paths.iter().map(|p| p.trim_matches('/')).collect();
        let files: Vec<CapturedFile> = self
            .files
            .iter()
            .filter(|f| wanted.contains(f.path.as_str()))
            .cloned()
            .collect();

        let mut ancestors = BTreeSet::new();
        for file in &files {
            let mut current = file.path.as_str();
            while let Some((parent, _)) = current.rsplit_once('/') {
                ancestors.insert(parent.to_string());
                current = parent;
            }
        }
        let directories = self
            .directories
            .iter()
            .filter(|d| ancestors.contains(&d.path))
            .cloned()
            .collect();

        let mut metadata = self.metadata.clone();
        metadata.insert("partial".to_string(), serde_json::Value::Bool(true));
        let mut subset = CapturedState::new(self.root_path.clone(), files, directories, metadata);
        subset.timestamp = self.timestamp;
        subset
    }
}

/// Paths that differ between two states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDiff {
    /// Present only in the newer state.
    pub added: Vec<String>,
    /// Present in both with different content hashes.
    pub modified: Vec<String>,
    /// Present only in the older state.
    pub deleted: Vec<String>,
}

impl StateDiff {
    /// Compares two states by path and content hash. Pure, no I/O.
    pub fn between(old_state: &CapturedState, new_state: &CapturedState) -> Self {
        let old: HashMap<&str, &str> = old_state
            .files
            .iter()
            .map(|f| (f.path.as_str(), f.hash.as_str()))
            .collect();
        let new: HashMap<&str, &str> = new_state
            .files
            .iter()
            .map(|f| (f.path.as_str(), f.hash.as_str()))
            .collect();

        let mut diff = StateDiff::default();
        for (path, hash) in &new {
            match old.get(path) {
                None => diff.added.push(path.to_string()),
                Some(old_hash) if old_hash != hash => diff.modified.push(path.to_string()),
                Some(_) => {}
            }
        }
        for path in old.keys() {
            if !new.contains_key(path) {
                diff.deleted.push(path.to_string());
            }
        }
        diff.added.sort();
        diff.modified.sort();
        diff.deleted.sort();
        diff
    }

    /// True when nothing was added, modified or deleted.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Total number of changed paths.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}

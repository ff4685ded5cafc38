//! Directory-tree capture.
//!
//! [`CaptureEngine`] walks a root directory depth-first and produces an
//! immutable [`CapturedState`]. Only an inaccessible root is fatal; per-entry
//! failures are collected into [`CaptureStats::errors`] and the walk goes on.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::DEFAULT_MAX_FILE_SIZE;
use crate::core::filter::{default_exclude_patterns, default_include_patterns, PathFilter};
use crate::core::state::{CapturedDirectory, CapturedFile, CapturedState, StateDiff};
use crate::error::{CheckpointError, Result};

/// Options for one capture pass.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Glob patterns to leave out.
    pub exclude: Vec<String>,
    /// Glob patterns a file must match to be captured.
    pub include: Vec<String>,
    /// Follow symbolic links and capture their targets as regular files.
    pub follow_symlinks: bool,
    /// Reserved; content is always stored uncompressed.
    pub compress: bool,
    /// Files larger than this are skipped and counted.
    pub max_file_size: u64,
    /// Capture dot-files and descend into dot-directories.
    pub include_hidden: bool,
    /// Reuse entries from `base_state` for files whose mtime and size are unchanged.
    pub incremental: bool,
    /// The state an incremental capture is relative to.
    pub base_state: Option<CapturedState>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            exclude: default_exclude_patterns(),
            include: default_include_patterns(),
            follow_symlinks: false,
            compress: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            include_hidden: false,
            incremental: false,
            base_state: None,
        }
    }
}

impl CaptureOptions {
    /// Options that capture everything below the root, hidden files included.
    pub fn everything() -> Self {
        Self {
            exclude: Vec::new(),
            include: Vec::new(),
            include_hidden: true,
            max_file_size: u64::MAX,
            ..Self::default()
        }
    }

    /// Switches to incremental mode relative to `base`.
    pub fn incremental_from(mut self, base: CapturedState) -> Self {
        self.incremental = true;
        self.base_state = Some(base);
        self
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "exclude": self.exclude,
            "include": self.include,
            "followSymlinks": self.follow_symlinks,
            "maxFileSize": self.max_file_size,
            "includeHidden": self.include_hidden,
            "incremental": self.incremental && self.base_state.is_some(),
        })
    }
}

/// Counters and per-entry failures from one capture pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStats {
    /// Files read from disk.
    pub files_captured: usize,
    /// Files carried over unchanged from the base state.
    pub files_unchanged: usize,
    /// Directories recorded.
    pub directories_captured: usize,
    /// Files over `max_file_size`.
    pub skipped_too_large: usize,
    /// Entries rejected by the hidden rule or the include/exclude patterns.
    pub skipped_filtered: usize,
    /// Symbolic links not followed.
    pub skipped_symlinks: usize,
    /// Per-entry failures; none of them aborted the capture.
    pub errors: Vec<String>,
    /// Wall-clock time of the pass in milliseconds.
    pub duration_ms: u64,
}

/// Walks a directory tree and snapshots it.
#[derive(Debug, Clone, Default)]
pub struct CaptureEngine {
    cancel: Option<CancellationToken>,
}

impl CaptureEngine {
    /// Creates an engine without cancellation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine that stops with [`CheckpointError::Cancelled`] once
    /// `token` is cancelled. The token is checked between directory entries.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self { cancel: Some(token) }
    }

    /// Captures `root` and returns the resulting state.
    pub fn capture(&self, root: &Path, options: &CaptureOptions) -> Result<CapturedState> {
        self.capture_with_stats(root, options).map(|(state, _)| state)
    }

    /// Runs [`capture_with_stats`](Self::capture_with_stats) on the blocking pool.
    pub async fn capture_async(
        &self,
        root: PathBuf,
        options: CaptureOptions,
    ) -> Result<(CapturedState, CaptureStats)> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.capture_with_stats(&root, &options)).await?
    }

    /// Captures `root` and also returns the pass statistics.
    ///
    /// # Errors
    ///
    /// * [`CheckpointError::CaptureError`] if `root` is not a readable directory.
    /// * [`CheckpointError::InvalidInput`] if a pattern does not compile.
    /// * [`CheckpointError::Cancelled`] if the engine's token fires mid-walk.
    pub fn capture_with_stats(
        &self,
        root: &Path,
        options: &CaptureOptions,
    ) -> Result<(CapturedState, CaptureStats)> {
        let started = Instant::now();
        let root_meta = fs::metadata(root).map_err(|e| {
            CheckpointError::capture(format!("Cannot access capture root '{}': {}", root.display(), e))
        })?;
        if !root_meta.is_dir() {
            return Err(CheckpointError::capture(format!(
                "Capture root '{}' is not a directory",
                root.display()
            )));
        }

        let filter = PathFilter::new(&options.include, &options.exclude, options.include_hidden)?;
        let base_files: HashMap<&str, &CapturedFile> = match (&options.base_state, options.incremental) {
            (Some(base), true) => base.files.iter().map(|f| (f.path.as_str(), f)).collect(),
            _ => HashMap::new(),
        };

        info!("Capturing '{}'", root.display());
        let mut stats = CaptureStats::default();
        let mut files = Vec::new();
        let mut candidate_dirs = Vec::new();

        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(options.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if !entry.file_type().is_dir() {
                    return true;
                }
                match relative_slash_path(root, entry.path()) {
                    Some(rel) => filter.allows_dir(&rel),
                    None => false,
                }
            });

        for entry in walker {
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                warn!("Capture of '{}' cancelled", root.display());
                return Err(CheckpointError::Cancelled(format!("capture of '{}'", root.display())));
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry during capture: {}", e);
                    stats.errors.push(e.to_string());
                    continue;
                }
            };
            let Some(rel) = relative_slash_path(root, entry.path()) else {
                continue;
            };

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                // Only reached when links are not followed.
                stats.skipped_symlinks += 1;
                continue;
            }

            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("Cannot stat '{}': {}", rel, e);
                    stats.errors.push(format!("{}: {}", rel, e));
                    continue;
                }
            };

            if file_type.is_dir() {
                candidate_dirs.push(CapturedDirectory {
                    path: rel,
                    mode: file_mode(&meta),
                    modified: modified_time(&meta),
                });
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            if !filter.allows_file(&rel) {
                stats.skipped_filtered += 1;
                continue;
            }
            if meta.len() > options.max_file_size {
                debug!(
                    "Skipping '{}': {} bytes exceeds max_file_size {}",
                    rel,
                    meta.len(),
                    options.max_file_size
                );
                stats.skipped_too_large += 1;
                continue;
            }

            let modified = modified_time(&meta);
            if let Some(base) = base_files.get(rel.as_str()) {
                if base.modified == modified && base.size == meta.len() {
                    files.push((*base).clone());
                    stats.files_unchanged += 1;
                    continue;
                }
            }

            match fs::read(entry.path()) {
                Ok(content) => {
                    files.push(CapturedFile::new(rel, content, file_mode(&meta), modified));
                    stats.files_captured += 1;
                }
                Err(e) => {
                    warn!("Cannot read '{}': {}", rel, e);
                    stats.errors.push(format!("{}: {}", rel, e));
                }
            }
        }

        let directories = select_directories(candidate_dirs, &files, &filter, &mut stats);
        stats.directories_captured = directories.len();
        stats.duration_ms = started.elapsed().as_millis() as u64;

        let mut metadata = BTreeMap::new();
        metadata.insert("options".to_string(), options.snapshot());
        metadata.insert("stats".to_string(), serde_json::to_value(&stats)?);
        if options.incremental && options.base_state.is_some() {
            metadata.insert("incremental".to_string(), serde_json::Value::Bool(true));
        }

        let state = CapturedState::new(root.to_path_buf(), files, directories, metadata);
        info!(
            "Captured {} files ({} bytes), {} directories from '{}' in {} ms ({} errors)",
            state.file_count,
            state.total_size,
            state.directories.len(),
            root.display(),
            stats.duration_ms,
            stats.errors.len()
        );
        Ok((state, stats))
    }

    /// Paths added, modified and deleted going from `old_state` to `new_state`.
    pub fn calculate_diff(old_state: &CapturedState, new_state: &CapturedState) -> StateDiff {
        StateDiff::between(old_state, new_state)
    }
}

/// Keeps a directory when it matches the include patterns itself or holds a
/// captured file somewhere below it.
fn select_directories(
    candidates: Vec<CapturedDirectory>,
    files: &[CapturedFile],
    filter: &PathFilter,
    stats: &mut CaptureStats,
) -> Vec<CapturedDirectory> {
    let mut ancestors = BTreeSet::new();
    for file in files {
        let mut current = file.path.as_str();
        while let Some((parent, _)) = current.rsplit_once('/') {
            ancestors.insert(parent);
            current = parent;
        }
    }

    let mut kept = Vec::with_capacity(candidates.len());
    for dir in candidates {
        if ancestors.contains(dir.path.as_str()) || filter.is_included(&dir.path) {
            kept.push(dir);
        } else {
            stats.skipped_filtered += 1;
        }
    }
    kept
}

/// `path` relative to `root`, with `/` separators. `None` for the root itself
/// or for paths outside it.
pub(crate) fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn modified_time(meta: &Metadata) -> DateTime<Utc> {
    meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now())
}

#[cfg(unix)]
fn file_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(meta: &Metadata) -> u32 {
    match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

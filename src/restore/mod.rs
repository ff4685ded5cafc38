//! Writing a captured state back onto disk.
//!
//! A restore is best effort and fully reported: a file that cannot be written
//! is recorded in [`RestoreResult::errors`] and the remaining files are still
//! processed. Only a checkpoint that fails its integrity check, or bad
//! filter patterns, stop a restore before it starts.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use filetime::FileTime;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capture::{CaptureEngine, CaptureOptions};
use crate::core::filter::PathFilter;
use crate::core::hash::sha256_hex;
use crate::core::metadata::StoredCheckpoint;
use crate::core::state::{CapturedDirectory, CapturedFile, CapturedState};
use crate::error::{CheckpointError, Result};
use crate::types::ConflictResolution;

/// Options for one restore.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Where to restore; defaults to the state's original root.
    pub target_path: Option<PathBuf>,
    /// Copy the current target aside before writing into it.
    pub create_backup: bool,
    /// Where the backup goes; defaults to a timestamped sibling of the target.
    pub backup_path: Option<PathBuf>,
    /// What to do with target files that already exist.
    pub conflict_resolution: ConflictResolution,
    /// Only restore paths matching one of these globs (empty = everything).
    pub include: Vec<String>,
    /// Never restore paths matching one of these globs.
    pub exclude: Vec<String>,
    /// Apply captured permission bits.
    pub restore_permissions: bool,
    /// Apply captured modification times.
    pub restore_timestamps: bool,
    /// Report what would happen without touching the file system.
    pub dry_run: bool,
    /// Re-hash every written file afterwards.
    pub verify: bool,
    /// Suffix for the checkpoint copy written under [`ConflictResolution::Merge`].
    pub merge_suffix: String,
    /// Globs, relative to the target, left out of the pre-restore backup.
    pub backup_exclude: Vec<String>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            target_path: None,
            create_backup: true,
            backup_path: None,
            conflict_resolution: ConflictResolution::Overwrite,
            include: Vec::new(),
            exclude: Vec::new(),
            restore_permissions: true,
            restore_timestamps: true,
            dry_run: false,
            verify: true,
            merge_suffix: ".restored".to_string(),
            backup_exclude: Vec::new(),
        }
    }
}

impl RestoreOptions {
    /// Restore into `target` instead of the original root.
    pub fn into_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.target_path = Some(target.into());
        self
    }
}

/// One conflict met during a restore and how it was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Relative path of the checkpoint file.
    pub path: String,
    /// Why it was a conflict.
    pub reason: String,
    /// The resolution applied: `overwrite`, `skip` or `merge`.
    pub resolution: ConflictResolution,
}

/// Outcome of a restore.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    /// True when `errors` is empty.
    pub success: bool,
    /// Files written (or that would be written, in a dry run).
    pub files_restored: usize,
    /// Files left alone because of a `skip` resolution.
    pub files_skipped: usize,
    /// Directories that did not exist and were created.
    pub directories_created: usize,
    /// Per-entry failures and verification mismatches.
    pub errors: Vec<String>,
    /// Where the pre-restore backup was written.
    pub backup_path: Option<PathBuf>,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Conflicts met, in path order.
    pub conflicts: Vec<ConflictRecord>,
    /// Dry runs only: the actions that would have been taken.
    pub planned_actions: Vec<String>,
}

/// What a [`ConflictPrompt`] decided for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Replace the existing file.
    Overwrite,
    /// Keep the existing file.
    Skip,
    /// Keep both.
    Merge,
}

impl From<ConflictDecision> for ConflictResolution {
    fn from(decision: ConflictDecision) -> Self {
        match decision {
            ConflictDecision::Overwrite => ConflictResolution::Overwrite,
            ConflictDecision::Skip => ConflictResolution::Skip,
            ConflictDecision::Merge => ConflictResolution::Merge,
        }
    }
}

/// Decides conflicts when the resolution is [`ConflictResolution::Prompt`].
pub trait ConflictPrompt: Send + Sync {
    /// `path` is the checkpoint-relative path, `existing` the file on disk.
    fn decide(&self, path: &str, existing: &Path) -> ConflictDecision;
}

impl<F> ConflictPrompt for F
where
    F: Fn(&str, &Path) -> ConflictDecision + Send + Sync,
{
    fn decide(&self, path: &str, existing: &Path) -> ConflictDecision {
        self(path, existing)
    }
}

/// Reconstructs captured states on disk.
#[derive(Default)]
pub struct RestoreEngine {
    prompt: Option<Arc<dyn ConflictPrompt>>,
    conflicts: Mutex<Vec<ConflictRecord>>,
}

impl std::fmt::Debug for RestoreEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreEngine")
            .field("prompt", &self.prompt.is_some())
            .field("conflicts", &self.conflicts.lock().len())
            .finish()
    }
}

struct Written {
    rel: String,
    dest: PathBuf,
    hash: String,
}

impl RestoreEngine {
    /// Creates an engine without a conflict prompt.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine that asks `prompt` about conflicts under
    /// [`ConflictResolution::Prompt`].
    pub fn with_prompt(prompt: Arc<dyn ConflictPrompt>) -> Self {
        Self {
            prompt: Some(prompt),
            conflicts: Mutex::new(Vec::new()),
        }
    }

    /// Conflicts recorded by the most recent restore.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.lock().clone()
    }

    /// Forgets the recorded conflicts.
    pub fn clear_conflicts(&self) {
        self.conflicts.lock().clear();
    }

    /// Restores every file and directory of `checkpoint`.
    ///
    /// # Errors
    ///
    /// * [`CheckpointError::IntegrityError`] if the checkpoint's content no
    ///   longer matches its recorded hash. Nothing is written in that case.
    /// * [`CheckpointError::InvalidInput`] if a filter pattern is invalid.
    pub fn restore(&self, checkpoint: &StoredCheckpoint, options: &RestoreOptions) -> Result<RestoreResult> {
        ensure_intact(checkpoint)?;
        self.restore_state(&checkpoint.state, options)
    }

    /// Restores only `paths` from `checkpoint`, plus their ancestor
    /// directories. Paths not present in the checkpoint are reported as errors.
    pub fn restore_partial(
        &self,
        checkpoint: &StoredCheckpoint,
        paths: &[String],
        options: &RestoreOptions,
    ) -> Result<RestoreResult> {
        ensure_intact(checkpoint)?;
        let subset = checkpoint.state.subset(paths);
        let mut result = self.restore_state(&subset, options)?;

        for path in paths {
            let trimmed = path.trim_matches('/');
            if subset.file(trimmed).is_none() {
                result.errors.push(format!("{}: not present in checkpoint {}", trimmed, checkpoint.metadata.id));
            }
        }
        result.success = result.errors.is_empty();
        Ok(result)
    }

    /// Restores a state without an integrity precondition. This is the one
    /// algorithm behind both full and partial restores.
    pub fn restore_state(&self, state: &CapturedState, options: &RestoreOptions) -> Result<RestoreResult> {
        let started = Instant::now();
        let filter = PathFilter::new(&options.include, &options.exclude, true)?;
        let target = options.target_path.clone().unwrap_or_else(|| state.root_path.clone());
        self.conflicts.lock().clear();

        let mut result = RestoreResult::default();
        info!(
            "Restoring {} files into '{}'{}",
            state.file_count,
            target.display(),
            if options.dry_run { " (dry run)" } else { "" }
        );

        if options.create_backup && target.exists() {
            let backup_path = match &options.backup_path {
                Some(path) => path.clone(),
                None => default_backup_path(&target)?,
            };
            if options.dry_run {
                result.planned_actions.push(format!("backup '{}' to '{}'", target.display(), backup_path.display()));
            } else {
                match self.create_backup(&target, &backup_path, &options.backup_exclude) {
                    Ok(()) => {
                        info!("Backed up '{}' to '{}'", target.display(), backup_path.display());
                        result.backup_path = Some(backup_path);
                    }
                    Err(e) => {
                        error!("Backup of '{}' failed, restore aborted: {}", target.display(), e);
                        result.errors.push(format!("backup failed: {}", e));
                        result.duration = started.elapsed();
                        return Ok(result);
                    }
                }
            }
        }

        let mut conflicts = Vec::new();
        let written = self.apply(state, &target, options, &filter, &mut result, &mut conflicts);

        if options.verify && !options.dry_run {
            verify_written(&written, &mut result);
        }

        for conflict in &conflicts {
            warn!("Restore conflict at '{}': {} -> {}", conflict.path, conflict.reason, conflict.resolution);
        }
        *self.conflicts.lock() = conflicts.clone();
        result.conflicts = conflicts;
        result.success = result.errors.is_empty();
        result.duration = started.elapsed();

        info!(
            "Restore into '{}' finished: {} restored, {} skipped, {} directories created, {} errors in {:?}",
            target.display(),
            result.files_restored,
            result.files_skipped,
            result.directories_created,
            result.errors.len(),
            result.duration
        );
        Ok(result)
    }

    /// Copies the current target aside as a plain directory tree.
    fn create_backup(&self, target: &Path, backup_path: &Path, exclude: &[String]) -> Result<()> {
        if backup_path.exists() {
            return Err(CheckpointError::AlreadyInUse(format!(
                "backup path '{}' already exists",
                backup_path.display()
            )));
        }

        let mut options = CaptureOptions::everything();
        options.exclude = exclude.to_vec();
        if let Ok(inside) = backup_path.strip_prefix(target) {
            let rel = inside.to_string_lossy().replace('\\', "/");
            options.exclude.push(format!("{}/**", rel));
            options.exclude.push(format!("{}/", rel));
        }
        let (snapshot, stats) = CaptureEngine::new().capture_with_stats(target, &options)?;
        if !stats.errors.is_empty() {
            return Err(CheckpointError::capture(format!(
                "could not read {} entries of '{}': {}",
                stats.errors.len(),
                target.display(),
                stats.errors.join("; ")
            )));
        }

        fs::create_dir_all(backup_path)?;
        let copy_options = RestoreOptions {
            target_path: Some(backup_path.to_path_buf()),
            create_backup: false,
            verify: false,
            ..RestoreOptions::default()
        };
        let mut copy = RestoreResult::default();
        let mut ignored = Vec::new();
        self.apply(&snapshot, backup_path, &copy_options, &PathFilter::allow_all(), &mut copy, &mut ignored);
        if copy.errors.is_empty() {
            Ok(())
        } else {
            Err(CheckpointError::storage(copy.errors.join("; ")))
        }
    }

    /// Writes directories and files of `state` below `target`.
    fn apply(
        &self,
        state: &CapturedState,
        target: &Path,
        options: &RestoreOptions,
        filter: &PathFilter,
        result: &mut RestoreResult,
        conflicts: &mut Vec<ConflictRecord>,
    ) -> Vec<Written> {
        let mut files: Vec<&CapturedFile> = state.files.iter().filter(|f| filter.allows_file(&f.path)).collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let file_dirs: BTreeSet<&str> = files.iter().flat_map(|f| ancestors(&f.path)).collect();
        let mut dirs: Vec<&CapturedDirectory> = state
            .directories
            .iter()
            .filter(|d| {
                !filter.is_dir_excluded(&d.path) && (filter.is_included(&d.path) || file_dirs.contains(d.path.as_str()))
            })
            .collect();
        dirs.sort_by(|a, b| a.path.cmp(&b.path));

        if !options.dry_run && !target.exists() {
            match fs::create_dir_all(target) {
                Ok(()) => result.directories_created += 1,
                Err(e) => {
                    result.errors.push(format!("{}: {}", target.display(), e));
                    return Vec::new();
                }
            }
        }

        for dir in &dirs {
            let Some(dest) = safe_join(target, &dir.path) else {
                result.errors.push(format!("{}: unsafe path in checkpoint", dir.path));
                continue;
            };
            if dest.is_dir() {
                continue;
            }
            if options.dry_run {
                result.planned_actions.push(format!("create directory '{}'", dest.display()));
                result.directories_created += 1;
                continue;
            }
            match fs::create_dir_all(&dest) {
                Ok(()) => result.directories_created += 1,
                Err(e) => result.errors.push(format!("{}: {}", dir.path, e)),
            }
        }

        let mut written = Vec::with_capacity(files.len());
        for file in files {
            let Some(mut dest) = safe_join(target, &file.path) else {
                result.errors.push(format!("{}: unsafe path in checkpoint", file.path));
                continue;
            };

            if let Ok(existing) = fs::symlink_metadata(&dest) {
                let reason = if existing.is_dir() {
                    "a directory exists at the target path"
                } else {
                    "target file already exists"
                };
                let resolution = self.resolve(options.conflict_resolution, &file.path, &dest);
                conflicts.push(ConflictRecord {
                    path: file.path.clone(),
                    reason: reason.to_string(),
                    resolution,
                });
                match resolution {
                    ConflictResolution::Skip => {
                        result.files_skipped += 1;
                        continue;
                    }
                    ConflictResolution::Merge => dest = merge_path(&dest, &options.merge_suffix),
                    _ => {}
                }
            }

            if options.dry_run {
                result.planned_actions.push(format!("write '{}' ({} bytes)", dest.display(), file.size));
                result.files_restored += 1;
                continue;
            }

            match write_file(file, &dest, options) {
                Ok(()) => {
                    result.files_restored += 1;
                    written.push(Written {
                        rel: file.path.clone(),
                        dest,
                        hash: file.hash.clone(),
                    });
                }
                Err(e) => {
                    warn!("Failed to restore '{}': {}", file.path, e);
                    result.errors.push(format!("{}: {}", file.path, e));
                }
            }
        }

        if !options.dry_run {
            // Deepest first, after all files, so read-only directories and
            // file writes cannot interfere with each other.
            for dir in dirs.iter().rev() {
                let Some(dest) = safe_join(target, &dir.path) else { continue };
                if let Err(e) = apply_attributes(&dest, dir.mode, dir.modified, options) {
                    result.errors.push(format!("{}: {}", dir.path, e));
                }
            }
        }

        written
    }

    fn resolve(&self, configured: ConflictResolution, path: &str, existing: &Path) -> ConflictResolution {
        match configured {
            ConflictResolution::Prompt => match &self.prompt {
                Some(prompt) => prompt.decide(path, existing).into(),
                None => {
                    debug!("No conflict prompt installed, skipping '{}'", path);
                    ConflictResolution::Skip
                }
            },
            other => other,
        }
    }
}

fn ensure_intact(checkpoint: &StoredCheckpoint) -> Result<()> {
    if checkpoint.verify_integrity() {
        return Ok(());
    }
    error!(
        "Refusing to restore checkpoint {}: content does not match its recorded state hash",
        checkpoint.metadata.id
    );
    Err(CheckpointError::IntegrityError(format!(
        "checkpoint {} is corrupted (files: {:?})",
        checkpoint.metadata.id,
        checkpoint.state.corrupted_files()
    )))
}

/// Writes `file` at `dest` through a temporary sibling renamed into place.
///
/// The rename replaces whatever entry sits at `dest` (a symlink is replaced,
/// never followed) and needs no write permission on an existing read-only
/// file, only on its directory.
fn write_file(file: &CapturedFile, dest: &Path, options: &RestoreOptions) -> io::Result<()> {
    if fs::symlink_metadata(dest).is_ok_and(|m| m.is_dir()) {
        return Err(io::Error::new(io::ErrorKind::AlreadyExists, "a directory exists at the target path"));
    }
    let parent = dest
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target path has no parent directory"))?;
    fs::create_dir_all(parent)?;

    let tmp = temp_sibling(dest);
    with_writable_dir(parent, || {
        let written = fs::write(&tmp, &file.content).and_then(|()| fs::rename(&tmp, dest));
        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        written
    })?;
    apply_attributes(dest, file.mode, file.modified, options)
}

fn temp_sibling(dest: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(dest.file_name().unwrap_or_default());
    name.push(format!(".{}.restore-tmp", &Uuid::new_v4().simple().to_string()[..8]));
    dest.with_file_name(name)
}

/// Runs `f` with owner write permission on `dir`, putting the previous mode
/// back afterwards. Directories restored read-only stay writable to their
/// owner this way on the next restore.
#[cfg(unix)]
fn with_writable_dir<T>(dir: &Path, f: impl FnOnce() -> io::Result<T>) -> io::Result<T> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(dir)?.permissions().mode() & 0o7777;
    if mode & 0o200 != 0 {
        return f();
    }
    fs::set_permissions(dir, fs::Permissions::from_mode(mode | 0o200))?;
    let outcome = f();
    fs::set_permissions(dir, fs::Permissions::from_mode(mode))?;
    outcome
}

#[cfg(not(unix))]
fn with_writable_dir<T>(_dir: &Path, f: impl FnOnce() -> io::Result<T>) -> io::Result<T> {
    f()
}

fn apply_attributes(path: &Path, mode: u32, modified: DateTime<Utc>, options: &RestoreOptions) -> io::Result<()> {
    if options.restore_timestamps {
        filetime::set_file_mtime(path, FileTime::from_system_time(SystemTime::from(modified)))?;
    }
    if options.restore_permissions {
        set_mode(path, mode)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, permissions)
}

fn verify_written(written: &[Written], result: &mut RestoreResult) {
    for entry in written {
        match fs::read(&entry.dest) {
            Ok(bytes) if sha256_hex(&bytes) == entry.hash => {}
            Ok(_) => {
                error!("Verification failed for '{}': content hash mismatch", entry.rel);
                result.errors.push(format!("{}: content hash mismatch after restore", entry.rel));
            }
            Err(e) => {
                error!("Verification failed for '{}': {}", entry.rel, e);
                result.errors.push(format!("{}: missing after restore ({})", entry.rel, e));
            }
        }
    }
}

/// Joins a checkpoint-relative path onto `target`, refusing anything that
/// could escape it.
fn safe_join(target: &Path, rel: &str) -> Option<PathBuf> {
    let rel_path = Path::new(rel);
    if rel.is_empty() || !rel_path.components().all(|c| matches!(c, Component::Normal(_))) {
        return None;
    }
    Some(target.join(rel_path))
}

fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(i, _)| &path[..i])
}

/// `<dest><suffix>`, or `<dest><suffix>-<n>` when earlier merge copies exist.
fn merge_path(dest: &Path, suffix: &str) -> PathBuf {
    let name = dest.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let base = dest.with_file_name(format!("{}{}", name, suffix));
    if fs::symlink_metadata(&base).is_err() {
        return base;
    }
    (1..10_000)
        .map(|n| dest.with_file_name(format!("{}{}-{}", name, suffix, n)))
        .find(|candidate| fs::symlink_metadata(candidate).is_err())
        .unwrap_or(base)
}

/// `<parent>/<name>.backup-<YYYYmmddTHHMMSS>`, numbered if already taken.
fn default_backup_path(target: &Path) -> Result<PathBuf> {
    let name = target
        .file_name()
        .ok_or_else(|| CheckpointError::invalid_input(format!("cannot back up '{}'", target.display())))?
        .to_string_lossy()
        .into_owned();
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");

    let base = parent.join(format!("{}.backup-{}", name, stamp));
    if !base.exists() {
        return Ok(base);
    }
    (1..1000)
        .map(|n| parent.join(format!("{}.backup-{}-{}", name, stamp, n)))
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| CheckpointError::already_in_use(format!("no free backup name for '{}'", target.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::{CheckpointMetadata, CHECKPOINT_FORMAT_VERSION};
    use assert_matches::assert_matches;
    use std::collections::{BTreeMap, HashMap};
    use tempfile::tempdir;

    fn checkpoint_of(root: &Path) -> StoredCheckpoint {
        let state = CaptureEngine::new().capture(root, &CaptureOptions::default()).unwrap();
        StoredCheckpoint {
            metadata: CheckpointMetadata {
                id: "ckpt-test".into(),
                name: "test".into(),
                description: None,
                created_at: Utc::now(),
                state_hash: state.state_hash.clone(),
                tags: Vec::new(),
                size: state.total_size,
                file_count: state.file_count,
                parent_id: None,
                version: CHECKPOINT_FORMAT_VERSION,
                compressed: false,
                encrypted: false,
                metadata: HashMap::new(),
            },
            state,
        }
    }

    fn tree() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        fs::write(dir.path().join("src/lib.rs"), b"pub fn f() {}").unwrap();
        fs::write(dir.path().join("src/nested/deep.txt"), b"deep").unwrap();
        dir
    }

    fn no_backup() -> RestoreOptions {
        RestoreOptions { create_backup: false, ..RestoreOptions::default() }
    }

    #[test]
    fn test_restore_into_empty_target() {
        let source = tree();
        let cp = checkpoint_of(source.path());
        let out = tempdir().unwrap();
        let target = out.path().join("restored");

        let result = RestoreEngine::new().restore(&cp, &no_backup().into_target(&target)).unwrap();
        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.files_restored, 3);
        assert_eq!(fs::read(target.join("src/nested/deep.txt")).unwrap(), b"deep");
        assert!(target.join("empty").is_dir());
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn test_skip_leaves_existing_untouched() {
        let source = tree();
        let cp = checkpoint_of(source.path());
        fs::write(source.path().join("a.txt"), b"edited").unwrap();

        let options = RestoreOptions { conflict_resolution: ConflictResolution::Skip, ..no_backup() };
        let engine = RestoreEngine::new();
        let result = engine.restore(&cp, &options).unwrap();
        assert_eq!(result.files_restored, 0);
        assert_eq!(result.files_skipped, 3);
        assert_eq!(fs::read(source.path().join("a.txt")).unwrap(), b"edited");
        assert_eq!(engine.conflicts().len(), 3);
        assert!(engine.conflicts().iter().all(|c| c.resolution == ConflictResolution::Skip));
    }

    #[test]
    fn test_merge_keeps_both() {
        let source = tree();
        let cp = checkpoint_of(source.path());
        fs::write(source.path().join("a.txt"), b"edited").unwrap();

        let options = RestoreOptions {
            conflict_resolution: ConflictResolution::Merge,
            include: vec!["a.txt".into()],
            ..no_backup()
        };
        let result = RestoreEngine::new().restore(&cp, &options).unwrap();
        assert!(result.success);
        assert_eq!(result.files_restored, 1);
        assert_eq!(fs::read(source.path().join("a.txt")).unwrap(), b"edited");
        assert_eq!(fs::read(source.path().join("a.txt.restored")).unwrap(), b"alpha");
        assert_eq!(result.conflicts[0].resolution, ConflictResolution::Merge);
    }

    #[test]
    fn test_prompt_without_handler_skips() {
        let source = tree();
        let cp = checkpoint_of(source.path());
        let options = RestoreOptions { conflict_resolution: ConflictResolution::Prompt, ..no_backup() };
        let result = RestoreEngine::new().restore(&cp, &options).unwrap();
        assert_eq!(result.files_skipped, 3);
    }

    #[test]
    fn test_prompt_handler_decides_per_file() {
        let source = tree();
        let cp = checkpoint_of(source.path());
        fs::write(source.path().join("a.txt"), b"edited").unwrap();
        fs::write(source.path().join("src/lib.rs"), b"edited").unwrap();

        let prompt = |path: &str, _: &Path| {
            if path == "a.txt" {
                ConflictDecision::Overwrite
            } else {
                ConflictDecision::Skip
            }
        };
        let engine = RestoreEngine::with_prompt(Arc::new(prompt));
        let options = RestoreOptions { conflict_resolution: ConflictResolution::Prompt, ..no_backup() };
        let result = engine.restore(&cp, &options).unwrap();
        assert_eq!(result.files_restored, 1);
        assert_eq!(result.files_skipped, 2);
        assert_eq!(fs::read(source.path().join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(source.path().join("src/lib.rs")).unwrap(), b"edited");
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let source = tree();
        let cp = checkpoint_of(source.path());
        let out = tempdir().unwrap();
        let target = out.path().join("never");

        let options = RestoreOptions { dry_run: true, ..RestoreOptions::default() }.into_target(&target);
        let result = RestoreEngine::new().restore(&cp, &options).unwrap();
        assert!(!target.exists());
        assert_eq!(result.files_restored, 3);
        assert!(!result.planned_actions.is_empty());
        assert!(result.backup_path.is_none());
    }

    #[test]
    fn test_backup_copies_current_target() {
        let source = tree();
        let cp = checkpoint_of(source.path());
        fs::write(source.path().join("a.txt"), b"work in progress").unwrap();
        fs::write(source.path().join("new.txt"), b"untracked").unwrap();

        let result = RestoreEngine::new().restore(&cp, &RestoreOptions::default()).unwrap();
        assert!(result.success, "errors: {:?}", result.errors);
        let backup = result.backup_path.expect("backup path");
        assert_eq!(fs::read(backup.join("a.txt")).unwrap(), b"work in progress");
        assert_eq!(fs::read(backup.join("new.txt")).unwrap(), b"untracked");
        assert_eq!(fs::read(source.path().join("a.txt")).unwrap(), b"alpha");
        fs::remove_dir_all(backup).unwrap();
    }

    #[test]
    fn test_existing_backup_path_aborts_before_writing() {
        let source = tree();
        let cp = checkpoint_of(source.path());
        fs::write(source.path().join("a.txt"), b"keep me").unwrap();
        let taken = tempdir().unwrap();

        let options = RestoreOptions { backup_path: Some(taken.path().to_path_buf()), ..RestoreOptions::default() };
        let result = RestoreEngine::new().restore(&cp, &options).unwrap();
        assert!(!result.success);
        assert_eq!(result.files_restored, 0);
        assert_eq!(fs::read(source.path().join("a.txt")).unwrap(), b"keep me");
    }

    #[test]
    fn test_corrupted_checkpoint_is_refused() {
        let source = tree();
        let mut cp = checkpoint_of(source.path());
        cp.state.files[0].content.push(b'!');
        let out = tempdir().unwrap();
        let result = RestoreEngine::new().restore(&cp, &no_backup().into_target(out.path()));
        assert_matches!(result, Err(CheckpointError::IntegrityError(_)));
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_partial_restore() {
        let source = tree();
        let cp = checkpoint_of(source.path());
        let out = tempdir().unwrap();

        let paths = vec!["src/nested/deep.txt".to_string(), "missing.txt".to_string()];
        let result = RestoreEngine::new()
            .restore_partial(&cp, &paths, &no_backup().into_target(out.path()))
            .unwrap();
        assert_eq!(result.files_restored, 1);
        assert!(out.path().join("src/nested/deep.txt").is_file());
        assert!(!out.path().join("a.txt").exists());
        assert!(!out.path().join("empty").exists());
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_unsafe_paths_are_rejected() {
        let state = CapturedState::new(
            PathBuf::from("/nowhere"),
            vec![CapturedFile::new("../escape.txt", b"x".to_vec(), 0o644, Utc::now())],
            Vec::new(),
            BTreeMap::new(),
        );
        let out = tempdir().unwrap();
        let result = RestoreEngine::new()
            .restore_state(&state, &no_backup().into_target(out.path().join("t")))
            .unwrap();
        assert!(!result.success);
        assert!(!out.path().join("escape.txt").exists());
    }

    #[test]
    fn test_helpers() {
        assert_eq!(ancestors("a/b/c.txt").collect::<Vec<_>>(), vec!["a", "a/b"]);
        assert_eq!(merge_path(Path::new("/t/a.txt"), ".restored"), PathBuf::from("/t/a.txt.restored"));
        assert!(safe_join(Path::new("/t"), "/etc/passwd").is_none());
        let backup = default_backup_path(Path::new("/tmp/project")).unwrap();
        assert!(backup.to_string_lossy().starts_with("/tmp/project.backup-"));
    }
}

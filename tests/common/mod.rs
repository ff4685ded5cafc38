//! Shared helpers for the integration suites.
#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use checkpoint_engine::storage::MemoryStorage;
use checkpoint_engine::{CheckpointManager, CheckpointStorage, EvictionPolicy, ManagerOptions, RestoreOptions};
use filetime::FileTime;

/// Writes `content` at `rel` below `root`, creating parents.
pub fn write_file(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// Pins a file's modification time to `secs` after the epoch.
pub fn pin_mtime(root: &Path, rel: &str, secs: i64) {
    filetime::set_file_mtime(root.join(rel), FileTime::from_unix_time(secs, 0)).unwrap();
}

/// `a.txt` (5 bytes), `b/c.txt` (10 bytes) and an excluded `node_modules/x.txt`.
pub fn scenario_tree(root: &Path) {
    write_file(root, "a.txt", b"hello");
    write_file(root, "b/c.txt", b"0123456789");
    write_file(root, "node_modules/x.txt", b"ignored");
}

/// A small project with nested directories and an empty one.
pub fn project_tree(root: &Path) {
    write_file(root, "README.md", b"# project\n");
    write_file(root, "src/main.rs", b"fn main() { println!(\"hi\"); }\n");
    write_file(root, "src/util/mod.rs", b"pub fn helper() -> u32 { 42 }\n");
    write_file(root, "assets/logo.bin", &[0u8, 1, 2, 3, 254, 255]);
    fs::create_dir_all(root.join("logs")).unwrap();
}

/// A checkpoint storage over a fresh in-memory backend.
pub fn memory_storage(max: usize, policy: EvictionPolicy) -> (MemoryStorage, Arc<CheckpointStorage>) {
    let backend = MemoryStorage::new();
    let storage = Arc::new(CheckpointStorage::new(Arc::new(backend.clone()), max, policy));
    (backend, storage)
}

/// A manager for `root` over in-memory storage.
pub fn memory_manager(root: &Path) -> CheckpointManager {
    let (_, storage) = memory_storage(50, EvictionPolicy::OldestFirst);
    CheckpointManager::new(root, storage, ManagerOptions::default())
}

/// Restore options without the pre-restore backup.
pub fn restore_without_backup() -> RestoreOptions {
    RestoreOptions {
        create_backup: false,
        ..RestoreOptions::default()
    }
}

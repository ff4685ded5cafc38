mod common;

use std::sync::Arc;
use std::time::Duration;

use checkpoint_engine::storage::StorageLock;
use checkpoint_engine::{
    CheckpointError, CheckpointManager, Config, ConflictResolution, EvictionPolicy, ManagerOptions, NewCheckpoint,
    RestoreOptions,
};
use common::{memory_manager, memory_storage, project_tree, restore_without_backup, write_file};
use tempfile::tempdir;

#[tokio::test]
async fn test_create_compare_restore_cycle() {
    let dir = tempdir().unwrap();
    project_tree(dir.path());
    let manager = memory_manager(dir.path());

    let before = manager
        .create(NewCheckpoint::named("before").with_description("clean tree"))
        .await
        .unwrap();
    write_file(dir.path(), "src/main.rs", b"fn main() { broken( }\n");
    write_file(dir.path(), "NOTES.md", b"scratch");
    std::fs::remove_file(dir.path().join("README.md")).unwrap();
    let after = manager.create(NewCheckpoint::named("after")).await.unwrap();

    let diff = manager.compare(&before, &after).await.unwrap();
    assert_eq!(diff.added, vec!["NOTES.md"]);
    assert_eq!(diff.modified, vec!["src/main.rs"]);
    assert_eq!(diff.deleted, vec!["README.md"]);

    let result = manager.restore(&before, Some(restore_without_backup())).await.unwrap();
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(std::fs::read(dir.path().join("README.md")).unwrap(), b"# project\n");
    assert!(manager.verify(&before).await);
    assert!(manager.verify(&after).await);
}

#[tokio::test]
async fn test_restore_latest_and_by_name() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "state.txt", b"v1");
    let manager = memory_manager(dir.path());
    manager.create(NewCheckpoint::named("v1")).await.unwrap();
    write_file(dir.path(), "state.txt", b"v2");
    manager.create(NewCheckpoint::named("v2")).await.unwrap();

    write_file(dir.path(), "state.txt", b"scribble");
    manager.restore_latest(Some(restore_without_backup())).await.unwrap();
    assert_eq!(std::fs::read(dir.path().join("state.txt")).unwrap(), b"v2");

    manager.restore("v1", Some(restore_without_backup())).await.unwrap();
    assert_eq!(std::fs::read(dir.path().join("state.txt")).unwrap(), b"v1");
}

#[tokio::test]
async fn test_incremental_create_chains_to_latest() {
    let dir = tempdir().unwrap();
    project_tree(dir.path());
    let manager = memory_manager(dir.path());
    let base = manager.create_incremental(NewCheckpoint::named("first")).await.unwrap();

    write_file(dir.path(), "src/main.rs", b"fn main() {}\n");
    let next = manager.create_incremental(NewCheckpoint::named("second")).await.unwrap();

    let stored = manager.storage().load(&next).await.unwrap();
    assert_eq!(stored.metadata.parent_id.as_deref(), Some(base.as_str()));
    assert_eq!(stored.state.metadata.get("incremental"), Some(&serde_json::Value::Bool(true)));
    assert_eq!(manager.compare(&base, &next).await.unwrap().modified, vec!["src/main.rs"]);
}

#[tokio::test]
async fn test_from_config_file_storage_inside_root() {
    let dir = tempdir().unwrap();
    project_tree(dir.path());
    let mut config = Config::default();
    config.capture.include_hidden = true;
    config.restore.create_backup = false;
    config.storage.max_checkpoints = 2;

    let manager = CheckpointManager::from_config(dir.path(), &config).await.unwrap();
    let first = manager.create(NewCheckpoint::named("one")).await.unwrap();
    let second = manager.create(NewCheckpoint::named("two")).await.unwrap();

    // The storage directory never ends up inside its own checkpoints.
    let stored = manager.storage().load(&second).await.unwrap();
    assert!(stored.state.files.iter().all(|f| !f.path.starts_with(".checkpoints")));
    assert!(dir.path().join(".checkpoints/metadata").is_dir());
    assert!(!dir.path().join(".checkpoints/checkpoint.lock").exists());

    manager.create(NewCheckpoint::named("three")).await.unwrap();
    let ids: Vec<String> = manager.list().await.unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(!ids.contains(&first));

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.total_checkpoints, 2);
    assert!(stats.location.ends_with(".checkpoints"));
}

#[tokio::test]
async fn test_held_lock_blocks_mutations() {
    let dir = tempdir().unwrap();
    project_tree(dir.path());
    let manager = CheckpointManager::from_config(dir.path(), &Config::default()).await.unwrap();
    let id = manager.create(NewCheckpoint::named("ok")).await.unwrap();

    let lock = StorageLock::acquire(&dir.path().join(".checkpoints"), Duration::from_secs(300)).unwrap();
    let err = manager.create(NewCheckpoint::named("blocked")).await.unwrap_err();
    assert!(matches!(err, CheckpointError::AlreadyInUse(_)));
    assert!(matches!(manager.delete(&id).await, Err(CheckpointError::AlreadyInUse(_))));
    drop(lock);

    assert!(manager.delete(&id).await.unwrap());
    assert!(manager.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_restore_backup_excludes_storage_dir() {
    let dir = tempdir().unwrap();
    project_tree(dir.path());
    let manager = CheckpointManager::from_config(dir.path(), &Config::default()).await.unwrap();
    let id = manager.create(NewCheckpoint::named("base")).await.unwrap();
    write_file(dir.path(), "README.md", b"dirty");

    let result = manager.restore(&id, None).await.unwrap();
    assert!(result.success, "errors: {:?}", result.errors);
    let backup = result.backup_path.expect("backup created by default");
    assert_eq!(std::fs::read(backup.join("README.md")).unwrap(), b"dirty");
    assert!(!backup.join(".checkpoints").exists());
    std::fs::remove_dir_all(backup).unwrap();
}

#[tokio::test]
async fn test_skip_restore_through_manager() {
    let dir = tempdir().unwrap();
    project_tree(dir.path());
    let manager = memory_manager(dir.path());
    let id = manager.create(NewCheckpoint::named("base")).await.unwrap();

    let options = RestoreOptions {
        conflict_resolution: ConflictResolution::Skip,
        ..restore_without_backup()
    };
    let result = manager.restore(&id, Some(options)).await.unwrap();
    assert_eq!(result.files_restored, 0);
    assert_eq!(result.files_skipped, 4);
    assert_eq!(manager.last_conflicts().len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_auto_checkpoint_timer_creates_tagged_checkpoints() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "a.txt", b"auto");
    let (_, storage) = memory_storage(50, EvictionPolicy::OldestFirst);
    let options = ManagerOptions {
        auto_interval: Duration::from_millis(50),
        ..ManagerOptions::default()
    };
    let manager = Arc::new(CheckpointManager::new(dir.path(), storage, options));

    manager.start_auto_checkpoint().unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(manager.stop_auto_checkpoint().await);

    let autos = manager.storage().find_by_tag("auto").await.unwrap();
    assert!(!autos.is_empty());
    let count = autos.len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(manager.storage().find_by_tag("auto").await.unwrap().len(), count);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_auto_checkpoint_failure_does_not_stop_timer() {
    let dir = tempdir().unwrap();
    let (backend, storage) = memory_storage(50, EvictionPolicy::OldestFirst);
    backend.set_fail_on_save(true);
    let options = ManagerOptions {
        auto_interval: Duration::from_millis(30),
        ..ManagerOptions::default()
    };
    let manager = Arc::new(CheckpointManager::new(dir.path(), storage, options));

    manager.start_auto_checkpoint().unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(manager.is_auto_checkpoint_running());

    backend.set_fail_on_save(false);
    tokio::time::sleep(Duration::from_millis(250)).await;
    manager.stop_auto_checkpoint().await;
    assert!(!manager.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_prune_uses_configured_retention() {
    let dir = tempdir().unwrap();
    project_tree(dir.path());
    let (backend, storage) = memory_storage(50, EvictionPolicy::OldestFirst);
    let options = ManagerOptions {
        retention_days: Some(7),
        ..ManagerOptions::default()
    };
    let manager = CheckpointManager::new(dir.path(), storage, options);
    let old = manager.create(NewCheckpoint::named("old")).await.unwrap();
    manager.create(NewCheckpoint::named("new")).await.unwrap();
    backend.with_stored_mut(&old, |cp| cp.metadata.created_at = chrono::Utc::now() - chrono::Duration::days(8));

    assert_eq!(manager.prune(None).await.unwrap(), 1);
    assert_eq!(manager.list().await.unwrap().len(), 1);
}

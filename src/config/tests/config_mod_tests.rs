use super::*;
use serial_test::serial;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_config_default_values() {
    let cfg = Config::default();
    assert_eq!(cfg.storage.max_checkpoints, 50);
    assert_eq!(cfg.storage.storage_type, StorageType::File);
    assert_eq!(cfg.capture.max_file_size, DEFAULT_MAX_FILE_SIZE);
    assert!(!cfg.capture.follow_symlinks);
    assert!(cfg.restore.create_backup);
    assert_eq!(cfg.restore.conflict_resolution, ConflictResolution::Overwrite);
    assert!(!cfg.auto_checkpoint.enabled);
}

#[test]
#[serial]
fn test_load_existing_file_and_missing_file() {
    let dir = tempdir().expect("create temp dir");
    let mut cfg = Config::default();
    cfg.storage.path = dir.path().join("store").to_string_lossy().into();
    cfg.storage.max_checkpoints = 7;
    cfg.logging.level = LogLevel::Debug;
    cfg.restore.conflict_resolution = ConflictResolution::Skip;

    let config_path = dir.path().join("cfg.toml");
    fs::write(&config_path, cfg.to_toml().expect("serialize config")).unwrap();

    let loaded = Config::load(&config_path).expect("load existing config");
    assert_eq!(loaded.logging.level, LogLevel::Debug);
    assert_eq!(loaded.storage.max_checkpoints, 7);
    assert_eq!(loaded.restore.conflict_resolution, ConflictResolution::Skip);

    let missing_path = dir.path().join("missing.toml");
    let default_loaded = Config::load(&missing_path).expect("load missing");
    assert_eq!(default_loaded.storage.max_checkpoints, 50);
}

#[test]
#[serial]
fn test_partial_file_keeps_other_defaults() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("partial.toml");
    fs::write(
        &config_path,
        "[storage]\nmax_checkpoints = 3\neviction = \"automatic-first\"\n\n[restore]\nconflict_resolution = \"merge\"\n",
    )
    .unwrap();

    let loaded = Config::load(&config_path).unwrap();
    assert_eq!(loaded.storage.max_checkpoints, 3);
    assert_eq!(loaded.storage.eviction, EvictionPolicy::AutomaticFirst);
    assert_eq!(loaded.storage.path, ".checkpoints");
    assert_eq!(loaded.restore.conflict_resolution, ConflictResolution::Merge);
    assert!(loaded.restore.verify);
}

#[test]
#[serial]
fn test_load_invalid_toml_fails() {
    let dir = tempdir().expect("create temp dir");
    let invalid_path = dir.path().join("bad.toml");
    fs::write(&invalid_path, "not = [valid\n").unwrap();

    let err = Config::load(&invalid_path).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError(_)));
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
#[serial]
fn test_unknown_section_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("unknown.toml");
    fs::write(&path, "[compression]\nenabled = true\n").unwrap();
    assert!(Config::load(&path).is_err());
}

#[test]
#[serial]
fn test_apply_env_vars() {
    std::env::set_var("CKPT_LOGGING_LEVEL", "debug");
    std::env::set_var("CKPT_STORAGE_MAX_CHECKPOINTS", "12");
    std::env::set_var("CKPT_STORAGE_PATH", "/var/tmp/ckpts");
    let mut cfg = Config::default();
    cfg.apply_env_vars().unwrap();
    assert_eq!(cfg.logging.level, LogLevel::Debug);
    assert_eq!(cfg.storage.max_checkpoints, 12);
    assert_eq!(cfg.storage.path, "/var/tmp/ckpts");
    std::env::remove_var("CKPT_LOGGING_LEVEL");
    std::env::remove_var("CKPT_STORAGE_MAX_CHECKPOINTS");
    std::env::remove_var("CKPT_STORAGE_PATH");

    std::env::set_var("CKPT_STORAGE_MAX_CHECKPOINTS", "many");
    let mut cfg = Config::default();
    assert!(cfg.apply_env_vars().is_err());
    std::env::remove_var("CKPT_STORAGE_MAX_CHECKPOINTS");
}

#[test]
fn test_options_follow_sections() {
    let mut cfg = Config::default();
    cfg.capture.include_hidden = true;
    cfg.capture.max_file_size = 1024;
    cfg.restore.verify = false;
    cfg.restore.merge_suffix = ".ours".into();

    let capture = cfg.capture_options();
    assert!(capture.include_hidden);
    assert_eq!(capture.max_file_size, 1024);
    assert!(capture.base_state.is_none());

    let restore = cfg.restore_options();
    assert!(!restore.verify);
    assert_eq!(restore.merge_suffix, ".ours");
    assert!(restore.target_path.is_none());
}

#[test]
fn test_config_dir_returns_valid_path() {
    if let Some(path) = Config::config_dir() {
        assert!(path.ends_with("checkpoint-engine"));
    }
}

//! CLI integration tests for Pontual.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const ENV_VARS: &[&str] = &[
    "PONTUAL_CONFIG",
    "PONTUAL_HOST",
    "PONTUAL_PORT",
    "PONTUAL_STORAGE",
    "PONTUAL_DB_PATH",
    "PONTUAL_JWT_SECRET",
    "PONTUAL_LOG_JSON",
];

/// A pontual command isolated from the caller's environment, run in `dir`.
fn pontual(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("pontual");
    cmd.current_dir(dir.path());
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        let dir = TempDir::new().unwrap();
        pontual(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("create-user"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        pontual(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_storage_is_rejected() {
        let dir = TempDir::new().unwrap();
        pontual(&dir)
            .args(["--storage", "mongo", "init"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid storage backend"));
    }
}

// =============================================================================
// Storage initialization
// =============================================================================

mod init {
    use super::*;

    #[test]
    fn test_init_creates_default_sqlite_database() {
        let dir = TempDir::new().unwrap();
        pontual(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized sqlite storage"));
        assert!(dir.path().join("data/pontual.db").exists());
    }

    #[test]
    fn test_init_file_backend_writes_json_document() {
        let dir = TempDir::new().unwrap();
        pontual(&dir)
            .args(["--storage", "file", "--db-path", "store.json", "init"])
            .assert()
            .success();
        let raw = fs::read_to_string(dir.path().join("store.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(doc.is_object());
    }

    #[test]
    fn test_init_uses_config_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("pontual.toml"),
            "[storage]\nbackend = \"sqlite\"\npath = \"custom/p.db\"\n",
        )
        .unwrap();
        pontual(&dir).arg("init").assert().success();
        assert!(dir.path().join("custom/p.db").exists());
    }

    #[test]
    fn test_missing_explicit_config_fails() {
        let dir = TempDir::new().unwrap();
        pontual(&dir)
            .args(["--config", "absent.toml", "init"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read config file"));
    }
}

// =============================================================================
// Users and configuration
// =============================================================================

mod accounts {
    use super::*;

    #[test]
    fn test_create_user_then_duplicate_fails() {
        let dir = TempDir::new().unwrap();
        pontual(&dir)
            .args(["create-user", "ana", "--password", "secret123", "--admin"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created admin 'ana'"))
            .stdout(predicate::str::contains("API key: pk_"));

        pontual(&dir)
            .args(["create-user", "ANA", "--password", "secret123"])
            .assert()
            .failure();
    }

    #[test]
    fn test_create_user_enforces_password_policy() {
        let dir = TempDir::new().unwrap();
        pontual(&dir)
            .args(["create-user", "bia", "--password", "123"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("password"));
    }

    #[test]
    fn test_config_show_masks_secret_and_warns() {
        let dir = TempDir::new().unwrap();
        pontual(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[server]"))
            .stdout(predicate::str::contains("warning: auth.jwt_secret"));

        pontual(&dir)
            .env("PONTUAL_JWT_SECRET", "super-secret-value")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("super-secret-value").not())
            .stdout(predicate::str::contains("configuration is valid"));
    }

    #[test]
    fn test_serve_refuses_invalid_config() {
        let dir = TempDir::new().unwrap();
        pontual(&dir)
            .args(["--storage", "memory", "serve"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("jwt_secret"));
    }
}

//! Integration tests for the migrator binary.
//!
//! These drive the CLI end to end: catalog output, configuration commands
//! and the startup checks of `serve`.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a migrator Command running in `dir`
fn migrator(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("migrator");
    cmd.current_dir(dir.path()).env_remove("MIGRATOR_CONFIG");
    cmd
}

fn create_temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = create_temp_dir();
        migrator(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("catalog"));
    }

    #[test]
    fn test_version() {
        let dir = create_temp_dir();
        migrator(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_unknown_command_fails() {
        let dir = create_temp_dir();
        migrator(&dir).arg("migrate-everything").assert().failure();
    }

    #[test]
    fn test_serve_help_lists_flags() {
        let dir = create_temp_dir();
        migrator(&dir)
            .args(["serve", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--work-dir"))
            .stdout(predicate::str::contains("--max-jobs"))
            .stdout(predicate::str::contains("--dev"));
    }
}

// =============================================================================
// Catalog
// =============================================================================

mod catalog {
    use super::*;

    #[test]
    fn test_catalog_lists_conversions() {
        let dir = create_temp_dir();
        migrator(&dir)
            .arg("catalog")
            .assert()
            .success()
            .stdout(predicate::str::contains("java_version"))
            .stdout(predicate::str::contains("maven_to_gradle"))
            .stdout(predicate::str::contains("Java 17 (LTS)"));
    }

    #[test]
    fn test_catalog_json_is_parseable() {
        let dir = create_temp_dir();
        let output = migrator(&dir)
            .args(["catalog", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let conversions = body["conversion_types"].as_array().unwrap();
        assert!(conversions.iter().any(|c| c["id"] == "javax_to_jakarta"));
        assert!(
            body["java_versions"]["target_versions"]
                .as_array()
                .unwrap()
                .iter()
                .any(|v| v["value"] == "21")
        );
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_init_creates_file() {
        let dir = create_temp_dir();
        migrator(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created migrator.toml"));

        let content = fs::read_to_string(dir.path().join("migrator.toml")).unwrap();
        assert!(content.contains("[server]"));
        assert!(content.contains("max_concurrent_jobs = 4"));
    }

    #[test]
    fn test_config_init_does_not_overwrite() {
        let dir = create_temp_dir();
        fs::write(dir.path().join("migrator.toml"), "[server]\nport = 9000\n").unwrap();

        migrator(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
        let content = fs::read_to_string(dir.path().join("migrator.toml")).unwrap();
        assert!(content.contains("port = 9000"));

        migrator(&dir)
            .args(["config", "init", "--force"])
            .assert()
            .success();
        let content = fs::read_to_string(dir.path().join("migrator.toml")).unwrap();
        assert!(content.contains("port = 8000"));
    }

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_dir();
        migrator(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("showing defaults"))
            .stdout(predicate::str::contains("[pipeline]"))
            .stdout(predicate::str::contains("strict_tests = false"));
    }

    #[test]
    fn test_config_show_reflects_file() {
        let dir = create_temp_dir();
        fs::write(
            dir.path().join("custom.toml"),
            "[pipeline]\nmax_concurrent_jobs = 7\n",
        )
        .unwrap();
        migrator(&dir)
            .args(["--config", "custom.toml", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_concurrent_jobs = 7"));
    }

    #[test]
    fn test_config_validate_defaults_are_valid() {
        let dir = create_temp_dir();
        migrator(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_dir();
        fs::write(
            dir.path().join("migrator.toml"),
            "[pipeline]\nclone_max_retries = 50\n",
        )
        .unwrap();
        migrator(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings:"))
            .stdout(predicate::str::contains("clone_max_retries"));
    }

    #[test]
    fn test_config_validate_rejects_zero_concurrency() {
        let dir = create_temp_dir();
        fs::write(
            dir.path().join("migrator.toml"),
            "[pipeline]\nmax_concurrent_jobs = 0\n",
        )
        .unwrap();
        migrator(&dir)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("max_concurrent_jobs"));
    }

    #[test]
    fn test_missing_explicit_config_fails() {
        let dir = create_temp_dir();
        migrator(&dir)
            .args(["--config", "nope.toml", "config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("nope.toml"));
    }

    #[test]
    fn test_malformed_config_fails() {
        let dir = create_temp_dir();
        fs::write(dir.path().join("migrator.toml"), "[server\nport = ").unwrap();
        migrator(&dir)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("migrator.toml"));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = create_temp_dir();
        migrator(&dir)
            .args(["config", "show"])
            .env("MIGRATOR_PORT", "9443")
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 9443"));
    }
}

// =============================================================================
// Serve startup checks
// =============================================================================

mod serve {
    use super::*;

    #[test]
    fn test_serve_rejects_zero_max_jobs() {
        let dir = create_temp_dir();
        migrator(&dir)
            .args(["serve", "--max-jobs", "0", "--port", "0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn test_serve_rejects_bad_env_value() {
        let dir = create_temp_dir();
        migrator(&dir)
            .arg("serve")
            .env("MIGRATOR_PORT", "not-a-port")
            .assert()
            .failure()
            .stderr(predicate::str::contains("MIGRATOR_PORT"));
    }
}

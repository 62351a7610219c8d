//! Integration tests for the command-line interface.

#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Workspace with a config file pointing every store path into `dir`.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = format!(
            "[storage]\ndatabase = {:?}\nupload_dir = {:?}\n",
            dir.path().join("earshot.db"),
            dir.path().join("uploads"),
        );
        std::fs::write(dir.path().join("config.toml"), config).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn config(&self) -> PathBuf {
        self.path().join("config.toml")
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = cargo_bin_cmd!("earshot");
        cmd.env_remove("EARSHOT_DB")
            .env_remove("EARSHOT_OUTPUT_MODE")
            .arg("--config")
            .arg(self.config())
            .arg("--no-progress");
        cmd
    }
}

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("earshot");
    cmd.arg("--help");
    cmd.assert().success().stdout(
        predicate::str::contains("predict")
            .and(predicate::str::contains("train"))
            .and(predicate::str::contains("classes"))
            .and(predicate::str::contains("alerts"))
            .and(predicate::str::contains("evaluations")),
    );
}

#[test]
fn test_config_path_follows_flag() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_init_does_not_overwrite() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nested").join("config.toml");

    let mut cmd = cargo_bin_cmd!("earshot");
    cmd.arg("--config").arg(&path).args(["config", "init"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Created configuration file"));
    assert!(path.exists());

    let mut cmd = cargo_bin_cmd!("earshot");
    cmd.arg("--config").arg(&path).args(["config", "init"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn test_classes_add_and_list() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["classes", "add", "siren", "-c", "0.8", "-d", "Emergency siren"])
        .assert()
        .success()
        .stdout(predicate::str::contains("siren"));

    ws.cmd()
        .args(["classes", "add", "siren"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    ws.cmd()
        .args(["classes", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("siren").and(predicate::str::contains("0.80")));
}

#[test]
fn test_json_output_is_enveloped() {
    let ws = Workspace::new();
    ws.cmd().args(["classes", "add", "horn"]).assert().success();

    ws.cmd()
        .args(["--output-mode", "json", "classes", "list"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"notifiable_class_list\"")
                .and(predicate::str::contains("\"horn\""))
                .and(predicate::str::contains("\"spec_version\":\"1.0\"")),
        );
}

#[test]
fn test_json_error_envelope() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["--output-mode", "json", "classes", "show", "thunder"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"event\":\"error\""))
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_alert_below_threshold_is_rejected() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["classes", "add", "siren", "-c", "0.8"])
        .assert()
        .success();

    ws.cmd()
        .args([
            "alerts", "create", "siren", "--lat", "40.7", "--lon", "-74.0", "-c", "0.5",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("alert rejected"));

    ws.cmd()
        .args([
            "alerts", "create", "siren", "--lat", "40.7", "--lon", "-74.0", "-c", "0.9",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created alert #"));

    ws.cmd()
        .args([
            "alerts", "nearby", "--lat", "40.71", "--lon", "-74.0", "-r", "5",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("km"));
}

#[test]
fn test_nearby_without_alerts() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["alerts", "nearby", "--lat", "-33.9", "--lon", "151.2", "-r", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No alerts within 2 km."));
}

#[test]
fn test_evaluations_add_and_stats() {
    let ws = Workspace::new();
    ws.cmd()
        .args([
            "evaluations", "add", "rec.wav", "--class", "siren", "-c", "0.9", "--correct",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded evaluation #1"));
    ws.cmd()
        .args([
            "evaluations", "add", "rec2.wav", "--class", "siren", "-c", "0.7", "--wrong",
        ])
        .assert()
        .success();

    ws.cmd()
        .args(["evaluations", "stats"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("2 evaluation(s), 1 correct, 1 wrong")
                .and(predicate::str::contains("50.0% success")),
        );
}

#[test]
fn test_empty_predictions_list() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["predictions", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No predictions stored."));
}

#[test]
fn test_db_flag_overrides_config() {
    let ws = Workspace::new();
    let other = ws.path().join("other.db");
    ws.cmd()
        .arg("--db")
        .arg(&other)
        .args(["classes", "add", "horn"])
        .assert()
        .success();
    assert!(other.exists());

    ws.cmd()
        .args(["classes", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No notifiable classes."));
}

#[test]
fn test_predict_missing_file_fails() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["predict"])
        .arg(ws.path().join("missing.wav"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_nearby_accepts_widest_hour_window() {
    let ws = Workspace::new();
    ws.cmd()
        .args([
            "alerts", "nearby", "--lat", "39.9", "--lon", "32.8", "--hours", "4294967295",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("No alerts within"));
}

#[test]
fn test_oversized_validity_window_is_rejected() {
    let ws = Workspace::new();
    let mut config = std::fs::read_to_string(ws.config()).unwrap();
    config.push_str("\n[alerts]\nvalidity_hours = 9223372036854775807\n");
    std::fs::write(ws.config(), config).unwrap();

    ws.cmd()
        .args([
            "alerts", "create", "siren", "--lat", "39.9", "--lon", "32.8", "-c", "0.9",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("validity_hours"));
}

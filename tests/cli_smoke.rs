//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use camino::Utf8PathBuf;
use jumpbox::{InstallationTag, ResourceKey, ResourceKind, ResourceRecord, StateStore};
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;

/// A command isolated from the caller's configuration and credentials.
fn jumpbox(state_root: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("jumpbox");
    cmd.current_dir(state_root.path())
        .env("JUMPBOX_STATE_ROOT", state_root.path())
        .env("RUST_LOG", "off")
        .env_remove("JUMPBOX_TAG")
        .env_remove("JUMPBOX_STATE_DIR")
        .env_remove("JUMPBOX_CONFIG_PATH")
        .env_remove("AWS_ACCESS_KEY_ID")
        .env_remove("AWS_SECRET_ACCESS_KEY");
    cmd
}

#[test]
fn without_arguments_prints_usage() {
    let tmp = TempDir::new().expect("tempdir");
    jumpbox(&tmp)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_subcommands() {
    let tmp = TempDir::new().expect("tempdir");
    jumpbox(&tmp)
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("up")
                .and(predicate::str::contains("down"))
                .and(predicate::str::contains("status")),
        );
}

#[test]
fn missing_tag_without_prompting_is_fatal() {
    let tmp = TempDir::new().expect("tempdir");
    jumpbox(&tmp)
        .args(["--no-input", "status"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("JUMPBOX_TAG"));
}

#[test]
fn status_without_state_reports_missing_installation() {
    let tmp = TempDir::new().expect("tempdir");
    jumpbox(&tmp)
        .args(["--no-input", "--tag", "demo", "status"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no state found for installation 'demo'"));
}

#[test]
fn status_lists_recorded_resources() {
    let tmp = TempDir::new().expect("tempdir");
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("demo")).expect("utf8 path");
    let store = StateStore::open(&path, &InstallationTag::new("demo").expect("tag"))
        .expect("store");
    store
        .save(&ResourceRecord::new(
            &ResourceKey::new(ResourceKind::Vpc, "main"),
            json!({"Vpc": {"VpcId": "vpc-0abc"}}),
        ))
        .expect("save");

    jumpbox(&tmp)
        .args(["--no-input", "--tag", "demo", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("vpc").and(predicate::str::contains("vpc-0abc")));
}

#[test]
fn down_with_no_records_succeeds_without_cloud_calls() {
    let tmp = TempDir::new().expect("tempdir");
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("demo")).expect("utf8 path");
    StateStore::open(&path, &InstallationTag::new("demo").expect("tag")).expect("store");

    jumpbox(&tmp)
        .env("AWS_AWS_BIN", "/nonexistent/aws")
        .args(["--no-input", "--tag", "demo", "--region", "eu-west-1", "down"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted 0, failed 0"));
}

#[test]
fn state_of_another_installation_is_refused() {
    let tmp = TempDir::new().expect("tempdir");
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("demo")).expect("utf8 path");
    StateStore::open(&path, &InstallationTag::new("other").expect("tag")).expect("store");

    jumpbox(&tmp)
        .args(["--no-input", "--tag", "demo", "status"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("belongs to installation 'other'"));
}

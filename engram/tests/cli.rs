//! CLI surface tests
//!
//! Each test points the XDG directories at a private temp root so the
//! binary never touches the invoking user's real state.

use assert_cmd::Command;
use tempfile::TempDir;

fn engram(root: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("engram").unwrap();
    cmd.env("XDG_CONFIG_HOME", root.path().join("config"))
        .env("XDG_DATA_HOME", root.path().join("data"))
        .env("XDG_STATE_HOME", root.path().join("state"));
    cmd
}

fn tmpdir() -> TempDir {
    tempfile::Builder::new()
        .prefix("engram-test")
        .tempdir()
        .unwrap()
}

#[test]
fn test_list_is_empty_by_default() {
    let root = tmpdir();
    engram(&root)
        .args(["watch", "list"])
        .assert()
        .success()
        .stdout(predicates::str::contains("No watched directories"));
}

#[test]
fn test_add_then_list_then_remove() {
    let root = tmpdir();
    let watched = root.path().join("notes");
    std::fs::create_dir_all(&watched).unwrap();

    engram(&root)
        .args(["watch", "add"])
        .arg(&watched)
        .assert()
        .success()
        .stdout(predicates::str::contains("Watching"));

    engram(&root)
        .args(["watch", "list"])
        .assert()
        .success()
        .stdout(predicates::str::contains("recursive"));

    engram(&root)
        .args(["watch", "remove"])
        .arg(&watched)
        .assert()
        .success()
        .stdout(predicates::str::contains("Stopped watching"));

    engram(&root)
        .args(["watch", "list"])
        .assert()
        .success()
        .stdout(predicates::str::contains("No watched directories"));
}

#[test]
fn test_add_missing_directory_fails() {
    let root = tmpdir();
    engram(&root)
        .args(["watch", "add"])
        .arg(root.path().join("does-not-exist"))
        .assert()
        .failure();
}

#[test]
fn test_status_when_not_running() {
    let root = tmpdir();
    engram(&root)
        .args(["watch", "status"])
        .assert()
        .success()
        .stdout(predicates::str::contains("not running"));
}

#[test]
fn test_stop_when_not_running() {
    let root = tmpdir();
    engram(&root)
        .args(["watch", "stop"])
        .assert()
        .success()
        .stdout(predicates::str::contains("not running"));
}

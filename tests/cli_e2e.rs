//! End-to-end CLI tests for the chanfetch binary.

mod support;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use support::socket_guard::start_mock_server_or_skip;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

/// Test that the binary can be invoked without input and exits with code 0.
#[test]
fn test_binary_invocation_returns_zero() {
    let mut cmd = Command::cargo_bin("chanfetch").unwrap();
    cmd.assert().success();
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("chanfetch").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Archive media from image board"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("chanfetch").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("chanfetch"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    let mut cmd = Command::cargo_bin("chanfetch").unwrap();
    cmd.arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

/// Non-board URLs are skipped and nothing is written.
#[test]
fn test_binary_skips_unrecognized_urls() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("chanfetch").unwrap();
    cmd.arg("-o")
        .arg(dir.path())
        .arg("https://example.com/g/thread/1")
        .assert()
        .success()
        .stdout(predicate::str::contains("No valid board URLs"));
    assert!(!dir.path().join(".chanfetch").exists());
}

/// Full run against a mock API: files land in the thread folder.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_binary_archives_thread() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/g/thread/42.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"posts": [
            {"no": 42, "tim": 4200, "ext": ".jpg"},
            {"no": 43, "tim": 4300, "ext": ".webm"},
        ]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdn/g/4200.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg bytes".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdn/g/4300.webm"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"webm bytes".to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let output = dir.path().to_path_buf();
    let uri = server.uri();
    let assert = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("chanfetch")
            .unwrap()
            .arg("-o")
            .arg(&output)
            .args(["-l", "0", "--min-free-space", "0"])
            .arg("--api-base")
            .arg(&uri)
            .arg("--cdn-base")
            .arg(format!("{uri}/cdn"))
            .arg("https://boards.4chan.org/g/thread/42")
            .assert()
    })
    .await
    .unwrap();
    assert.success();

    let folder = dir.path().join("g-42");
    assert_eq!(std::fs::read(folder.join("1.jpg")).unwrap(), b"jpeg bytes");
    assert_eq!(
        std::fs::read(folder.join("WEBM").join("2.webm")).unwrap(),
        b"webm bytes"
    );
    assert!(dir.path().join(".chanfetch").join("ledger.db").exists());
}

/// A target whose metadata fetch fails makes the run exit non-zero.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_binary_fails_on_fetch_error() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let output = dir.path().to_path_buf();
    let uri = server.uri();
    let assert = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("chanfetch")
            .unwrap()
            .arg("-o")
            .arg(&output)
            .args(["-l", "0", "--min-free-space", "0"])
            .arg("--api-base")
            .arg(&uri)
            .arg("https://boards.4chan.org/g/thread/1")
            .assert()
    })
    .await
    .unwrap();
    assert
        .failure()
        .stderr(predicate::str::contains("targets finished with errors"));
}

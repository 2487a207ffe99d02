// ABOUTME: Integration tests for the conveyor CLI commands.
// ABOUTME: Validates --help output, init, and full runs through shell command backends.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;

fn conveyor_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("conveyor"));
    for var in [
        "GITHUB_TOKEN",
        "GITHUB_EVENT_NAME",
        "GITHUB_REF",
        "GITHUB_SHA",
        "GITHUB_REPOSITORY",
        "GITHUB_STEP_SUMMARY",
        "GITHUB_OUTPUT",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

/// Answer every HTTP request with 200 on a background thread.
fn healthy_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok");
        }
    });
    format!("http://{}", addr)
}

/// A project whose backends are shell one-liners.
fn write_project(dir: &Path, build: &str, endpoint: &str) {
    let config = format!(
        r#"
app: shop
registry: r.io/acme
deploy:
  health_check:
    path: /health
    timeout: 5s
    interval: 50ms
    request_timeout: 1s
retry:
  base_delay: 1ms
  max_delay: 5ms
commands:
  build: {build}
  push: [sh, -c, "echo 'abc: digest: sha256:0123abcd size: 1'"]
  delete: "true"
  apply: [sh, -c, "cat > /dev/null; echo {endpoint}"]
"#
    );
    fs::write(dir.join("conveyor.yml"), config).unwrap();
}

fn run_args(cmd: &mut Command, dir: &Path) {
    cmd.arg("-C")
        .arg(dir)
        .args(["run", "--event", "push", "--ref", "refs/heads/main"])
        .args(["--sha", "abc123def4567890", "--repo", "acme/shop"]);
}

#[test]
fn help_shows_commands() {
    conveyor_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("rollback"))
        .stdout(predicate::str::contains("history"));
}

#[test]
fn init_creates_config_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("conveyor.yml");

    conveyor_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--app", "shop", "--registry", "us.icr.io/acme/"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created conveyor.yml"));

    let content = fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("app: shop"));
    assert!(content.contains("registry: us.icr.io/acme\n"));
}

#[test]
fn init_refuses_to_overwrite_existing_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("conveyor.yml");
    fs::write(&config_path, "existing: config").unwrap();

    conveyor_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    assert_eq!(fs::read_to_string(&config_path).unwrap(), "existing: config");
}

#[test]
fn init_force_overwrites() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("conveyor.yml");
    fs::write(&config_path, "existing: config").unwrap();

    conveyor_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--force"])
        .assert()
        .success();

    assert!(fs::read_to_string(&config_path).unwrap().contains("registry:"));
}

#[test]
fn run_without_config_fails() {
    let temp_dir = tempfile::tempdir().unwrap();

    let mut cmd = conveyor_cmd();
    run_args(&mut cmd, temp_dir.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("configuration file not found"));
}

#[test]
fn run_without_sha_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    write_project(temp_dir.path(), "\"true\"", "http://127.0.0.1:1");

    conveyor_cmd()
        .arg("-C")
        .arg(temp_dir.path())
        .args(["run", "--event", "push", "--ref", "refs/heads/main"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GITHUB_SHA"));
}

#[test]
fn run_deploys_and_records_history() {
    let temp_dir = tempfile::tempdir().unwrap();
    write_project(temp_dir.path(), "\"true\"", &healthy_endpoint());
    let outputs = temp_dir.path().join("github-output");

    let mut cmd = conveyor_cmd();
    run_args(&mut cmd, temp_dir.path());
    cmd.env("GITHUB_OUTPUT", &outputs)
        .assert()
        .success()
        .stdout(predicate::str::contains("Outcome:      success"))
        .stdout(predicate::str::contains("r.io/acme/shop:abc123d@sha256:0123abcd"));

    let outputs = fs::read_to_string(outputs).unwrap();
    assert!(outputs.contains("deployment-status=success"));

    conveyor_cmd()
        .arg("-C")
        .arg(temp_dir.path())
        .args(["history", "--namespace", "production"])
        .assert()
        .success()
        .stdout(predicate::str::contains("r1"))
        .stdout(predicate::str::contains("healthy"));
}

#[test]
fn failed_build_exits_nonzero() {
    let temp_dir = tempfile::tempdir().unwrap();
    write_project(
        temp_dir.path(),
        "[sh, -c, \"echo 'COPY failed' >&2; exit 1\"]",
        "http://127.0.0.1:1",
    );

    let mut cmd = conveyor_cmd();
    run_args(&mut cmd, temp_dir.path());
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("Outcome:      failed"))
        .stderr(predicate::str::contains("COPY failed"));
}

#[test]
fn json_output_is_machine_readable() {
    let temp_dir = tempfile::tempdir().unwrap();
    write_project(temp_dir.path(), "\"true\"", &healthy_endpoint());

    let mut cmd = conveyor_cmd();
    cmd.args(["--output", "json"]);
    run_args(&mut cmd, temp_dir.path());
    let output = cmd.assert().success().get_output().stdout.clone();

    let last = String::from_utf8(output)
        .unwrap()
        .lines()
        .last()
        .unwrap()
        .to_string();
    let value: serde_json::Value = serde_json::from_str(&last).unwrap();
    assert_eq!(value["outcome"], "success");
    assert_eq!(value["namespace"], "production");
}

#[test]
fn history_of_unknown_namespace_is_empty() {
    let temp_dir = tempfile::tempdir().unwrap();
    write_project(temp_dir.path(), "\"true\"", "http://127.0.0.1:1");

    conveyor_cmd()
        .arg("-C")
        .arg(temp_dir.path())
        .args(["history", "--namespace", "staging"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No revisions recorded for staging"));
}

#[test]
fn rollback_without_history_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    write_project(temp_dir.path(), "\"true\"", "http://127.0.0.1:1");

    conveyor_cmd()
        .arg("-C")
        .arg(temp_dir.path())
        .args(["rollback", "--namespace", "production"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no healthy revision"));
}

// ABOUTME: Integration tests for the acceptance test runner.
// ABOUTME: Tests hook discovery, configured commands, env vars and timeouts.

use conveyor::acceptance::{AcceptanceContext, AcceptanceRunner};
use conveyor::config::AcceptanceConfig;
use conveyor::types::{AppName, Environment, Namespace};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use tempfile::TempDir;

fn create_hook(dir: &TempDir, script: &str) {
    let hooks_dir = dir.path().join(".conveyor").join("hooks");
    fs::create_dir_all(&hooks_dir).unwrap();

    let hook_path = hooks_dir.join("acceptance-test");
    fs::write(&hook_path, script).unwrap();

    let mut perms = fs::metadata(&hook_path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&hook_path, perms).unwrap();
}

fn config(command: Option<&[&str]>, timeout: Duration) -> AcceptanceConfig {
    AcceptanceConfig {
        enabled: true,
        command: command.map(|c| c.iter().map(|s| s.to_string()).collect()),
        timeout,
    }
}

fn test_context() -> AcceptanceContext {
    AcceptanceContext {
        app: AppName::new("shop").unwrap(),
        image: "r.io/acme/shop:abc1234".to_string(),
        namespace: Namespace::new("staging").unwrap(),
        environment: Environment::Staging,
        url: "https://shop-staging.example.com".to_string(),
    }
}

/// Test: hook script is found and run when no command is configured.
#[tokio::test]
async fn hook_script_runs() {
    let temp_dir = TempDir::new().unwrap();
    create_hook(&temp_dir, "#!/bin/sh\necho 'smoke tests ran'\nexit 0\n");

    let runner = AcceptanceRunner::new(temp_dir.path(), &config(None, Duration::from_secs(10)));
    assert!(runner.exists());

    let result = runner.run(&test_context()).await.unwrap();
    assert!(result.success);
    assert!(result.stdout.contains("smoke tests ran"));
}

/// Test: hook receives the deployment as environment variables.
#[tokio::test]
async fn hook_receives_environment() {
    let temp_dir = TempDir::new().unwrap();
    create_hook(
        &temp_dir,
        "#!/bin/sh\necho \"$CONVEYOR_APP $CONVEYOR_NAMESPACE $CONVEYOR_ENVIRONMENT $CONVEYOR_URL $CONVEYOR_IMAGE\"\n",
    );

    let runner = AcceptanceRunner::new(temp_dir.path(), &config(None, Duration::from_secs(10)));
    let result = runner.run(&test_context()).await.unwrap();

    assert_eq!(
        result.stdout.trim(),
        "shop staging staging https://shop-staging.example.com r.io/acme/shop:abc1234"
    );
}

/// Test: failing hook reports exit code and stderr.
#[tokio::test]
async fn failing_hook_reports_reason() {
    let temp_dir = TempDir::new().unwrap();
    create_hook(
        &temp_dir,
        "#!/bin/sh\necho 'GET /cart' >&2\necho 'expected 200, got 502' >&2\nexit 4\n",
    );

    let runner = AcceptanceRunner::new(temp_dir.path(), &config(None, Duration::from_secs(10)));
    let result = runner.run(&test_context()).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(4));
    let reason = result.failure_reason();
    assert!(reason.contains("4"), "{}", reason);
    assert!(reason.contains("expected 200, got 502"), "{}", reason);
}

/// Test: configured command takes precedence over the hook.
#[tokio::test]
async fn command_overrides_hook() {
    let temp_dir = TempDir::new().unwrap();
    create_hook(&temp_dir, "#!/bin/sh\nexit 1\n");

    let runner = AcceptanceRunner::new(
        temp_dir.path(),
        &config(Some(&["sh", "-c", "echo from-command"]), Duration::from_secs(10)),
    );
    let result = runner.run(&test_context()).await.unwrap();

    assert!(result.success);
    assert!(result.stdout.contains("from-command"));
}

/// Test: command runs in the project directory.
#[tokio::test]
async fn command_runs_in_project_dir() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("marker.txt"), "here").unwrap();

    let runner = AcceptanceRunner::new(
        temp_dir.path(),
        &config(Some(&["cat", "marker.txt"]), Duration::from_secs(10)),
    );
    let result = runner.run(&test_context()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.stdout, "here");
}

/// Test: a test that runs past its timeout is killed and fails.
#[tokio::test]
async fn slow_test_times_out() {
    let temp_dir = TempDir::new().unwrap();
    let runner = AcceptanceRunner::new(
        temp_dir.path(),
        &config(Some(&["sleep", "30"]), Duration::from_millis(200)),
    );

    let started = std::time::Instant::now();
    let result = runner.run(&test_context()).await.unwrap();

    assert!(!result.success);
    assert!(result.timed_out);
    assert!(started.elapsed() < Duration::from_secs(10));
}

/// Test: missing program is a failed run, not a skipped one.
#[tokio::test]
async fn missing_program_fails() {
    let temp_dir = TempDir::new().unwrap();
    let runner = AcceptanceRunner::new(
        temp_dir.path(),
        &config(
            Some(&["conveyor-no-such-acceptance-binary"]),
            Duration::from_secs(10),
        ),
    );

    let result = runner.run(&test_context()).await.unwrap();
    assert!(!result.success);
    assert!(!result.timed_out);
}

/// Test: nothing configured means nothing to run.
#[tokio::test]
async fn nothing_to_run_returns_none() {
    let temp_dir = TempDir::new().unwrap();
    let runner = AcceptanceRunner::new(temp_dir.path(), &config(None, Duration::from_secs(10)));

    assert!(!runner.exists());
    assert!(runner.run(&test_context()).await.is_none());
}

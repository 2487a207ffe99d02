// ABOUTME: Acceptance test runner executed against a freshly deployed revision.
// ABOUTME: Runs a configured command or the project's acceptance-test hook script.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::AcceptanceConfig;
use crate::types::{AppName, Environment, Namespace};

/// Hook script used when no command is configured.
pub const HOOK_FILENAME: &str = "acceptance-test";

/// Context passed to the tests via environment variables.
#[derive(Debug, Clone)]
pub struct AcceptanceContext {
    pub app: AppName,
    pub image: String,
    pub namespace: Namespace,
    pub environment: Environment,
    pub url: String,
}

impl AcceptanceContext {
    /// Convert context to environment variables.
    pub fn to_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("CONVEYOR_APP".to_string(), self.app.to_string());
        env.insert("CONVEYOR_IMAGE".to_string(), self.image.clone());
        env.insert("CONVEYOR_NAMESPACE".to_string(), self.namespace.to_string());
        env.insert(
            "CONVEYOR_ENVIRONMENT".to_string(),
            self.environment.to_string(),
        );
        env.insert("CONVEYOR_URL".to_string(), self.url.clone());
        env
    }
}

/// Result of an acceptance test run.
#[derive(Debug)]
pub struct AcceptanceResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
}

impl AcceptanceResult {
    fn failed(stderr: String) -> Self {
        Self {
            success: false,
            exit_code: None,
            timed_out: false,
            stdout: String::new(),
            stderr,
        }
    }

    /// Short reason for a failed run.
    pub fn failure_reason(&self) -> String {
        if self.timed_out {
            return "timed out".to_string();
        }
        let last = self.stderr.lines().rev().find(|l| !l.trim().is_empty());
        match (self.exit_code, last) {
            (Some(code), Some(line)) => format!("exit code {}: {}", code, line.trim()),
            (Some(code), None) => format!("exit code {}", code),
            (None, Some(line)) => line.trim().to_string(),
            (None, None) => "terminated by signal".to_string(),
        }
    }
}

/// Discovers and runs acceptance tests for a project directory.
#[derive(Debug, Clone)]
pub struct AcceptanceRunner {
    project_dir: PathBuf,
    command: Option<Vec<String>>,
    hook_path: PathBuf,
    timeout: Duration,
}

impl AcceptanceRunner {
    pub fn new(project_dir: &Path, config: &AcceptanceConfig) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            command: config.command.clone().filter(|c| !c.is_empty()),
            hook_path: project_dir
                .join(".conveyor")
                .join("hooks")
                .join(HOOK_FILENAME),
            timeout: config.timeout,
        }
    }

    /// Check if there is anything to run.
    pub fn exists(&self) -> bool {
        self.command.is_some() || self.hook_path.is_file()
    }

    fn command(&self) -> Option<Command> {
        match self.command {
            Some(ref argv) => {
                let (program, args) = argv.split_first()?;
                let mut cmd = Command::new(program);
                cmd.args(args);
                Some(cmd)
            }
            None if self.hook_path.is_file() => Some(Command::new(&self.hook_path)),
            None => None,
        }
    }

    /// Run the tests if any exist.
    ///
    /// Returns None if there is nothing to run, or Some(AcceptanceResult) if it was run.
    pub async fn run(&self, context: &AcceptanceContext) -> Option<AcceptanceResult> {
        let mut command = self.command()?;

        tracing::info!("Running acceptance tests against {}", context.url);

        command
            .current_dir(&self.project_dir)
            .envs(context.to_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("Failed to execute acceptance tests: {}", e);
                return Some(AcceptanceResult::failed(e.to_string()));
            }
        };

        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => AcceptanceResult {
                success: output.status.success(),
                exit_code: output.status.code(),
                timed_out: false,
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            },
            Ok(Err(e)) => AcceptanceResult::failed(e.to_string()),
            Err(_elapsed) => AcceptanceResult {
                timed_out: true,
                ..AcceptanceResult::failed(format!(
                    "no result after {:?}",
                    self.timeout
                ))
            },
        };

        if result.success {
            tracing::info!("Acceptance tests passed");
        } else {
            tracing::warn!("Acceptance tests failed: {}", result.failure_reason());
        }

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> AcceptanceContext {
        AcceptanceContext {
            app: AppName::new("shop").unwrap(),
            image: "r.io/acme/shop:abc1234".to_string(),
            namespace: Namespace::new("staging").unwrap(),
            environment: Environment::Staging,
            url: "https://staging.shop.example.com".to_string(),
        }
    }

    fn config(command: Option<&[&str]>) -> AcceptanceConfig {
        AcceptanceConfig {
            enabled: true,
            command: command.map(|c| c.iter().map(|s| s.to_string()).collect()),
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn context_to_env() {
        let env = context().to_env();
        assert_eq!(env.get("CONVEYOR_APP"), Some(&"shop".to_string()));
        assert_eq!(env.get("CONVEYOR_NAMESPACE"), Some(&"staging".to_string()));
        assert_eq!(env.get("CONVEYOR_ENVIRONMENT"), Some(&"staging".to_string()));
        assert_eq!(
            env.get("CONVEYOR_URL"),
            Some(&"https://staging.shop.example.com".to_string())
        );
    }

    #[test]
    fn runner_without_command_checks_hooks_dir() {
        let runner = AcceptanceRunner::new(Path::new("/nonexistent"), &config(None));
        assert!(!runner.exists());
    }

    #[test]
    fn empty_command_counts_as_none() {
        let runner = AcceptanceRunner::new(Path::new("/nonexistent"), &config(Some(&[])));
        assert!(!runner.exists());
    }

    #[test]
    fn failure_reason_uses_last_stderr_line() {
        let result = AcceptanceResult {
            success: false,
            exit_code: Some(2),
            timed_out: false,
            stdout: String::new(),
            stderr: "checking /\nGET /cart returned 500\n\n".to_string(),
        };
        assert_eq!(result.failure_reason(), "exit code 2: GET /cart returned 500");
    }

    #[tokio::test]
    async fn configured_command_sees_url() {
        let dir = tempfile::tempdir().unwrap();
        let runner = AcceptanceRunner::new(
            dir.path(),
            &config(Some(&["sh", "-c", "test \"$CONVEYOR_URL\" = https://staging.shop.example.com"])),
        );

        let result = runner.run(&context()).await.unwrap();
        assert!(result.success, "{}", result.stderr);
    }
}

// ABOUTME: Command-line implementation of the build, registry and cluster contracts.
// ABOUTME: Runs configured programs (docker, trivy, kubectl, ...) with templated arguments.

use async_trait::async_trait;
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::build::{BuildBackend, BuildError, BuildRequest};
use super::cluster::{ApplyError, ApplyRequest, ClusterBackend};
use super::registry::{RegistryBackend, RegistryError, VulnerabilityReport};
use crate::config::{CommandLine, CommandsConfig};
use crate::types::{ApiKey, ImageRef};

/// Environment variable carrying the API key into backend commands.
pub const API_KEY_ENV: &str = "CONVEYOR_API_KEY";

/// Lines of stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Errors starting or talking to a backend process.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CommandError {
    #[snafu(display("failed to start {program}: {source}"))]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[snafu(display("failed to write stdin of {program}: {source}"))]
    Stdin {
        program: String,
        source: std::io::Error,
    },

    #[snafu(display("failed waiting for {program}: {source}"))]
    Wait {
        program: String,
        source: std::io::Error,
    },
}

/// Captured result of a finished backend command.
#[derive(Debug)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self.stderr.trim().lines().collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        lines[start..].join("\n")
    }
}

/// Values substituted into argument templates.
///
/// `{name}` inside an argument is replaced by the value; an argument that is
/// exactly `{build_args}` or `{labels}` expands to repeated
/// `--build-arg K=V` / `--label K=V` pairs.
#[derive(Debug, Default)]
pub struct Placeholders {
    values: BTreeMap<&'static str, String>,
    build_args: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
}

impl Placeholders {
    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    fn expand_arg(&self, arg: &str, out: &mut Vec<String>) {
        match arg {
            "{build_args}" => {
                for (k, v) in &self.build_args {
                    out.push("--build-arg".to_string());
                    out.push(format!("{}={}", k, v));
                }
            }
            "{labels}" => {
                for (k, v) in &self.labels {
                    out.push("--label".to_string());
                    out.push(format!("{}={}", k, v));
                }
            }
            _ => {
                let mut expanded = arg.to_string();
                for (key, value) in &self.values {
                    expanded = expanded.replace(&format!("{{{}}}", key), value);
                }
                out.push(expanded);
            }
        }
    }

    /// Program and arguments with all placeholders filled in.
    pub fn expand(&self, line: &CommandLine) -> (String, Vec<String>) {
        let mut program = Vec::with_capacity(1);
        self.expand_arg(line.program(), &mut program);

        let mut args = Vec::with_capacity(line.args().len());
        for arg in line.args() {
            self.expand_arg(arg, &mut args);
        }

        (program.concat(), args)
    }

    /// The same values as `CONVEYOR_*` environment variables.
    fn env(&self) -> impl Iterator<Item = (String, &String)> {
        self.values
            .iter()
            .map(|(k, v)| (format!("CONVEYOR_{}", k.to_ascii_uppercase()), v))
    }
}

/// Runs the commands from the `commands:` section of the config.
pub struct CommandBackend {
    commands: CommandsConfig,
    api_key: Option<ApiKey>,
    working_dir: PathBuf,
}

impl std::fmt::Debug for CommandBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBackend")
            .field("working_dir", &self.working_dir)
            .field("api_key", &self.api_key)
            .finish()
    }
}

impl CommandBackend {
    pub fn new(commands: CommandsConfig, api_key: Option<ApiKey>, working_dir: &Path) -> Self {
        Self {
            commands,
            api_key,
            working_dir: working_dir.to_path_buf(),
        }
    }

    /// Run one command line to completion, optionally feeding `stdin`.
    pub async fn run(
        &self,
        line: &CommandLine,
        vars: &Placeholders,
        stdin: Option<&str>,
    ) -> Result<CommandOutput, CommandError> {
        let (program, args) = vars.expand(line);

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .current_dir(&self.working_dir)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in vars.env() {
            cmd.env(key, value);
        }
        if let Some(ref key) = self.api_key {
            cmd.env(API_KEY_ENV, key.expose());
        }

        tracing::debug!("Running {} {}", program, args.join(" "));

        let mut child = cmd.spawn().context(SpawnSnafu {
            program: program.clone(),
        })?;

        // Feed stdin concurrently so a chatty child cannot deadlock on a full stdout pipe
        let writer = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                let input = input.to_string();
                Some(tokio::spawn(async move {
                    pipe.write_all(input.as_bytes()).await?;
                    pipe.shutdown().await
                }))
            }
            _ => None,
        };

        let output = child.wait_with_output().await.context(WaitSnafu {
            program: program.clone(),
        })?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(result) => result.context(StdinSnafu {
                    program: program.clone(),
                })?,
                Err(join) => tracing::warn!("stdin writer for {} panicked: {}", program, join),
            }
        }

        Ok(CommandOutput {
            code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn image_vars(image: &ImageRef) -> Placeholders {
        Placeholders::default()
            .with("image", image.to_string())
            .with("repository", image.repository())
            .with("tag", image.tag().unwrap_or_default())
    }
}

/// Heuristic for failures worth retrying: network and registry hiccups.
fn looks_transient(stderr: &str) -> bool {
    const MARKERS: &[&str] = &[
        "timeout",
        "timed out",
        "connection reset",
        "connection refused",
        "temporarily unavailable",
        "tls handshake",
        "unexpected eof",
        "too many requests",
        "502 bad gateway",
        "503 service unavailable",
        "504 gateway",
    ];
    let lower = stderr.to_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}

/// Whether a delete failed only because the image is already gone.
fn looks_absent(stderr: &str) -> bool {
    const MARKERS: &[&str] = &[
        "no such image",
        "not found",
        "manifest_unknown",
        "does not exist",
    ];
    let lower = stderr.to_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}

/// Find `sha256:<hex>` after a `digest:` marker, as printed by `docker push`.
fn parse_digest(stdout: &str) -> Option<String> {
    stdout.lines().rev().find_map(|line| {
        let (_, rest) = line.split_once("digest: ")?;
        let digest = rest.split_whitespace().next()?;
        let hex = digest.strip_prefix("sha256:")?;
        (!hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit())).then(|| digest.to_string())
    })
}

/// Last stdout line that looks like a URL.
fn parse_endpoint(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.starts_with("http://") || l.starts_with("https://"))
        .map(str::to_string)
}

#[async_trait]
impl BuildBackend for CommandBackend {
    async fn build(&self, request: &BuildRequest) -> Result<(), BuildError> {
        let mut vars = Self::image_vars(&request.image)
            .with("context", request.context.display().to_string())
            .with("dockerfile", request.dockerfile.display().to_string());
        vars.build_args = request.args.clone();
        vars.labels = request.labels.clone();

        let output = self
            .run(&self.commands.build, &vars, None)
            .await
            .map_err(|e| BuildError::Unavailable(e.to_string()))?;

        if !output.success {
            return Err(BuildError::Failed {
                code: output.code,
                stderr: output.stderr_tail(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl RegistryBackend for CommandBackend {
    async fn push(&self, image: &ImageRef) -> Result<Option<String>, RegistryError> {
        let output = self
            .run(&self.commands.push, &Self::image_vars(image), None)
            .await
            .map_err(|e| RegistryError::Rejected(e.to_string()))?;

        if !output.success {
            let stderr = output.stderr_tail();
            return Err(if looks_transient(&stderr) {
                RegistryError::Transient(stderr)
            } else {
                RegistryError::Rejected(stderr)
            });
        }

        Ok(parse_digest(&output.stdout))
    }

    async fn scan(&self, image: &ImageRef) -> Result<VulnerabilityReport, RegistryError> {
        let Some(ref scan) = self.commands.scan else {
            return Err(RegistryError::Rejected(
                "no scan command configured".to_string(),
            ));
        };

        let output = self
            .run(scan, &Self::image_vars(image), None)
            .await
            .map_err(|e| RegistryError::Rejected(e.to_string()))?;

        if !output.success {
            let stderr = output.stderr_tail();
            return Err(if looks_transient(&stderr) {
                RegistryError::Transient(stderr)
            } else {
                RegistryError::Rejected(stderr)
            });
        }

        VulnerabilityReport::from_trivy_json(&output.stdout)
    }

    async fn delete(&self, image: &ImageRef) -> Result<(), RegistryError> {
        let output = self
            .run(&self.commands.delete, &Self::image_vars(image), None)
            .await
            .map_err(|e| RegistryError::Rejected(e.to_string()))?;

        if output.success {
            return Ok(());
        }

        let stderr = output.stderr_tail();
        if looks_absent(&stderr) {
            Err(RegistryError::NotFound(image.to_string()))
        } else if looks_transient(&stderr) {
            Err(RegistryError::Transient(stderr))
        } else {
            Err(RegistryError::Rejected(stderr))
        }
    }

    fn supports_scan(&self) -> bool {
        self.commands.scan.is_some()
    }
}

#[async_trait]
impl ClusterBackend for CommandBackend {
    async fn apply(&self, request: &ApplyRequest) -> Result<String, ApplyError> {
        let vars = Placeholders::default()
            .with("app", request.app.as_str())
            .with("namespace", request.namespace.as_str());

        let output = self
            .run(&self.commands.apply, &vars, Some(&request.manifest))
            .await
            .map_err(|e| ApplyError::Unavailable(e.to_string()))?;

        if !output.success {
            let stderr = output.stderr_tail();
            return Err(
                if looks_transient(&stderr) || stderr.contains("Unable to connect to the server") {
                    ApplyError::Unavailable(stderr)
                } else {
                    ApplyError::Rejected(stderr)
                },
            );
        }

        Ok(parse_endpoint(&output.stdout).unwrap_or_else(|| request.service_url.clone()))
    }
}

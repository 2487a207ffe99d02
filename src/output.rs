// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes.

use serde::Serialize;
use std::time::Instant;

use crate::diagnostics::Diagnostics;
use crate::pipeline::{DeploymentRevision, RunSummary};

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => {
                // Print only the essential result
                println!("{message}");
            }
            OutputMode::Json => self.emit_stdout("success", message),
        }
    }

    /// Print a non-fatal warning.
    pub fn warning(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Warning: {message}"),
            OutputMode::Json => self.emit_stderr("warning", message),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => self.emit_stderr("error", message),
        }
    }

    /// Print every warning collected during a run.
    pub fn diagnostics(&self, diagnostics: &Diagnostics) {
        for warning in diagnostics.warnings() {
            self.warning(&warning.message);
        }
    }

    /// Print the final run summary.
    pub fn summary(&self, summary: &RunSummary) {
        match self.mode {
            OutputMode::Normal => {
                println!();
                println!("Run:          {}", summary.run_id);
                println!("Trigger:      {} {}", summary.trigger, summary.git_ref);
                println!("Environment:  {}", summary.environment);
                println!("Namespace:    {}", summary.namespace);
                if let Some(ref image) = summary.image {
                    println!("Image:        {}", image);
                }
                if let Some(ref url) = summary.url {
                    println!("URL:          {}", url);
                }
                println!("Health check: {}", summary.health.as_str());
                if let Some(ref revision) = summary.revision {
                    println!("Revision:     {}", revision);
                }
                if let Some(ref target) = summary.rolled_back_to {
                    println!("Restored:     {}", target);
                }
                println!("Outcome:      {}", summary.outcome);
                if let Some(ref error) = summary.error {
                    eprintln!("Error: {error}");
                }
                if let Some(ref error) = summary.rollback_error {
                    eprintln!("Rollback error: {error}");
                }
            }
            OutputMode::Quiet => {
                println!(
                    "{} {}",
                    summary.outcome,
                    summary.image.as_deref().unwrap_or("-")
                );
                if let Some(ref error) = summary.error {
                    eprintln!("Error: {error}");
                }
            }
            OutputMode::Json => {
                if let Ok(json) = serde_json::to_string(&SummaryEvent {
                    event: "summary",
                    summary,
                    duration_secs: self.duration(),
                }) {
                    println!("{json}");
                }
            }
        }
    }

    /// Print a namespace's revision history, oldest first.
    pub fn history(&self, revisions: &[DeploymentRevision]) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                for r in revisions {
                    let restores = r
                        .rollback_of
                        .as_ref()
                        .map(|id| format!(" (restores {})", id))
                        .unwrap_or_default();
                    println!(
                        "{:<6} {:<8} {}  {}{}",
                        r.id.as_str(),
                        r.status.to_string(),
                        r.created_at.format("%Y-%m-%d %H:%M:%S"),
                        r.artifact.deploy_reference(),
                        restores
                    );
                }
            }
            OutputMode::Json => {
                for r in revisions {
                    if let Ok(json) = serde_json::to_string(r) {
                        println!("{json}");
                    }
                }
            }
        }
    }

    fn emit_stdout(&self, event: &str, message: &str) {
        if let Ok(json) = serde_json::to_string(&JsonEvent {
            event,
            message,
            duration_secs: self.duration(),
        }) {
            println!("{json}");
        }
    }

    fn emit_stderr(&self, event: &str, message: &str) {
        if let Ok(json) = serde_json::to_string(&JsonEvent {
            event,
            message,
            duration_secs: self.duration(),
        }) {
            eprintln!("{json}");
        }
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

#[derive(Serialize)]
struct SummaryEvent<'a> {
    event: &'a str,
    #[serde(flatten)]
    summary: &'a RunSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

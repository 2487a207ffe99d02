// ABOUTME: Status Reporter: pending at run start, exactly one terminal status at run end.
// ABOUTME: Also renders the run summary for CI step summaries and step outputs.

use serde::Serialize;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{CommitState, StatusApi, StatusUpdate};
use crate::diagnostics::{Diagnostics, Warning};
use crate::trigger::{Trigger, TriggerKind};
use crate::types::{Environment, Namespace, RunId};

use super::state::RunOutcome;

/// Health check result as reported in outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthResult {
    Passed,
    Failed,
    NotRun,
}

impl HealthResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthResult::Passed => "passed",
            HealthResult::Failed => "failed",
            HealthResult::NotRun => "not_run",
        }
    }
}

/// Everything known about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub trigger: TriggerKind,
    pub git_ref: String,
    pub sha: String,
    pub environment: Environment,
    pub namespace: Namespace,
    pub image: Option<String>,
    pub digest: Option<String>,
    pub url: Option<String>,
    pub health: HealthResult,
    pub outcome: RunOutcome,
    pub revision: Option<String>,
    pub rolled_back_to: Option<String>,
    pub error: Option<String>,
    pub rollback_error: Option<String>,
}

impl RunSummary {
    /// One-line description for the commit status.
    pub fn description(&self) -> String {
        match self.outcome {
            RunOutcome::Success => format!(
                "Deployed {} to {}",
                self.image.as_deref().unwrap_or("image"),
                self.namespace
            ),
            RunOutcome::RolledBack => format!(
                "Rolled back {}: {}",
                self.namespace,
                self.error.as_deref().unwrap_or("deployment failed")
            ),
            RunOutcome::Failed => format!(
                "Failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    /// `key=value` pairs for CI step outputs.
    pub fn outputs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("image", self.image.clone().unwrap_or_default()),
            ("deployment-status", self.outcome.as_str().to_string()),
            ("app-url", self.url.clone().unwrap_or_default()),
            ("health-check-result", self.health.as_str().to_string()),
        ]
    }

    /// Markdown table for the CI step summary.
    pub fn to_markdown(&self) -> String {
        let icon = match self.outcome {
            RunOutcome::Success => "✅",
            RunOutcome::RolledBack => "↩️",
            RunOutcome::Failed => "❌",
        };

        let mut md = String::new();
        let _ = writeln!(md, "## {} Deployment {}", icon, self.outcome);
        let _ = writeln!(md);
        let _ = writeln!(md, "| | |");
        let _ = writeln!(md, "|---|---|");
        let _ = writeln!(md, "| Trigger | {} `{}` |", self.trigger, self.git_ref);
        let _ = writeln!(md, "| Commit | `{}` |", self.sha);
        let _ = writeln!(md, "| Environment | {} |", self.environment);
        let _ = writeln!(md, "| Namespace | {} |", self.namespace);
        if let Some(ref image) = self.image {
            let _ = writeln!(md, "| Image | `{}` |", image);
        }
        if let Some(ref url) = self.url {
            let _ = writeln!(md, "| URL | {} |", url);
        }
        let _ = writeln!(md, "| Health check | {} |", self.health.as_str());
        if let Some(ref revision) = self.revision {
            let _ = writeln!(md, "| Revision | {} |", revision);
        }
        if let Some(ref target) = self.rolled_back_to {
            let _ = writeln!(md, "| Restored revision | {} |", target);
        }
        if let Some(ref error) = self.error {
            let _ = writeln!(md, "\n**Error:** {}", error);
        }
        if let Some(ref error) = self.rollback_error {
            let _ = writeln!(md, "\n**Rollback error:** {}", error);
        }
        md
    }
}

/// Files the summary is appended to, usually `GITHUB_STEP_SUMMARY` and `GITHUB_OUTPUT`.
#[derive(Debug, Clone, Default)]
pub struct SummarySinks {
    pub step_summary: Option<PathBuf>,
    pub outputs: Option<PathBuf>,
}

fn append(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(contents.as_bytes())
}

/// Starts status reporting for a run.
pub struct StatusReporter {
    api: Arc<dyn StatusApi>,
    sinks: SummarySinks,
}

impl StatusReporter {
    pub fn new(api: Arc<dyn StatusApi>, sinks: SummarySinks) -> Self {
        Self { api, sinks }
    }

    /// Post `pending` and hand back the handle that posts the terminal state.
    pub async fn begin(
        &self,
        run: &RunId,
        trigger: &Trigger,
        namespace: &Namespace,
        diagnostics: &mut Diagnostics,
    ) -> StatusHandle {
        let handle = StatusHandle {
            api: Arc::clone(&self.api),
            sinks: self.sinks.clone(),
            run: run.clone(),
            repository: trigger.repository.clone(),
            sha: trigger.sha.clone(),
        };

        let description = format!("Deploying to {}", namespace);
        handle
            .post(CommitState::Pending, description, None, diagnostics)
            .await;
        handle
    }
}

/// Proof that a run posted `pending`. Consumed by [`StatusHandle::finish`],
/// so a run reports its terminal state exactly once.
#[must_use = "a run must report its terminal status"]
pub struct StatusHandle {
    api: Arc<dyn StatusApi>,
    sinks: SummarySinks,
    run: RunId,
    repository: String,
    sha: String,
}

impl std::fmt::Debug for StatusHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusHandle")
            .field("run", &self.run)
            .field("sha", &self.sha)
            .finish_non_exhaustive()
    }
}

impl StatusHandle {
    async fn post(
        &self,
        state: CommitState,
        description: String,
        target_url: Option<String>,
        diagnostics: &mut Diagnostics,
    ) {
        let update = StatusUpdate {
            repository: self.repository.clone(),
            sha: self.sha.clone(),
            state,
            description,
            target_url,
        };
        if let Err(e) = self.api.set_status(&self.run, &update).await {
            diagnostics.warn(Warning::status_post(format!(
                "failed to post {} status: {}",
                state, e
            )));
        }
    }

    /// Post the terminal state and write the summary sinks.
    pub async fn finish(self, summary: &RunSummary, diagnostics: &mut Diagnostics) {
        let state = if summary.outcome.is_success() {
            CommitState::Success
        } else {
            CommitState::Failure
        };
        self.post(state, summary.description(), summary.url.clone(), diagnostics)
            .await;

        if let Some(ref path) = self.sinks.step_summary
            && let Err(e) = append(path, &summary.to_markdown())
        {
            diagnostics.warn(Warning::summary_write(format!(
                "failed to write step summary {}: {}",
                path.display(),
                e
            )));
        }

        if let Some(ref path) = self.sinks.outputs {
            let lines: String = summary
                .outputs()
                .into_iter()
                .map(|(k, v)| format!("{}={}\n", k, v))
                .collect();
            if let Err(e) = append(path, &lines) {
                diagnostics.warn(Warning::summary_write(format!(
                    "failed to write step outputs {}: {}",
                    path.display(),
                    e
                )));
            }
        }
    }
}

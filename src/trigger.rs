// ABOUTME: CI trigger description: event type, ref, SHA and manual inputs.
// ABOUTME: Built from CLI flags with GitHub Actions environment variables as fallback.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::types::{AppName, Environment, ImageTag, Namespace};

/// What started the pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    PullRequest,
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Push => "push",
            TriggerKind::PullRequest => "pull_request",
            TriggerKind::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = TriggerError;

    /// Accepts our own names and the GitHub Actions event names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "push" => Ok(TriggerKind::Push),
            "pull_request" | "pull_request_target" | "pr" => Ok(TriggerKind::PullRequest),
            "manual" | "workflow_dispatch" | "workflow_call" | "repository_dispatch" => {
                Ok(TriggerKind::Manual)
            }
            other => Err(TriggerError::UnknownEvent(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("unknown trigger event: {0}")]
    UnknownEvent(String),

    #[error("missing {0} (pass it as a flag or set {1})")]
    Missing(&'static str, &'static str),

    #[error("pull request runs need a PR number (from --pr or a refs/pull/<n>/merge ref)")]
    MissingPullRequestNumber,
}

/// Optional overrides supplied with a manual (or reusable-workflow) run.
#[derive(Debug, Clone, Default)]
pub struct ManualInputs {
    pub environment: Option<Environment>,
    pub image_tag: Option<ImageTag>,
    pub app_name: Option<AppName>,
    pub namespace: Option<Namespace>,
    pub run_acceptance_tests: Option<bool>,
    pub auto_rollback: Option<bool>,
}

/// One CI event that starts a pipeline run.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub git_ref: String,
    pub sha: String,
    /// `owner/repo`.
    pub repository: String,
    pub pull_request: Option<u64>,
    pub inputs: ManualInputs,
}

/// Raw trigger fields before validation; any field may come from the CLI.
#[derive(Debug, Clone, Default)]
pub struct TriggerArgs {
    pub event: Option<String>,
    pub git_ref: Option<String>,
    pub sha: Option<String>,
    pub repository: Option<String>,
    pub pull_request: Option<u64>,
}

impl Trigger {
    /// Build a trigger from explicit arguments, falling back to the
    /// `GITHUB_EVENT_NAME`, `GITHUB_REF`, `GITHUB_SHA` and `GITHUB_REPOSITORY`
    /// environment variables for anything not given.
    pub fn resolve(args: TriggerArgs, inputs: ManualInputs) -> Result<Self, TriggerError> {
        let event = args
            .event
            .or_else(|| std::env::var("GITHUB_EVENT_NAME").ok())
            .unwrap_or_else(|| "manual".to_string());
        let kind: TriggerKind = event.parse()?;

        let git_ref = args
            .git_ref
            .or_else(|| std::env::var("GITHUB_REF").ok())
            .ok_or(TriggerError::Missing("git ref", "GITHUB_REF"))?;
        let sha = args
            .sha
            .or_else(|| std::env::var("GITHUB_SHA").ok())
            .ok_or(TriggerError::Missing("commit SHA", "GITHUB_SHA"))?;
        let repository = args
            .repository
            .or_else(|| std::env::var("GITHUB_REPOSITORY").ok())
            .ok_or(TriggerError::Missing("repository", "GITHUB_REPOSITORY"))?;

        let pull_request = args.pull_request.or_else(|| pull_request_number(&git_ref));
        if kind == TriggerKind::PullRequest && pull_request.is_none() {
            return Err(TriggerError::MissingPullRequestNumber);
        }

        Ok(Self {
            kind,
            git_ref,
            sha: sha.trim().to_string(),
            repository,
            pull_request,
            inputs,
        })
    }

    pub fn is_pull_request(&self) -> bool {
        self.kind == TriggerKind::PullRequest
    }

    /// Environment for this run: the explicit input, else derived from the ref.
    pub fn environment(&self) -> Environment {
        self.inputs
            .environment
            .unwrap_or_else(|| Environment::for_ref(&self.git_ref))
    }

    /// Namespace for this run: the explicit input overrides all derivation.
    pub fn namespace(&self) -> Namespace {
        self.inputs
            .namespace
            .clone()
            .unwrap_or_else(|| self.environment().default_namespace())
    }
}

/// Extract the PR number from a `refs/pull/<n>/merge` (or `/head`) ref.
pub fn pull_request_number(git_ref: &str) -> Option<u64> {
    let rest = git_ref.strip_prefix("refs/pull/")?;
    let (number, _) = rest.split_once('/')?;
    number.parse().ok()
}

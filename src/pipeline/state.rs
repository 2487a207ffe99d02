// ABOUTME: Pipeline run phases and type state markers.
// ABOUTME: Runtime phase checks plus zero-sized-ish markers that enforce stage order at compile time.

use serde::Serialize;
use std::fmt;

use super::builder::BuildArtifact;
use super::revision::DeploymentRevision;
use crate::backend::VulnerabilityReport;

/// Where a run is, as reported in summaries and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Pending,
    Building,
    Pushing,
    Scanning,
    Deploying,
    Testing,
    RollingBack,
    Success,
    RolledBack,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Pending => "pending",
            RunPhase::Building => "building",
            RunPhase::Pushing => "pushing",
            RunPhase::Scanning => "scanning",
            RunPhase::Deploying => "deploying",
            RunPhase::Testing => "testing",
            RunPhase::RollingBack => "rolling_back",
            RunPhase::Success => "success",
            RunPhase::RolledBack => "rolled_back",
            RunPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Success | RunPhase::RolledBack | RunPhase::Failed
        )
    }

    /// Legal phase changes.
    ///
    /// Every non-terminal phase may fail; terminal phases go nowhere.
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }

        matches!(
            (self, next),
            (Pending, Building)
                | (Building, Pushing)
                | (Pushing, Scanning)
                | (Scanning, Deploying)
                | (Deploying, Testing)
                | (Deploying, Success)
                | (Deploying, RollingBack)
                | (Testing, Success)
                | (Testing, RollingBack)
                | (RollingBack, RolledBack)
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    RolledBack,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::RolledBack => "rolled_back",
            RunOutcome::Failed => "failed",
        }
    }

    pub fn phase(&self) -> RunPhase {
        match self {
            RunOutcome::Success => RunPhase::Success,
            RunOutcome::RolledBack => RunPhase::RolledBack,
            RunOutcome::Failed => RunPhase::Failed,
        }
    }

    /// Only `success` means the new version shipped.
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Initial state: names resolved, nothing built yet.
/// Available actions: `build()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Started;

/// Image built locally.
/// Available actions: `push()`
#[derive(Debug, Clone)]
pub struct Built {
    pub(crate) artifact: BuildArtifact,
}

/// Image pushed; the artifact now carries its digest.
/// Available actions: `scan()`
#[derive(Debug, Clone)]
pub struct Pushed {
    pub(crate) artifact: BuildArtifact,
}

/// Image passed the vulnerability policy (or the scan was skipped).
/// Available actions: `deploy()`
#[derive(Debug, Clone)]
pub struct Scanned {
    pub(crate) artifact: BuildArtifact,
    pub(crate) report: Option<VulnerabilityReport>,
}

/// New revision applied and healthy.
/// Available actions: `accept()`, `succeed()`
#[derive(Debug, Clone)]
pub struct Deployed {
    pub(crate) artifact: BuildArtifact,
    pub(crate) revision: DeploymentRevision,
}

/// Acceptance tests passed.
/// Available actions: `succeed()`
#[derive(Debug, Clone)]
pub struct Verified {
    pub(crate) artifact: BuildArtifact,
    pub(crate) revision: DeploymentRevision,
}

/// Read access to whatever a stage has produced so far.
pub trait Stage {
    fn artifact(&self) -> Option<&BuildArtifact> {
        None
    }
}

impl Stage for Started {}

impl Stage for Built {
    fn artifact(&self) -> Option<&BuildArtifact> {
        Some(&self.artifact)
    }
}

impl Stage for Pushed {
    fn artifact(&self) -> Option<&BuildArtifact> {
        Some(&self.artifact)
    }
}

impl Stage for Scanned {
    fn artifact(&self) -> Option<&BuildArtifact> {
        Some(&self.artifact)
    }
}

impl Stage for Deployed {
    fn artifact(&self) -> Option<&BuildArtifact> {
        Some(&self.artifact)
    }
}

impl Stage for Verified {
    fn artifact(&self) -> Option<&BuildArtifact> {
        Some(&self.artifact)
    }
}

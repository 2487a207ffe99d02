// ABOUTME: Error types for pipeline stages.
// ABOUTME: Covers build, registry, policy, deploy, rollback, locking and store failures.

use chrono::{DateTime, Utc};

use crate::backend::{BuildError, RegistryError, Severity};
use crate::types::Namespace;

use super::state::RunPhase;

/// Errors that can occur during a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Image build failed. Never retried.
    #[error("image build failed: {0}")]
    Build(#[from] BuildError),

    /// Push failed after retries.
    #[error("failed to push {image}: {source}")]
    Push {
        image: String,
        #[source]
        source: RegistryError,
    },

    /// Scan could not be run or its report could not be read.
    #[error("failed to scan {image}: {source}")]
    Scan {
        image: String,
        #[source]
        source: RegistryError,
    },

    /// Findings at or above the severity threshold.
    #[error("{image} has {blocking} finding(s) at or above {threshold} (worst: {worst})")]
    Security {
        image: String,
        blocking: usize,
        threshold: Severity,
        worst: Severity,
    },

    /// Deployment spec or naming inputs are invalid; nothing was applied.
    #[error("invalid deployment spec: {}", .0.join("; "))]
    InvalidSpec(Vec<String>),

    /// The cluster rejected or could not receive the desired state.
    #[error("deploy failed: {0}")]
    Deploy(String),

    /// Health endpoint did not answer successfully in time.
    #[error("health check on {url} timed out after {timeout_secs} seconds")]
    HealthCheckTimeout { url: String, timeout_secs: u64 },

    /// Acceptance tests ran and failed.
    #[error("acceptance tests failed: {0}")]
    AcceptanceFailed(String),

    /// No healthy revision to roll back to.
    #[error("no healthy revision to roll back to in namespace {0}")]
    NoHealthyRevision(Namespace),

    /// Rollback reapply failed.
    #[error("rollback failed: {0}")]
    Rollback(String),

    /// Pull request image cleanup failed.
    #[error("cleanup failed: {0}")]
    Cleanup(String),

    /// Another run holds the namespace.
    #[error("namespace {namespace} is locked by {holder} (pid {pid}) since {started_at}")]
    LockHeld {
        namespace: Namespace,
        holder: String,
        pid: u32,
        started_at: DateTime<Utc>,
    },

    /// Lock file could not be created, read or removed.
    #[error("lock error: {0}")]
    Lock(String),

    /// Revision store I/O or corruption.
    #[error("revision store error: {0}")]
    Store(#[from] super::revision::StoreError),

    /// Illegal run phase change; indicates a bug.
    #[error("invalid run transition from {from} to {to}")]
    InvalidTransition { from: RunPhase, to: RunPhase },
}

impl PipelineError {
    pub fn lock_held(
        namespace: Namespace,
        holder: String,
        pid: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        PipelineError::LockHeld {
            namespace,
            holder,
            pid,
            started_at,
        }
    }

    pub fn lock_error(message: impl Into<String>) -> Self {
        PipelineError::Lock(message.into())
    }

    /// Get the error kind for programmatic handling.
    pub fn kind(&self) -> PipelineErrorKind {
        match self {
            PipelineError::Build(_) => PipelineErrorKind::Build,
            PipelineError::Push { .. } => PipelineErrorKind::Push,
            PipelineError::Scan { .. } => PipelineErrorKind::Scan,
            PipelineError::Security { .. } => PipelineErrorKind::Security,
            PipelineError::InvalidSpec(_) => PipelineErrorKind::InvalidSpec,
            PipelineError::Deploy(_) => PipelineErrorKind::Deploy,
            PipelineError::HealthCheckTimeout { .. } => PipelineErrorKind::HealthCheckTimeout,
            PipelineError::AcceptanceFailed(_) => PipelineErrorKind::AcceptanceFailed,
            PipelineError::NoHealthyRevision(_) | PipelineError::Rollback(_) => {
                PipelineErrorKind::Rollback
            }
            PipelineError::Cleanup(_) => PipelineErrorKind::Cleanup,
            PipelineError::LockHeld { .. } => PipelineErrorKind::LockHeld,
            PipelineError::Lock(_) | PipelineError::Store(_) => PipelineErrorKind::Store,
            PipelineError::InvalidTransition { .. } => PipelineErrorKind::Internal,
        }
    }

    /// Whether this error should send the run down the rollback path.
    pub fn triggers_rollback(&self) -> bool {
        self.kind().triggers_rollback()
    }
}

/// Error kind for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    Build,
    Push,
    Scan,
    Security,
    InvalidSpec,
    Deploy,
    HealthCheckTimeout,
    AcceptanceFailed,
    Rollback,
    Cleanup,
    LockHeld,
    Store,
    Internal,
}

impl PipelineErrorKind {
    /// Deploy-time failures that a rollback can repair.
    pub fn triggers_rollback(self) -> bool {
        matches!(
            self,
            PipelineErrorKind::Deploy
                | PipelineErrorKind::HealthCheckTimeout
                | PipelineErrorKind::AcceptanceFailed
        )
    }
}

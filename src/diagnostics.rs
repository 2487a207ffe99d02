// ABOUTME: Diagnostics accumulator for non-fatal warnings during a pipeline run.
// ABOUTME: Collects warnings that shouldn't fail a run but should be shown to users.

/// Collects non-fatal warnings during pipeline operations.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{}", warning.message);
        self.warnings.push(warning);
    }

    /// Get all collected warnings.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Check if any warnings were collected.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Warnings of one kind.
    pub fn of_kind(&self, kind: WarningKind) -> impl Iterator<Item = &Warning> {
        self.warnings.iter().filter(move |w| w.kind == kind)
    }
}

/// A non-fatal warning collected during a run.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a lock release warning.
    pub fn lock_release(message: impl Into<String>) -> Self {
        Self::new(WarningKind::LockRelease, message)
    }

    /// Create a PR image cleanup warning.
    pub fn cleanup(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Cleanup, message)
    }

    /// Create a status API warning.
    pub fn status_post(message: impl Into<String>) -> Self {
        Self::new(WarningKind::StatusPost, message)
    }

    /// Create a skipped-scan warning.
    pub fn scan_skipped(message: impl Into<String>) -> Self {
        Self::new(WarningKind::ScanSkipped, message)
    }

    /// Create a skipped-acceptance-test warning.
    pub fn acceptance_skipped(message: impl Into<String>) -> Self {
        Self::new(WarningKind::AcceptanceSkipped, message)
    }

    /// Create a summary file warning.
    pub fn summary_write(message: impl Into<String>) -> Self {
        Self::new(WarningKind::SummaryWrite, message)
    }
}

/// Categories of warnings that can occur during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Failed to release the namespace lock (lock file may remain).
    LockRelease,
    /// Failed to delete a pull request image.
    Cleanup,
    /// Failed to post a commit status.
    StatusPost,
    /// Vulnerability scan was not run.
    ScanSkipped,
    /// Acceptance tests were requested but none exist.
    AcceptanceSkipped,
    /// Failed to write the CI step summary or outputs.
    SummaryWrite,
}

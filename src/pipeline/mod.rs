// ABOUTME: Deployment pipeline: build, push, scan, deploy, verify, roll back, report.
// ABOUTME: Exports the components and the type-state run machine that drives them.

mod builder;
mod cleanup;
mod controller;
mod error;
mod lock;
mod manifest;
mod registry;
mod retry;
mod revision;
mod rollback;
mod run;
mod spec;
mod state;
mod status;

pub use builder::{
    BuildArtifact, ImageBuilder, LABEL_REVISION, LABEL_SOURCE, derive_app_name, derive_tag,
    image_reference,
};
pub use cleanup::{CleanupScope, Scoped};
pub use controller::{DeployOutcome, DeploymentController, wait_healthy};
pub use error::{PipelineError, PipelineErrorKind};
pub use lock::{LockInfo, NamespaceLock, NamespaceLocks};
pub use manifest::render as render_manifest;
pub use registry::{RegistryClient, ScanSkipped};
pub use retry::with_backoff;
pub use revision::{
    Completion, DeploymentRevision, FileRevisionStore, MemoryRevisionStore, NewRevision,
    RevisionStatus, RevisionStore, StoreError,
};
pub use rollback::{Recovery, RollbackManager};
pub use run::{
    Backends, Finished, Pipeline, PipelineOptions, Run, RunContext, RunReport, TransitionResult,
};
pub use spec::DeploymentSpec;
pub use state::{Built, Deployed, Pushed, RunOutcome, RunPhase, Scanned, Stage, Started, Verified};
pub use status::{HealthResult, RunSummary, StatusHandle, StatusReporter, SummarySinks};

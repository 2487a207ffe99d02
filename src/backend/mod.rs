// ABOUTME: Contracts for the external collaborators of a pipeline run.
// ABOUTME: Build, registry, cluster, health probe and status API, plus default implementations.

mod build;
mod cluster;
mod command;
mod http;
mod registry;
mod status;

pub use build::{BuildBackend, BuildError, BuildRequest};
pub use cluster::{ApplyError, ApplyRequest, ClusterBackend, HealthProbe, ProbeError};
pub use command::{API_KEY_ENV, CommandBackend, CommandError, CommandOutput, Placeholders};
pub use http::{GithubStatusApi, HttpHealthProbe, LogStatusApi};
pub use registry::{Finding, RegistryBackend, RegistryError, Severity, VulnerabilityReport};
pub use status::{CommitState, StatusApi, StatusError, StatusUpdate};

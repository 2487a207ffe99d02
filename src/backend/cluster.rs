// ABOUTME: Cluster backend and health probe contracts.
// ABOUTME: Apply a rendered manifest, then probe the resulting endpoint.

use async_trait::async_trait;

use crate::types::{AppName, Namespace};

/// A rendered desired state for one application in one namespace.
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub app: AppName,
    pub namespace: Namespace,
    /// Multi-document YAML manifest.
    pub manifest: String,
    /// In-cluster URL of the service, used when the backend reports none.
    pub service_url: String,
}

/// Applies desired state to a cluster.
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// Apply the manifest and return the endpoint the app is reachable at.
    async fn apply(&self, request: &ApplyRequest) -> Result<String, ApplyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("cluster rejected the manifest: {0}")]
    Rejected(String),

    #[error("could not reach cluster: {0}")]
    Unavailable(String),
}

/// Checks whether a deployed endpoint is healthy.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// One probe. `Ok(false)` means the endpoint answered but is not healthy.
    async fn check(&self, url: &str) -> Result<bool, ProbeError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("health probe request failed: {0}")]
    Request(String),
}

// ABOUTME: Container build backend contract.
// ABOUTME: Builds an image from a source checkout; failures are deterministic.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::types::ImageRef;

/// Everything a build backend needs to produce one image.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub image: ImageRef,
    pub context: PathBuf,
    pub dockerfile: PathBuf,
    pub args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

/// Builds container images.
#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// Build and tag `request.image` locally.
    async fn build(&self, request: &BuildRequest) -> Result<(), BuildError>;
}

/// Errors from build backends.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("build exited with status {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("could not run build: {0}")]
    Unavailable(String),
}

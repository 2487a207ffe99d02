// ABOUTME: Registry Client: push, scan and idempotent delete with retries.
// ABOUTME: Applies the vulnerability policy to scan reports.

use std::sync::Arc;

use crate::backend::{RegistryBackend, RegistryError, VulnerabilityReport};
use crate::config::{RetryConfig, ScanConfig};
use crate::types::ImageRef;

use super::PipelineError;
use super::builder::BuildArtifact;
use super::retry::with_backoff;

/// Why a scan produced no report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanSkipped {
    /// `scan.enabled: false`.
    Disabled,
    /// The backend has no scanner configured.
    NoScanner,
}

pub struct RegistryClient {
    backend: Arc<dyn RegistryBackend>,
    retry: RetryConfig,
    scan: ScanConfig,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("retry", &self.retry)
            .field("scan", &self.scan)
            .finish_non_exhaustive()
    }
}

impl RegistryClient {
    pub fn new(backend: Arc<dyn RegistryBackend>, retry: RetryConfig, scan: ScanConfig) -> Self {
        Self {
            backend,
            retry,
            scan,
        }
    }

    /// Push the artifact and return it with the registry's digest attached.
    pub async fn push(&self, artifact: BuildArtifact) -> Result<BuildArtifact, PipelineError> {
        let image = artifact.image().clone();
        tracing::info!("Pushing {}", image);

        let digest = with_backoff(&self.retry, "push", || self.backend.push(&image))
            .await
            .map_err(|source| PipelineError::Push {
                image: image.to_string(),
                source,
            })?;

        Ok(artifact.pushed(digest))
    }

    /// Scan a pushed artifact. `Ok(Err(_))` means the scan was skipped.
    pub async fn scan(
        &self,
        artifact: &BuildArtifact,
    ) -> Result<Result<VulnerabilityReport, ScanSkipped>, PipelineError> {
        if !self.scan.enabled {
            tracing::debug!("Vulnerability scan disabled");
            return Ok(Err(ScanSkipped::Disabled));
        }
        if !self.backend.supports_scan() {
            return Ok(Err(ScanSkipped::NoScanner));
        }

        let image = artifact.image();
        tracing::info!("Scanning {}", image);

        let report = with_backoff(&self.retry, "scan", || self.backend.scan(image))
            .await
            .map_err(|source| PipelineError::Scan {
                image: image.to_string(),
                source,
            })?;

        Ok(Ok(report))
    }

    /// Fail with `Security` when findings reach the configured threshold.
    pub fn enforce(
        &self,
        artifact: &BuildArtifact,
        report: &VulnerabilityReport,
    ) -> Result<(), PipelineError> {
        let threshold = self.scan.severity_threshold;
        let blocking = report.blocking(threshold);

        match blocking.iter().map(|f| f.severity).max() {
            Some(worst) => Err(PipelineError::Security {
                image: artifact.image().to_string(),
                blocking: blocking.len(),
                threshold,
                worst,
            }),
            None => Ok(()),
        }
    }

    /// Delete an image. An image that is already gone is not an error.
    pub async fn delete(&self, image: &ImageRef) -> Result<(), PipelineError> {
        tracing::info!("Deleting {}", image);

        match with_backoff(&self.retry, "delete", || self.backend.delete(image)).await {
            Ok(()) => Ok(()),
            Err(RegistryError::NotFound(_)) => {
                tracing::debug!("{} already absent", image);
                Ok(())
            }
            Err(e) => Err(PipelineError::Cleanup(format!(
                "failed to delete {}: {}",
                image, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Finding, Severity};
    use crate::types::ImageTag;
    use std::collections::BTreeMap;

    struct Unused;

    #[async_trait::async_trait]
    impl RegistryBackend for Unused {
        async fn push(&self, _: &ImageRef) -> Result<Option<String>, RegistryError> {
            Ok(None)
        }
        async fn scan(&self, _: &ImageRef) -> Result<VulnerabilityReport, RegistryError> {
            Ok(VulnerabilityReport::default())
        }
        async fn delete(&self, _: &ImageRef) -> Result<(), RegistryError> {
            Ok(())
        }
    }

    fn artifact() -> BuildArtifact {
        BuildArtifact::new(
            ImageRef::parse("r.io/acme/shop:abc1234").unwrap(),
            ImageTag::new("abc1234").unwrap(),
            BTreeMap::new(),
            BTreeMap::new(),
        )
    }

    fn finding(severity: Severity) -> Finding {
        Finding {
            id: "CVE-0".to_string(),
            package: "pkg".to_string(),
            severity,
        }
    }

    #[test]
    fn findings_below_threshold_pass() {
        let client = RegistryClient::new(
            Arc::new(Unused),
            RetryConfig::default(),
            ScanConfig::default(),
        );
        let report = VulnerabilityReport::new(vec![finding(Severity::Medium)]);
        assert!(client.enforce(&artifact(), &report).is_ok());
    }

    #[test]
    fn findings_at_threshold_block() {
        let client = RegistryClient::new(
            Arc::new(Unused),
            RetryConfig::default(),
            ScanConfig::default(),
        );
        let report = VulnerabilityReport::new(vec![
            finding(Severity::High),
            finding(Severity::Critical),
            finding(Severity::Low),
        ]);
        match client.enforce(&artifact(), &report) {
            Err(PipelineError::Security {
                blocking, worst, ..
            }) => {
                assert_eq!(blocking, 2);
                assert_eq!(worst, Severity::Critical);
            }
            other => panic!("expected security error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn disabled_scan_is_skipped() {
        let client = RegistryClient::new(
            Arc::new(Unused),
            RetryConfig::default(),
            ScanConfig {
                enabled: false,
                ..ScanConfig::default()
            },
        );
        let result = client.scan(&artifact()).await.unwrap();
        assert_eq!(result, Err(ScanSkipped::Disabled));
    }
}

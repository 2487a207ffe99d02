// ABOUTME: Deployment Controller: apply a spec and artifact under the namespace lock.
// ABOUTME: Records a revision, polls the health endpoint and settles the revision healthy or failed.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;

use crate::backend::{ApplyRequest, ClusterBackend, HealthProbe};
use crate::config::{HealthCheckConfig, LockConfig};
use crate::types::{Namespace, RevisionId, RunId};

use super::PipelineError;
use super::builder::BuildArtifact;
use super::lock::{NamespaceLock, NamespaceLocks};
use super::manifest;
use super::revision::{
    Completion, DeploymentRevision, NewRevision, RevisionStatus, RevisionStore,
};
use super::spec::DeploymentSpec;

/// Result of one apply: the settled revision and, if it failed, why.
#[derive(Debug)]
pub struct DeployOutcome {
    pub revision: DeploymentRevision,
    pub error: Option<PipelineError>,
}

impl DeployOutcome {
    pub fn is_healthy(&self) -> bool {
        self.error.is_none() && self.revision.is_healthy()
    }

    /// Healthy revision, or the failure with the revision dropped.
    pub fn into_result(self) -> Result<DeploymentRevision, PipelineError> {
        match self.error {
            None => Ok(self.revision),
            Some(e) => Err(e),
        }
    }
}

pub struct DeploymentController {
    cluster: Arc<dyn ClusterBackend>,
    probe: Arc<dyn HealthProbe>,
    store: Arc<dyn RevisionStore>,
    locks: Arc<NamespaceLocks>,
    state_dir: PathBuf,
    lock: LockConfig,
    run: RunId,
    force_lock: bool,
}

impl std::fmt::Debug for DeploymentController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentController")
            .field("state_dir", &self.state_dir)
            .field("run", &self.run)
            .finish_non_exhaustive()
    }
}

impl DeploymentController {
    pub fn new(
        cluster: Arc<dyn ClusterBackend>,
        probe: Arc<dyn HealthProbe>,
        store: Arc<dyn RevisionStore>,
        locks: Arc<NamespaceLocks>,
        state_dir: PathBuf,
        lock: LockConfig,
        run: RunId,
    ) -> Self {
        Self {
            cluster,
            probe,
            store,
            locks,
            state_dir,
            lock,
            run,
            force_lock: false,
        }
    }

    /// Break a held namespace lock instead of waiting for it.
    pub fn with_force_lock(mut self, force: bool) -> Self {
        self.force_lock = force;
        self
    }

    pub fn store(&self) -> &Arc<dyn RevisionStore> {
        &self.store
    }

    /// Apply `artifact` with `spec` and wait for it to become healthy.
    ///
    /// Errors (`InvalidSpec`, `LockHeld`, `Store`) mean no revision was
    /// settled by this call. An apply failure or health timeout is a
    /// `failed` revision in the outcome, not an error. Never rolls back.
    pub async fn apply(
        &self,
        spec: &DeploymentSpec,
        artifact: &BuildArtifact,
    ) -> Result<DeployOutcome, PipelineError> {
        spec.validate()?;

        let lock = self.acquire_lock(&spec.namespace).await?;
        let result = self.deploy_locked(&lock, spec, artifact, None).await;
        self.release_lock(lock).await;

        result
    }

    /// Take the namespace lock, waiting up to the configured timeout.
    pub(crate) async fn acquire_lock(
        &self,
        namespace: &Namespace,
    ) -> Result<NamespaceLock, PipelineError> {
        NamespaceLock::acquire(
            &self.locks,
            &self.state_dir,
            namespace,
            &self.run,
            &self.lock,
            self.force_lock,
        )
        .await
    }

    pub(crate) async fn release_lock(&self, lock: NamespaceLock) {
        if let Err(e) = lock.release().await {
            tracing::warn!("{}", e);
        }
    }

    /// Record, apply and settle a revision while `lock` is held.
    ///
    /// The spec must already be validated.
    pub(crate) async fn deploy_locked(
        &self,
        lock: &NamespaceLock,
        spec: &DeploymentSpec,
        artifact: &BuildArtifact,
        rollback_of: Option<RevisionId>,
    ) -> Result<DeployOutcome, PipelineError> {
        if lock.namespace() != &spec.namespace {
            return Err(PipelineError::lock_error(format!(
                "holding the lock for {} but deploying to {}",
                lock.namespace(),
                spec.namespace
            )));
        }

        let namespace = &spec.namespace;

        if let Some(abandoned) = self.store.abandon_pending(namespace).await? {
            tracing::warn!(
                "Marked revision {} in {} as abandoned by an earlier run",
                abandoned,
                namespace
            );
        }

        let revision = self
            .store
            .begin(NewRevision {
                namespace: namespace.clone(),
                spec: spec.clone(),
                artifact: artifact.clone(),
                rollback_of,
            })
            .await?;

        tracing::info!(
            "Applying {} to {} as revision {}",
            artifact.image(),
            namespace,
            revision.id
        );

        let (endpoint, error) = match self.apply_and_wait(spec, artifact).await {
            Ok(endpoint) => (Some(endpoint), None),
            Err((endpoint, e)) => (endpoint, Some(e)),
        };

        let completion = Completion {
            status: if error.is_none() {
                RevisionStatus::Healthy
            } else {
                RevisionStatus::Failed
            },
            endpoint,
            note: error.as_ref().map(|e| e.to_string()),
        };

        let revision = self
            .store
            .finish(namespace, &revision.id, completion)
            .await?;

        Ok(DeployOutcome { revision, error })
    }

    /// Apply and poll. On failure, returns the endpoint if one was known.
    async fn apply_and_wait(
        &self,
        spec: &DeploymentSpec,
        artifact: &BuildArtifact,
    ) -> Result<String, (Option<String>, PipelineError)> {
        let manifest = manifest::render(spec, artifact).map_err(|e| {
            (
                None,
                PipelineError::Deploy(format!("failed to render manifest: {}", e)),
            )
        })?;

        let request = ApplyRequest {
            app: spec.app.clone(),
            namespace: spec.namespace.clone(),
            manifest,
            service_url: spec.service_url(),
        };

        let reported = self
            .cluster
            .apply(&request)
            .await
            .map_err(|e| (None, PipelineError::Deploy(e.to_string())))?;

        let endpoint = spec.ingress_url().unwrap_or(reported);
        let url = health_url(&endpoint, &spec.health_check.path);

        match wait_healthy(self.probe.as_ref(), &url, &spec.health_check).await {
            Ok(()) => Ok(endpoint),
            Err(e) => Err((Some(endpoint), e)),
        }
    }
}

fn health_url(endpoint: &str, path: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), path)
}

/// Poll `url` every `interval` until it answers successfully or `timeout` elapses.
pub async fn wait_healthy(
    probe: &dyn HealthProbe,
    url: &str,
    config: &HealthCheckConfig,
) -> Result<(), PipelineError> {
    let deadline = Instant::now() + config.timeout;
    let timed_out = || PipelineError::HealthCheckTimeout {
        url: url.to_string(),
        timeout_secs: config.timeout.as_secs(),
    };

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timed_out());
        }

        match tokio::time::timeout(config.request_timeout.min(remaining), probe.check(url)).await {
            Ok(Ok(true)) => {
                tracing::info!("{} is healthy", url);
                return Ok(());
            }
            Ok(Ok(false)) => tracing::debug!("{} not healthy yet", url),
            Ok(Err(e)) => tracing::debug!("{}", e),
            Err(_elapsed) => tracing::debug!("Health probe on {} timed out", url),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timed_out());
        }
        tokio::time::sleep(config.interval.min(remaining)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ProbeError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingProbe {
        healthy_after: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl HealthProbe for CountingProbe {
        async fn check(&self, _url: &str) -> Result<bool, ProbeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(n >= self.healthy_after)
        }
    }

    fn config() -> HealthCheckConfig {
        HealthCheckConfig {
            path: "/health".to_string(),
            timeout: Duration::from_secs(300),
            interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn health_url_joins_without_double_slash() {
        assert_eq!(
            health_url("https://shop.example.com/", "/health"),
            "https://shop.example.com/health"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn becomes_healthy_within_timeout() {
        let probe = CountingProbe {
            healthy_after: 3,
            calls: AtomicU32::new(0),
        };
        let start = Instant::now();
        wait_healthy(&probe, "http://x/health", &config()).await.unwrap();

        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn never_healthy_times_out_at_deadline() {
        let probe = CountingProbe {
            healthy_after: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let start = Instant::now();
        let err = wait_healthy(&probe, "http://x/health", &config())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::HealthCheckTimeout {
                timeout_secs: 300,
                ..
            }
        ));
        assert_eq!(start.elapsed(), Duration::from_secs(300));
        // One probe at t=0 and one after each 5s pause before the deadline
        assert_eq!(probe.calls.load(Ordering::SeqCst), 60);
    }
}

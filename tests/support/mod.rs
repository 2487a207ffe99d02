// ABOUTME: Test support utilities.
// ABOUTME: In-memory fakes for the build, registry, cluster, probe and status backends.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicU32, Ordering};

use conveyor::backend::{
    ApplyError, ApplyRequest, BuildBackend, BuildError, BuildRequest, ClusterBackend,
    CommitState, HealthProbe, ProbeError, RegistryBackend, RegistryError, StatusApi,
    StatusError, StatusUpdate, VulnerabilityReport,
};
use conveyor::config::Config;
use conveyor::pipeline::{
    Backends, BuildArtifact, Completion, DeploymentRevision, DeploymentSpec, MemoryRevisionStore,
    NewRevision, Pipeline, PipelineOptions, RevisionStatus, RevisionStore,
};
use conveyor::trigger::{ManualInputs, Trigger, TriggerKind};
use conveyor::types::{AppName, Environment, ImageRef, ImageTag, Namespace, RevisionId, RunId};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("conveyor=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Config with short timeouts so failure paths finish quickly.
pub fn config(state_dir: &Path) -> Config {
    let mut config = Config::from_yaml(
        r#"
registry: r.io/acme
app: shop
deploy:
  health_check:
    path: /health
    timeout: 300ms
    interval: 20ms
    request_timeout: 50ms
retry:
  max_attempts: 3
  base_delay: 1ms
  max_delay: 5ms
lock:
  wait_timeout: 2s
"#,
    )
    .unwrap();
    config.state_dir = state_dir.to_path_buf();
    config
}

pub fn trigger(kind: TriggerKind, git_ref: &str, sha: &str) -> Trigger {
    Trigger {
        kind,
        git_ref: git_ref.to_string(),
        sha: sha.to_string(),
        repository: "acme/shop".to_string(),
        pull_request: conveyor::trigger::pull_request_number(git_ref),
        inputs: ManualInputs::default(),
    }
}

pub fn push_to_main(sha: &str) -> Trigger {
    trigger(TriggerKind::Push, "refs/heads/main", sha)
}

pub fn pull_request(number: u64, sha: &str) -> Trigger {
    trigger(
        TriggerKind::PullRequest,
        &format!("refs/pull/{}/merge", number),
        sha,
    )
}

// =============================================================================
// Build
// =============================================================================

#[derive(Default)]
pub struct FakeBuild {
    pub builds: AtomicU32,
    pub fail: bool,
    pub panic: bool,
}

#[async_trait]
impl BuildBackend for FakeBuild {
    async fn build(&self, _request: &BuildRequest) -> Result<(), BuildError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.panic {
            panic!("build backend crashed");
        }
        if self.fail {
            return Err(BuildError::Failed {
                code: Some(1),
                stderr: "COPY failed: file not found".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
pub struct FakeRegistry {
    pub pushes: AtomicU32,
    pub deletes: AtomicU32,
    /// Transient failures to return before a push succeeds.
    pub transient_push_failures: AtomicU32,
    pub report: Mutex<VulnerabilityReport>,
    pub no_scanner: bool,
    /// Images present in the registry.
    pub images: Mutex<Vec<String>>,
}

#[async_trait]
impl RegistryBackend for FakeRegistry {
    async fn push(&self, image: &ImageRef) -> Result<Option<String>, RegistryError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let left = self.transient_push_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.transient_push_failures.store(left - 1, Ordering::SeqCst);
            return Err(RegistryError::Transient("503 Service Unavailable".to_string()));
        }
        self.images.lock().push(image.to_string());
        Ok(Some(format!("sha256:{:064x}", self.pushes.load(Ordering::SeqCst))))
    }

    async fn scan(&self, _image: &ImageRef) -> Result<VulnerabilityReport, RegistryError> {
        Ok(self.report.lock().clone())
    }

    async fn delete(&self, image: &ImageRef) -> Result<(), RegistryError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut images = self.images.lock();
        let before = images.len();
        images.retain(|i| i != &image.to_string());
        if images.len() == before {
            return Err(RegistryError::NotFound(image.to_string()));
        }
        Ok(())
    }

    fn supports_scan(&self) -> bool {
        !self.no_scanner
    }
}

// =============================================================================
// Cluster and health
// =============================================================================

/// Records applied manifests and reports a fixed endpoint.
#[derive(Default)]
pub struct FakeCluster {
    pub manifests: Mutex<Vec<String>>,
    pub reject: bool,
}

#[async_trait]
impl ClusterBackend for FakeCluster {
    async fn apply(&self, request: &ApplyRequest) -> Result<String, ApplyError> {
        if self.reject {
            return Err(ApplyError::Rejected("admission webhook denied".to_string()));
        }
        self.manifests.lock().push(request.manifest.clone());
        Ok(format!("http://{}.{}.test", request.app, request.namespace))
    }
}

impl FakeCluster {
    pub fn applies(&self) -> usize {
        self.manifests.lock().len()
    }

    pub fn last_manifest(&self) -> Option<String> {
        self.manifests.lock().last().cloned()
    }
}

/// Healthy unless the last applied manifest mentions one of `broken`.
pub struct FakeProbe {
    pub cluster: Arc<FakeCluster>,
    pub broken: Vec<String>,
    pub checks: AtomicU32,
}

impl FakeProbe {
    pub fn new(cluster: Arc<FakeCluster>) -> Self {
        Self {
            cluster,
            broken: Vec::new(),
            checks: AtomicU32::new(0),
        }
    }

    pub fn broken_for(cluster: Arc<FakeCluster>, marker: &str) -> Self {
        Self {
            broken: vec![marker.to_string()],
            ..Self::new(cluster)
        }
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn check(&self, _url: &str) -> Result<bool, ProbeError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let manifest = self.cluster.last_manifest().unwrap_or_default();
        Ok(!self.broken.iter().any(|b| manifest.contains(b.as_str())))
    }
}

// =============================================================================
// Status
// =============================================================================

#[derive(Default)]
pub struct RecordingStatus {
    pub posts: Mutex<Vec<StatusUpdate>>,
    /// Failures to return before posts succeed.
    pub failures: Mutex<VecDeque<String>>,
}

impl RecordingStatus {
    pub fn states(&self) -> Vec<CommitState> {
        self.posts.lock().iter().map(|p| p.state).collect()
    }
}

#[async_trait]
impl StatusApi for RecordingStatus {
    async fn set_status(&self, _run: &RunId, update: &StatusUpdate) -> Result<(), StatusError> {
        if let Some(message) = self.failures.lock().pop_front() {
            return Err(StatusError::Request(message));
        }
        self.posts.lock().push(update.clone());
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A pipeline wired to fakes, with handles to inspect them.
pub struct Harness {
    pub build: Arc<FakeBuild>,
    pub registry: Arc<FakeRegistry>,
    pub cluster: Arc<FakeCluster>,
    pub probe: Arc<FakeProbe>,
    pub status: Arc<RecordingStatus>,
    pub store: Arc<MemoryRevisionStore>,
    pub config: Config,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeBuild::default(), FakeRegistry::default(), None)
    }

    /// `broken` marks images whose deployments never become healthy.
    pub fn with(build: FakeBuild, registry: FakeRegistry, broken: Option<&str>) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::default());
        let probe = match broken {
            Some(marker) => FakeProbe::broken_for(cluster.clone(), marker),
            None => FakeProbe::new(cluster.clone()),
        };
        Self {
            build: Arc::new(build),
            registry: Arc::new(registry),
            probe: Arc::new(probe),
            cluster,
            status: Arc::new(RecordingStatus::default()),
            store: Arc::new(MemoryRevisionStore::new()),
            config: config(&dir.path().join("state")),
            dir,
        }
    }

    pub fn with_cluster(mut self, cluster: FakeCluster) -> Self {
        self.cluster = Arc::new(cluster);
        self.probe = Arc::new(FakeProbe {
            cluster: self.cluster.clone(),
            broken: self.probe.broken.clone(),
            checks: AtomicU32::new(0),
        });
        self
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_with(PipelineOptions::default())
    }

    pub fn pipeline_with(&self, options: PipelineOptions) -> Pipeline {
        let backends = Backends {
            build: self.build.clone(),
            registry: self.registry.clone(),
            cluster: self.cluster.clone(),
            probe: self.probe.clone(),
            status: self.status.clone(),
            store: self.store.clone(),
        };
        Pipeline::new(
            self.config.clone(),
            self.dir.path(),
            backends,
            RunId::generate(),
            options,
        )
        .unwrap()
    }

    /// Record a healthy revision of `tag` in `namespace`, as an earlier run would.
    pub async fn seed_healthy(&self, namespace: &str, tag: &str) -> RevisionId {
        self.seed(namespace, tag, RevisionStatus::Healthy).await.id
    }

    /// Record a settled revision of `tag` in `namespace`.
    pub async fn seed(
        &self,
        namespace: &str,
        tag: &str,
        status: RevisionStatus,
    ) -> DeploymentRevision {
        let namespace = Namespace::new(namespace).unwrap();
        let tag = ImageTag::new(tag).unwrap();
        let image = ImageRef::from_parts("r.io/acme/shop", tag.as_str()).unwrap();
        let artifact = BuildArtifact::new(image, tag, Default::default(), Default::default());
        let spec = DeploymentSpec::from_config(
            &self.config.deploy,
            AppName::new("shop").unwrap(),
            Environment::Production,
            namespace.clone(),
        )
        .unwrap();

        let revision = self
            .store
            .begin(NewRevision {
                namespace: namespace.clone(),
                spec,
                artifact,
                rollback_of: None,
            })
            .await
            .unwrap();
        self.store
            .finish(
                &namespace,
                &revision.id,
                Completion {
                    status,
                    endpoint: Some(format!("http://shop.{}.test", namespace)),
                    note: None,
                },
            )
            .await
            .unwrap()
    }
}

// ABOUTME: Pipeline run orchestration with type-state stage ordering.
// ABOUTME: Each stage consumes the run and returns the next state, or itself plus the error.

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use crate::acceptance::{AcceptanceContext, AcceptanceRunner};
use crate::backend::{BuildBackend, ClusterBackend, HealthProbe, RegistryBackend, StatusApi};
use crate::config::Config;
use crate::diagnostics::{Diagnostics, Warning};
use crate::trigger::Trigger;
use crate::types::{AppName, Environment, ImageRef, ImageTag, Namespace, RunId};

use super::PipelineError;
use super::builder::{BuildArtifact, ImageBuilder, derive_app_name, derive_tag, image_reference};
use super::cleanup::CleanupScope;
use super::controller::DeploymentController;
use super::lock::NamespaceLocks;
use super::registry::{RegistryClient, ScanSkipped};
use super::revision::{DeploymentRevision, RevisionStore};
use super::rollback::{Recovery, RollbackManager};
use super::spec::DeploymentSpec;
use super::state::{
    Built, Deployed, Pushed, RunOutcome, RunPhase, Scanned, Stage, Started, Verified,
};
use super::status::{HealthResult, RunSummary, StatusReporter, SummarySinks};

/// Result type for transitions that hand the run back on failure.
pub type TransitionResult<T, S> = Result<Run<T>, (Run<S>, PipelineError)>;

/// Everything a run decides up front from config and trigger.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub id: RunId,
    pub trigger: Trigger,
    pub app: AppName,
    pub environment: Environment,
    pub namespace: Namespace,
    pub tag: ImageTag,
    pub image: ImageRef,
    pub spec: DeploymentSpec,
    pub rollback_enabled: bool,
    pub run_acceptance: bool,
}

fn invalid(what: &str, error: impl Display) -> PipelineError {
    PipelineError::InvalidSpec(vec![format!("{}: {}", what, error)])
}

impl RunContext {
    /// Resolve names, tag, image and spec. Manual inputs win over config.
    pub fn resolve(config: &Config, trigger: Trigger, id: RunId) -> Result<Self, PipelineError> {
        let environment = trigger.environment();
        let namespace = trigger.namespace();

        let app = derive_app_name(
            trigger.inputs.app_name.as_ref().or(config.app.as_ref()),
            &trigger.repository,
        )
        .map_err(|e| invalid("app name", e))?;
        let tag = derive_tag(trigger.inputs.image_tag.as_ref(), &trigger)
            .map_err(|e| invalid("image tag", e))?;
        let image =
            image_reference(&config.registry, &app, &tag).map_err(|e| invalid("image", e))?;

        let spec = DeploymentSpec::from_config(
            &config.deploy_for(environment),
            app.clone(),
            environment,
            namespace.clone(),
        )
        .map_err(|e| invalid("deploy settings", e))?;

        let rollback_enabled = trigger
            .inputs
            .auto_rollback
            .unwrap_or_else(|| config.rollback_enabled_for(environment));
        let run_acceptance = trigger
            .inputs
            .run_acceptance_tests
            .unwrap_or(config.acceptance.enabled);

        Ok(Self {
            id,
            trigger,
            app,
            environment,
            namespace,
            tag,
            image,
            spec,
            rollback_enabled,
            run_acceptance,
        })
    }
}

/// One pipeline run in stage `S`.
///
/// Stages can only be entered in order: `Run<Started>::build` yields
/// `Run<Built>`, which alone can `push`, and so on.
#[derive(Debug)]
pub struct Run<S> {
    ctx: RunContext,
    phase: RunPhase,
    revision: Option<DeploymentRevision>,
    health: HealthResult,
    state: S,
}

impl<S> Run<S> {
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Latest revision this run recorded, if any.
    pub fn revision(&self) -> Option<&DeploymentRevision> {
        self.revision.as_ref()
    }

    fn enter(&mut self, next: RunPhase) -> Result<(), PipelineError> {
        if !self.phase.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::debug!("Run {}: {} -> {}", self.ctx.id, self.phase, next);
        self.phase = next;
        Ok(())
    }

    fn map_state<T>(self, f: impl FnOnce(S) -> T) -> Run<T> {
        Run {
            ctx: self.ctx,
            phase: self.phase,
            revision: self.revision,
            health: self.health,
            state: f(self.state),
        }
    }
}

// =============================================================================
// Started -> Built -> Pushed -> Scanned
// =============================================================================

impl Run<Started> {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            phase: RunPhase::Pending,
            revision: None,
            health: HealthResult::NotRun,
            state: Started,
        }
    }

    /// Build the image.
    pub async fn build(mut self, builder: &ImageBuilder) -> TransitionResult<Built, Started> {
        if let Err(e) = self.enter(RunPhase::Building) {
            return Err((self, e));
        }

        match builder
            .build(&self.ctx.image, &self.ctx.tag, &self.ctx.trigger)
            .await
        {
            Ok(artifact) => Ok(self.map_state(|_| Built { artifact })),
            Err(e) => Err((self, e)),
        }
    }
}

impl Run<Built> {
    /// Push the image; the artifact comes back with its digest.
    pub async fn push(mut self, registry: &RegistryClient) -> TransitionResult<Pushed, Built> {
        if let Err(e) = self.enter(RunPhase::Pushing) {
            return Err((self, e));
        }

        match registry.push(self.state.artifact.clone()).await {
            Ok(artifact) => Ok(self.map_state(|_| Pushed { artifact })),
            Err(e) => Err((self, e)),
        }
    }
}

impl Run<Pushed> {
    /// Scan the pushed image and apply the severity policy.
    ///
    /// A scan that cannot run because no scanner is configured is skipped
    /// with a warning. Findings at or above the threshold stop the run.
    pub async fn scan(
        mut self,
        registry: &RegistryClient,
        diagnostics: &mut Diagnostics,
    ) -> TransitionResult<Scanned, Pushed> {
        if let Err(e) = self.enter(RunPhase::Scanning) {
            return Err((self, e));
        }

        let report = match registry.scan(&self.state.artifact).await {
            Ok(Ok(report)) => {
                if let Err(e) = registry.enforce(&self.state.artifact, &report) {
                    return Err((self, e));
                }
                Some(report)
            }
            Ok(Err(ScanSkipped::Disabled)) => None,
            Ok(Err(ScanSkipped::NoScanner)) => {
                diagnostics.warn(Warning::scan_skipped(format!(
                    "no scan command configured, {} was not scanned",
                    self.state.artifact.image()
                )));
                None
            }
            Err(e) => return Err((self, e)),
        };

        Ok(self.map_state(|s| Scanned {
            artifact: s.artifact,
            report,
        }))
    }
}

// =============================================================================
// Scanned -> Deployed -> Verified
// =============================================================================

impl Run<Scanned> {
    /// Scan report, or `None` when the scan was skipped.
    pub fn report(&self) -> Option<&crate::backend::VulnerabilityReport> {
        self.state.report.as_ref()
    }

    /// Apply the new revision and wait for it to become healthy.
    pub async fn deploy(
        mut self,
        controller: &DeploymentController,
    ) -> TransitionResult<Deployed, Scanned> {
        if let Err(e) = self.enter(RunPhase::Deploying) {
            return Err((self, e));
        }

        let outcome = match controller.apply(&self.ctx.spec, &self.state.artifact).await {
            Ok(outcome) => outcome,
            Err(e) => return Err((self, e)),
        };

        self.revision = Some(outcome.revision.clone());
        match outcome.error {
            None => {
                self.health = HealthResult::Passed;
                let revision = outcome.revision;
                Ok(self.map_state(|s| Deployed {
                    artifact: s.artifact,
                    revision,
                }))
            }
            Some(e) => {
                if matches!(e, PipelineError::HealthCheckTimeout { .. }) {
                    self.health = HealthResult::Failed;
                }
                Err((self, e))
            }
        }
    }
}

impl Run<Deployed> {
    /// Run acceptance tests against the live endpoint.
    ///
    /// With no test configured the stage is skipped with a warning.
    pub async fn accept(
        mut self,
        runner: &AcceptanceRunner,
        diagnostics: &mut Diagnostics,
    ) -> TransitionResult<Verified, Deployed> {
        if let Err(e) = self.enter(RunPhase::Testing) {
            return Err((self, e));
        }

        let context = AcceptanceContext {
            app: self.ctx.app.clone(),
            image: self.state.artifact.deploy_reference().to_string(),
            namespace: self.ctx.namespace.clone(),
            environment: self.ctx.environment,
            url: self.state.revision.endpoint.clone().unwrap_or_default(),
        };

        match runner.run(&context).await {
            None => {
                diagnostics.warn(Warning::acceptance_skipped(
                    "acceptance tests requested but no command or hook is configured",
                ));
            }
            Some(result) if result.success => {}
            Some(result) => {
                let error = PipelineError::AcceptanceFailed(result.failure_reason());
                return Err((self, error));
            }
        }

        Ok(self.map_state(|s| Verified {
            artifact: s.artifact,
            revision: s.revision,
        }))
    }

    pub fn succeed(self) -> Finished {
        let artifact = self.state.artifact.clone();
        self.finish_success(artifact)
    }
}

impl Run<Verified> {
    pub fn succeed(self) -> Finished {
        let artifact = self.state.artifact.clone();
        self.finish_success(artifact)
    }
}

// =============================================================================
// Terminal transitions
// =============================================================================

impl<S> Run<S> {
    fn finish_success(mut self, artifact: BuildArtifact) -> Finished {
        if let Err(e) = self.enter(RunPhase::Success) {
            return self.finish(RunOutcome::Failed, Some(artifact), Some(e), None, None);
        }
        tracing::info!(
            "Run {} deployed {} to {}",
            self.ctx.id,
            artifact.image(),
            self.ctx.namespace
        );
        self.finish(RunOutcome::Success, Some(artifact), None, None, None)
    }

    fn finish(
        self,
        outcome: RunOutcome,
        artifact: Option<BuildArtifact>,
        error: Option<PipelineError>,
        restored: Option<DeploymentRevision>,
        rollback_error: Option<PipelineError>,
    ) -> Finished {
        Finished {
            ctx: self.ctx,
            outcome,
            artifact,
            revision: self.revision,
            restored,
            health: self.health,
            error,
            rollback_error,
        }
    }
}

impl<S: Stage> Run<S> {
    /// End the run `failed`.
    pub fn fail(mut self, error: PipelineError) -> Finished {
        tracing::error!("Run {} failed in {}: {}", self.ctx.id, self.phase, error);
        if let Err(e) = self.enter(RunPhase::Failed) {
            tracing::error!("{}", e);
        }
        let artifact = self.state.artifact().cloned();
        self.finish(RunOutcome::Failed, artifact, Some(error), None, None)
    }

    /// Route a deploy-time failure through the rollback manager when the run
    /// allows it; otherwise end the run `failed`.
    pub async fn recover(mut self, error: PipelineError, rollback: &RollbackManager) -> Finished {
        if !self.ctx.rollback_enabled || !error.triggers_rollback() {
            return self.fail(error);
        }
        if let Err(e) = self.enter(RunPhase::RollingBack) {
            tracing::error!("{}", e);
            return self.fail(error);
        }

        tracing::warn!("Rolling back {}: {}", self.ctx.namespace, error);
        let artifact = self.state.artifact().cloned();

        // A revision that passed its health check but failed acceptance
        // must not be picked as its own rollback target
        let demote = matches!(error, PipelineError::AcceptanceFailed(_)).then(|| error.to_string());

        let recovery = rollback
            .recover(&self.ctx.namespace, self.revision.as_ref(), demote.as_deref())
            .await;

        match recovery {
            Ok(Recovery::Restored { failed, restored }) => {
                if failed.is_some() {
                    self.revision = failed;
                }
                if let Err(e) = self.enter(RunPhase::RolledBack) {
                    return self.rollback_failed(artifact, error, e);
                }
                tracing::warn!(
                    "Run {} rolled back {} to revision {}",
                    self.ctx.id,
                    self.ctx.namespace,
                    restored.rollback_of.as_ref().unwrap_or(&restored.id)
                );
                self.finish(
                    RunOutcome::RolledBack,
                    artifact,
                    Some(error),
                    Some(restored),
                    None,
                )
            }
            Ok(Recovery::Superseded { failed, by }) => {
                tracing::warn!(
                    "Run {} left {} on revision {}, which replaced {}",
                    self.ctx.id,
                    self.ctx.namespace,
                    by,
                    failed.id
                );
                self.revision = Some(failed);
                if let Err(e) = self.enter(RunPhase::Failed) {
                    tracing::error!("{}", e);
                }
                self.finish(RunOutcome::Failed, artifact, Some(error), None, None)
            }
            Err(e) => self.rollback_failed(artifact, error, e),
        }
    }

    fn rollback_failed(
        mut self,
        artifact: Option<BuildArtifact>,
        error: PipelineError,
        rollback_error: PipelineError,
    ) -> Finished {
        tracing::error!("Rollback of {} failed: {}", self.ctx.namespace, rollback_error);
        if let Err(e) = self.enter(RunPhase::Failed) {
            tracing::error!("{}", e);
        }
        self.finish(
            RunOutcome::Failed,
            artifact,
            Some(error),
            None,
            Some(rollback_error),
        )
    }
}

/// A run that reached a terminal state.
#[derive(Debug)]
pub struct Finished {
    ctx: RunContext,
    outcome: RunOutcome,
    artifact: Option<BuildArtifact>,
    revision: Option<DeploymentRevision>,
    restored: Option<DeploymentRevision>,
    health: HealthResult,
    error: Option<PipelineError>,
    rollback_error: Option<PipelineError>,
}

impl Finished {
    pub fn outcome(&self) -> RunOutcome {
        self.outcome
    }

    pub fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    pub fn rollback_error(&self) -> Option<&PipelineError> {
        self.rollback_error.as_ref()
    }

    /// Revision recorded for the new artifact, if the run got that far.
    pub fn revision(&self) -> Option<&DeploymentRevision> {
        self.revision.as_ref()
    }

    /// Revision created by the rollback.
    pub fn restored(&self) -> Option<&DeploymentRevision> {
        self.restored.as_ref()
    }

    pub fn summary(&self) -> RunSummary {
        let url = self
            .restored
            .as_ref()
            .and_then(|r| r.endpoint.clone())
            .or_else(|| self.revision.as_ref().and_then(|r| r.endpoint.clone()));

        RunSummary {
            run_id: self.ctx.id.clone(),
            trigger: self.ctx.trigger.kind,
            git_ref: self.ctx.trigger.git_ref.clone(),
            sha: self.ctx.trigger.sha.clone(),
            environment: self.ctx.environment,
            namespace: self.ctx.namespace.clone(),
            image: self
                .artifact
                .as_ref()
                .map(|a| a.deploy_reference().to_string()),
            digest: self
                .artifact
                .as_ref()
                .and_then(|a| a.digest().map(str::to_string)),
            url,
            health: self.health,
            outcome: self.outcome,
            revision: self.revision.as_ref().map(|r| r.id.to_string()),
            rolled_back_to: self
                .restored
                .as_ref()
                .and_then(|r| r.rollback_of.as_ref())
                .map(|id| id.to_string()),
            error: self.error.as_ref().map(|e| e.to_string()),
            rollback_error: self.rollback_error.as_ref().map(|e| e.to_string()),
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// External collaborators of a pipeline.
pub struct Backends {
    pub build: Arc<dyn BuildBackend>,
    pub registry: Arc<dyn RegistryBackend>,
    pub cluster: Arc<dyn ClusterBackend>,
    pub probe: Arc<dyn HealthProbe>,
    pub status: Arc<dyn StatusApi>,
    pub store: Arc<dyn RevisionStore>,
}

#[derive(Debug, Default)]
pub struct PipelineOptions {
    /// Break a held namespace lock instead of waiting.
    pub force_lock: bool,
    pub sinks: SummarySinks,
    /// Shared with other pipelines in this process deploying concurrently.
    pub locks: Arc<NamespaceLocks>,
}

/// What a finished run leaves behind.
#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    pub diagnostics: Diagnostics,
}

/// Wires the components together and drives runs from trigger to status.
pub struct Pipeline {
    config: Config,
    run: RunId,
    builder: ImageBuilder,
    registry: RegistryClient,
    controller: Arc<DeploymentController>,
    rollback: RollbackManager,
    acceptance: AcceptanceRunner,
    reporter: StatusReporter,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("run", &self.run)
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        config: Config,
        project_dir: &Path,
        backends: Backends,
        run: RunId,
        options: PipelineOptions,
    ) -> crate::error::Result<Self> {
        let builder = ImageBuilder::new(
            backends.build,
            project_dir.join(&config.build.context),
            project_dir.join(&config.build.dockerfile),
            config.build_args()?,
            config.build.labels.clone(),
        );
        let registry = RegistryClient::new(backends.registry, config.retry, config.scan.clone());
        let controller = Arc::new(
            DeploymentController::new(
                backends.cluster,
                backends.probe,
                backends.store,
                options.locks,
                config.state_dir.clone(),
                config.lock,
                run.clone(),
            )
            .with_force_lock(options.force_lock),
        );
        let rollback = RollbackManager::new(Arc::clone(&controller));
        let acceptance = AcceptanceRunner::new(project_dir, &config.acceptance);
        let reporter = StatusReporter::new(backends.status, options.sinks);

        Ok(Self {
            config,
            run,
            builder,
            registry,
            controller,
            rollback,
            acceptance,
            reporter,
        })
    }

    pub fn run_id(&self) -> &RunId {
        &self.run
    }

    pub fn rollback_manager(&self) -> &RollbackManager {
        &self.rollback
    }

    /// Execute one run for `trigger`.
    ///
    /// Always posts `pending` first and exactly one terminal status last,
    /// and deletes the PR image on every exit path of a PR run.
    pub async fn execute(&self, trigger: Trigger) -> RunReport {
        let mut diagnostics = Diagnostics::default();
        let namespace = trigger.namespace();
        tracing::info!(
            "Run {}: {} {} ({}) -> {}",
            self.run,
            trigger.kind,
            trigger.git_ref,
            trigger.sha,
            namespace
        );

        let status = self
            .reporter
            .begin(&self.run, &trigger, &namespace, &mut diagnostics)
            .await;
        let mut fallback = failed_summary(&self.run, &trigger);

        let summary = match RunContext::resolve(&self.config, trigger, self.run.clone()) {
            Err(e) => {
                tracing::error!("Run {} failed before building: {}", self.run, e);
                fallback.error = Some(e.to_string());
                fallback
            }
            Ok(ctx) => {
                let scope = CleanupScope::for_trigger(&ctx.trigger, &ctx.image);
                let scoped = scope
                    .run(&self.registry, self.drive(ctx, &mut diagnostics))
                    .await;

                if let Some(Err(ref e)) = scoped.cleanup {
                    diagnostics.warn(Warning::cleanup(e.to_string()));
                }

                let panic = scoped.panic_message();
                match scoped.result {
                    Ok(finished) => finished.summary(),
                    Err(_) => {
                        fallback.error = Some(format!(
                            "run panicked: {}",
                            panic.unwrap_or_default()
                        ));
                        fallback
                    }
                }
            }
        };

        status.finish(&summary, &mut diagnostics).await;
        RunReport {
            summary,
            diagnostics,
        }
    }

    async fn drive(&self, ctx: RunContext, diagnostics: &mut Diagnostics) -> Finished {
        let run = Run::new(ctx);

        let run = match run.build(&self.builder).await {
            Ok(run) => run,
            Err((run, e)) => return run.fail(e),
        };
        let run = match run.push(&self.registry).await {
            Ok(run) => run,
            Err((run, e)) => return run.fail(e),
        };
        let run = match run.scan(&self.registry, diagnostics).await {
            Ok(run) => run,
            Err((run, e)) => return run.fail(e),
        };
        let run = match run.deploy(&self.controller).await {
            Ok(run) => run,
            Err((run, e)) => return run.recover(e, &self.rollback).await,
        };

        if !run.context().run_acceptance {
            return run.succeed();
        }
        match run.accept(&self.acceptance, diagnostics).await {
            Ok(run) => run.succeed(),
            Err((run, e)) => run.recover(e, &self.rollback).await,
        }
    }
}

/// Summary for a run that never produced a [`Finished`].
fn failed_summary(run: &RunId, trigger: &Trigger) -> RunSummary {
    RunSummary {
        run_id: run.clone(),
        trigger: trigger.kind,
        git_ref: trigger.git_ref.clone(),
        sha: trigger.sha.clone(),
        environment: trigger.environment(),
        namespace: trigger.namespace(),
        image: None,
        digest: None,
        url: None,
        health: HealthResult::NotRun,
        outcome: RunOutcome::Failed,
        revision: None,
        rolled_back_to: None,
        error: None,
        rollback_error: None,
    }
}

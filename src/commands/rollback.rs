// ABOUTME: Rollback and history command implementations.
// ABOUTME: Manual recovery to a healthy revision and a view of past revisions.

use super::backends::default_backends;
use conveyor::config::Config;
use conveyor::error::Result;
use conveyor::output::Output;
use conveyor::pipeline::{
    DeploymentController, FileRevisionStore, NamespaceLocks, PipelineError, RevisionStore,
    RollbackManager,
};
use conveyor::types::{Namespace, RevisionId, RunId};
use std::path::Path;
use std::sync::Arc;

/// Reapply the latest healthy revision, or `to` if given.
pub async fn rollback(
    config: Config,
    project_dir: &Path,
    namespace: Namespace,
    to: Option<String>,
    force_lock: bool,
    mut output: Output,
) -> Result<()> {
    let backends = default_backends(&config, project_dir)?;
    let controller = DeploymentController::new(
        backends.cluster,
        backends.probe,
        backends.store,
        Arc::new(NamespaceLocks::new()),
        config.state_dir.clone(),
        config.lock,
        RunId::generate(),
    )
    .with_force_lock(force_lock);
    let manager = RollbackManager::new(Arc::new(controller));

    output.start_timer();
    output.progress(&format!("Rolling back {}", namespace));

    let restored = match to {
        Some(id) => manager.rollback_to(&namespace, &RevisionId::new(id)).await?,
        None => manager.rollback(&namespace).await?,
    };

    let target = restored
        .rollback_of
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_default();
    output.success(&format!(
        "Rolled back {} to {} as revision {}",
        namespace, target, restored.id
    ));
    Ok(())
}

/// Print the revision history of a namespace.
pub async fn history(config: Config, namespace: Namespace, output: Output) -> Result<()> {
    let revisions = FileRevisionStore::new(&config.state_dir)
        .history(&namespace)
        .await
        .map_err(PipelineError::from)?;

    if revisions.is_empty() {
        output.progress(&format!("No revisions recorded for {}", namespace));
        return Ok(());
    }

    output.history(&revisions);
    Ok(())
}

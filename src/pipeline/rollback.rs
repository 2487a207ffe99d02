// ABOUTME: Rollback Manager: reapply the latest healthy revision of a namespace.
// ABOUTME: Picks, demotes and reapplies under one namespace lock; fails closed, never retries.

use std::sync::Arc;

use crate::types::{Namespace, RevisionId};

use super::PipelineError;
use super::controller::DeploymentController;
use super::lock::NamespaceLock;
use super::revision::{Completion, DeploymentRevision, RevisionStatus};

/// What recovering from a failed revision did.
#[derive(Debug)]
pub enum Recovery {
    /// The latest restorable revision was reapplied.
    Restored {
        /// The failed revision as recorded, after any demotion.
        failed: Option<DeploymentRevision>,
        restored: DeploymentRevision,
    },
    /// A newer revision settled after the failed one, so the namespace
    /// no longer runs it and was left alone.
    Superseded {
        failed: DeploymentRevision,
        by: RevisionId,
    },
}

#[derive(Debug)]
pub struct RollbackManager {
    controller: Arc<DeploymentController>,
}

impl RollbackManager {
    pub fn new(controller: Arc<DeploymentController>) -> Self {
        Self { controller }
    }

    /// Reapply the latest healthy revision of `namespace`.
    ///
    /// Returns the new revision, healthy and with `rollback_of` set.
    pub async fn rollback(
        &self,
        namespace: &Namespace,
    ) -> Result<DeploymentRevision, PipelineError> {
        let lock = self.controller.acquire_lock(namespace).await?;
        let result = match self.latest_restorable(namespace).await {
            Ok(target) => self.reapply(&lock, target).await,
            Err(e) => Err(e),
        };
        self.controller.release_lock(lock).await;
        result
    }

    /// Reapply a specific revision, which must have been healthy and must
    /// not be an ephemeral image.
    pub async fn rollback_to(
        &self,
        namespace: &Namespace,
        id: &RevisionId,
    ) -> Result<DeploymentRevision, PipelineError> {
        let lock = self.controller.acquire_lock(namespace).await?;
        let result = match self.restorable(namespace, id).await {
            Ok(target) => self.reapply(&lock, target).await,
            Err(e) => Err(e),
        };
        self.controller.release_lock(lock).await;
        result
    }

    /// Recover a namespace after `failed` did not ship.
    ///
    /// With `demote` set, a revision that passed its health check is first
    /// marked failed so it is never chosen as a target. If another revision
    /// settled after `failed`, nothing is reapplied. All of it happens
    /// under one hold of the namespace lock.
    pub async fn recover(
        &self,
        namespace: &Namespace,
        failed: Option<&DeploymentRevision>,
        demote: Option<&str>,
    ) -> Result<Recovery, PipelineError> {
        let lock = self.controller.acquire_lock(namespace).await?;
        let result = self.recover_locked(&lock, namespace, failed, demote).await;
        self.controller.release_lock(lock).await;
        result
    }

    async fn recover_locked(
        &self,
        lock: &NamespaceLock,
        namespace: &Namespace,
        failed: Option<&DeploymentRevision>,
        demote: Option<&str>,
    ) -> Result<Recovery, PipelineError> {
        let store = self.controller.store();

        let failed = match (failed, demote) {
            (Some(revision), Some(reason)) if revision.is_healthy() => {
                let completion = Completion {
                    status: RevisionStatus::Failed,
                    endpoint: None,
                    note: Some(reason.to_string()),
                };
                Some(store.finish(namespace, &revision.id, completion).await?)
            }
            (revision, _) => revision.cloned(),
        };

        if let Some(failed) = &failed
            && let Some(newer) = store.latest_settled(namespace).await?
            && newer.id != failed.id
        {
            tracing::warn!(
                "Not rolling back {}: revision {} settled after {}",
                namespace,
                newer.id,
                failed.id
            );
            return Ok(Recovery::Superseded {
                failed: failed.clone(),
                by: newer.id,
            });
        }

        let target = self.latest_restorable(namespace).await?;
        let restored = self.reapply(lock, target).await?;
        Ok(Recovery::Restored { failed, restored })
    }

    async fn latest_restorable(
        &self,
        namespace: &Namespace,
    ) -> Result<DeploymentRevision, PipelineError> {
        self.controller
            .store()
            .latest_healthy(namespace)
            .await?
            .ok_or_else(|| PipelineError::NoHealthyRevision(namespace.clone()))
    }

    async fn restorable(
        &self,
        namespace: &Namespace,
        id: &RevisionId,
    ) -> Result<DeploymentRevision, PipelineError> {
        let target = self
            .controller
            .store()
            .get(namespace, id)
            .await?
            .ok_or_else(|| {
                PipelineError::Rollback(format!("revision {} not found in {}", id, namespace))
            })?;

        if !target.is_healthy() {
            return Err(PipelineError::Rollback(format!(
                "revision {} is {}, only healthy revisions can be restored",
                id, target.status
            )));
        }
        if target.artifact.is_ephemeral() {
            return Err(PipelineError::Rollback(format!(
                "revision {} deployed {}, which was deleted when its run ended",
                id,
                target.artifact.image()
            )));
        }
        Ok(target)
    }

    async fn reapply(
        &self,
        lock: &NamespaceLock,
        target: DeploymentRevision,
    ) -> Result<DeploymentRevision, PipelineError> {
        tracing::info!(
            "Rolling back {} to revision {} ({})",
            target.namespace,
            target.id,
            target.artifact.image()
        );

        target
            .spec
            .validate()
            .map_err(|e| PipelineError::Rollback(e.to_string()))?;

        let outcome = self
            .controller
            .deploy_locked(lock, &target.spec, &target.artifact, Some(target.id.clone()))
            .await
            .map_err(|e| PipelineError::Rollback(e.to_string()))?;

        outcome
            .into_result()
            .map_err(|e| PipelineError::Rollback(e.to_string()))
    }
}

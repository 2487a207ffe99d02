// ABOUTME: Deployment revisions and the per-namespace revision history store.
// ABOUTME: File store (JSON under the state dir) and in-memory store; at most one pending revision.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use super::builder::BuildArtifact;
use super::spec::DeploymentSpec;
use crate::types::{Namespace, RevisionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionStatus {
    Pending,
    Healthy,
    Failed,
}

impl fmt::Display for RevisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RevisionStatus::Pending => "pending",
            RevisionStatus::Healthy => "healthy",
            RevisionStatus::Failed => "failed",
        })
    }
}

/// One apply of a spec and artifact to a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRevision {
    pub id: RevisionId,
    pub namespace: Namespace,
    pub spec: DeploymentSpec,
    pub artifact: BuildArtifact,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RevisionStatus,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Revision whose spec and artifact this one restores.
    #[serde(default)]
    pub rollback_of: Option<RevisionId>,
    /// Why the revision failed, if it did.
    #[serde(default)]
    pub note: Option<String>,
}

impl DeploymentRevision {
    pub fn is_healthy(&self) -> bool {
        self.status == RevisionStatus::Healthy
    }

    /// Healthy and still pullable: ephemeral images are deleted when their run ends.
    pub fn is_restorable(&self) -> bool {
        self.is_healthy() && !self.artifact.is_ephemeral()
    }
}

/// Input for [`RevisionStore::begin`].
#[derive(Debug, Clone)]
pub struct NewRevision {
    pub namespace: Namespace,
    pub spec: DeploymentSpec,
    pub artifact: BuildArtifact,
    pub rollback_of: Option<RevisionId>,
}

/// Final state for [`RevisionStore::finish`].
#[derive(Debug, Clone)]
pub struct Completion {
    pub status: RevisionStatus,
    pub endpoint: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("namespace {namespace} already has pending revision {id}")]
    PendingExists { namespace: Namespace, id: RevisionId },

    #[error("revision {id} not found in namespace {namespace}")]
    NotFound { namespace: Namespace, id: RevisionId },

    #[error("revision {id} cannot move from {from} to {to}")]
    InvalidStatus {
        id: RevisionId,
        from: RevisionStatus,
        to: RevisionStatus,
    },

    #[error("revision history I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("revision history is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Ordered revision history per namespace.
///
/// Implementations must refuse `begin` while the namespace has a pending
/// revision, so at most one is pending at any instant.
#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// All revisions of a namespace, oldest first.
    async fn history(&self, namespace: &Namespace) -> Result<Vec<DeploymentRevision>, StoreError>;

    /// Record a new pending revision.
    async fn begin(&self, revision: NewRevision) -> Result<DeploymentRevision, StoreError>;

    /// Settle a revision. Pending may become healthy or failed; healthy may
    /// be demoted to failed (acceptance tests). Nothing else changes.
    async fn finish(
        &self,
        namespace: &Namespace,
        id: &RevisionId,
        completion: Completion,
    ) -> Result<DeploymentRevision, StoreError>;

    /// Mark a leftover pending revision failed. Returns its id if there was one.
    async fn abandon_pending(&self, namespace: &Namespace)
    -> Result<Option<RevisionId>, StoreError>;

    /// Latest healthy revision whose image is kept, the only kind a
    /// rollback can restore.
    async fn latest_healthy(
        &self,
        namespace: &Namespace,
    ) -> Result<Option<DeploymentRevision>, StoreError> {
        Ok(self
            .history(namespace)
            .await?
            .into_iter()
            .rev()
            .find(|r| r.is_restorable()))
    }

    /// Latest revision that is no longer pending.
    async fn latest_settled(
        &self,
        namespace: &Namespace,
    ) -> Result<Option<DeploymentRevision>, StoreError> {
        Ok(self
            .history(namespace)
            .await?
            .into_iter()
            .rev()
            .find(|r| r.status != RevisionStatus::Pending))
    }

    async fn get(
        &self,
        namespace: &Namespace,
        id: &RevisionId,
    ) -> Result<Option<DeploymentRevision>, StoreError> {
        Ok(self
            .history(namespace)
            .await?
            .into_iter()
            .find(|r| &r.id == id))
    }
}

// Shared history operations; both stores load a Vec, change it, and save it.

fn begin_in(
    history: &mut Vec<DeploymentRevision>,
    revision: NewRevision,
) -> Result<DeploymentRevision, StoreError> {
    if let Some(pending) = history
        .iter()
        .find(|r| r.status == RevisionStatus::Pending)
    {
        return Err(StoreError::PendingExists {
            namespace: revision.namespace,
            id: pending.id.clone(),
        });
    }

    let next = history
        .iter()
        .filter_map(|r| r.id.sequence())
        .max()
        .unwrap_or(0)
        + 1;

    let record = DeploymentRevision {
        id: RevisionId::from_sequence(next),
        namespace: revision.namespace,
        spec: revision.spec,
        artifact: revision.artifact,
        created_at: Utc::now(),
        finished_at: None,
        status: RevisionStatus::Pending,
        endpoint: None,
        rollback_of: revision.rollback_of,
        note: None,
    };
    history.push(record.clone());
    Ok(record)
}

fn finish_in(
    history: &mut [DeploymentRevision],
    namespace: &Namespace,
    id: &RevisionId,
    completion: Completion,
) -> Result<DeploymentRevision, StoreError> {
    let record = history
        .iter_mut()
        .find(|r| &r.id == id)
        .ok_or_else(|| StoreError::NotFound {
            namespace: namespace.clone(),
            id: id.clone(),
        })?;

    let allowed = matches!(
        (record.status, completion.status),
        (RevisionStatus::Pending, RevisionStatus::Healthy)
            | (RevisionStatus::Pending, RevisionStatus::Failed)
            | (RevisionStatus::Healthy, RevisionStatus::Failed)
    );
    if !allowed {
        return Err(StoreError::InvalidStatus {
            id: id.clone(),
            from: record.status,
            to: completion.status,
        });
    }

    record.status = completion.status;
    record.finished_at = Some(Utc::now());
    if completion.endpoint.is_some() {
        record.endpoint = completion.endpoint;
    }
    record.note = completion.note;
    Ok(record.clone())
}

fn abandon_in(history: &mut [DeploymentRevision]) -> Option<RevisionId> {
    let record = history
        .iter_mut()
        .find(|r| r.status == RevisionStatus::Pending)?;
    record.status = RevisionStatus::Failed;
    record.finished_at = Some(Utc::now());
    record.note = Some("abandoned: run ended without settling this revision".to_string());
    Some(record.id.clone())
}

/// Revision history as one JSON file per namespace under `{state_dir}/revisions`.
#[derive(Debug)]
pub struct FileRevisionStore {
    dir: PathBuf,
    // Serializes read-modify-write cycles within this process
    guard: tokio::sync::Mutex<()>,
}

impl FileRevisionStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("revisions"),
            guard: tokio::sync::Mutex::new(()),
        }
    }

    fn path(&self, namespace: &Namespace) -> PathBuf {
        self.dir.join(format!("{}.json", namespace))
    }

    async fn load(&self, namespace: &Namespace) -> Result<Vec<DeploymentRevision>, StoreError> {
        match tokio::fs::read(self.path(namespace)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a temp file and rename, so readers never see half a history.
    async fn save(
        &self,
        namespace: &Namespace,
        history: &[DeploymentRevision],
    ) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(namespace);
        let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
        let json = serde_json::to_vec_pretty(history)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl RevisionStore for FileRevisionStore {
    async fn history(&self, namespace: &Namespace) -> Result<Vec<DeploymentRevision>, StoreError> {
        self.load(namespace).await
    }

    async fn begin(&self, revision: NewRevision) -> Result<DeploymentRevision, StoreError> {
        let _guard = self.guard.lock().await;
        let namespace = revision.namespace.clone();
        let mut history = self.load(&namespace).await?;
        let record = begin_in(&mut history, revision)?;
        self.save(&namespace, &history).await?;
        Ok(record)
    }

    async fn finish(
        &self,
        namespace: &Namespace,
        id: &RevisionId,
        completion: Completion,
    ) -> Result<DeploymentRevision, StoreError> {
        let _guard = self.guard.lock().await;
        let mut history = self.load(namespace).await?;
        let record = finish_in(&mut history, namespace, id, completion)?;
        self.save(namespace, &history).await?;
        Ok(record)
    }

    async fn abandon_pending(
        &self,
        namespace: &Namespace,
    ) -> Result<Option<RevisionId>, StoreError> {
        let _guard = self.guard.lock().await;
        let mut history = self.load(namespace).await?;
        let abandoned = abandon_in(&mut history);
        if abandoned.is_some() {
            self.save(namespace, &history).await?;
        }
        Ok(abandoned)
    }
}

/// In-memory revision history.
#[derive(Debug, Default)]
pub struct MemoryRevisionStore {
    histories: parking_lot::Mutex<HashMap<Namespace, Vec<DeploymentRevision>>>,
}

impl MemoryRevisionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevisionStore for MemoryRevisionStore {
    async fn history(&self, namespace: &Namespace) -> Result<Vec<DeploymentRevision>, StoreError> {
        Ok(self
            .histories
            .lock()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    async fn begin(&self, revision: NewRevision) -> Result<DeploymentRevision, StoreError> {
        let mut histories = self.histories.lock();
        let history = histories.entry(revision.namespace.clone()).or_default();
        begin_in(history, revision)
    }

    async fn finish(
        &self,
        namespace: &Namespace,
        id: &RevisionId,
        completion: Completion,
    ) -> Result<DeploymentRevision, StoreError> {
        let mut histories = self.histories.lock();
        let history = histories.entry(namespace.clone()).or_default();
        finish_in(history, namespace, id, completion)
    }

    async fn abandon_pending(
        &self,
        namespace: &Namespace,
    ) -> Result<Option<RevisionId>, StoreError> {
        let mut histories = self.histories.lock();
        Ok(histories.get_mut(namespace).and_then(|h| abandon_in(h)))
    }
}

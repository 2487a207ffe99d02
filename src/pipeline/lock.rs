// ABOUTME: Namespace lock so only one run deploys to a namespace at a time.
// ABOUTME: In-process mutex per namespace plus an atomic lock file under the state dir.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::config::LockConfig;
use crate::types::{Namespace, RunId};

use super::PipelineError;

/// First pause between attempts on a held lock file.
const BACKOFF_BASE: Duration = Duration::from_millis(200);
/// Longest pause between attempts.
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Information about who holds a namespace lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
    /// Namespace being deployed.
    pub namespace: String,
    /// Run holding the lock.
    pub run: String,
}

impl LockInfo {
    /// Create new lock info for the current process.
    pub fn new(namespace: &Namespace, run: &RunId) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
            namespace: namespace.to_string(),
            run: run.to_string(),
        }
    }

    /// Check if this lock is older than `stale_after`.
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        let age = Utc::now() - self.started_at;
        age.to_std().is_ok_and(|age| age >= stale_after)
    }

    /// Path to the lock file for a namespace.
    pub fn lock_path(state_dir: &Path, namespace: &Namespace) -> PathBuf {
        state_dir.join("locks").join(format!("{}.lock", namespace))
    }
}

/// What is found at a lock path that could not be created.
#[derive(Debug)]
enum Existing {
    Gone,
    Corrupt,
    Held(LockInfo),
}

/// In-process locks, one async mutex per namespace.
#[derive(Debug, Default)]
pub struct NamespaceLocks {
    locks: parking_lot::Mutex<HashMap<Namespace, Arc<Mutex<()>>>>,
}

impl NamespaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, namespace: &Namespace) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(namespace.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// A held namespace lock. The lock file is removed on release or drop.
pub struct NamespaceLock {
    _guard: OwnedMutexGuard<()>,
    path: PathBuf,
    namespace: Namespace,
    released: bool,
}

impl std::fmt::Debug for NamespaceLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceLock")
            .field("namespace", &self.namespace)
            .field("path", &self.path)
            .finish()
    }
}

impl NamespaceLock {
    /// Acquire the lock for `namespace`, waiting up to `config.wait_timeout`.
    ///
    /// The lock file is created atomically (`create_new`), so two processes
    /// cannot both win. Stale locks (older than `config.stale_after`),
    /// unreadable lock files, and any lock when `force` is set are broken
    /// with a warning.
    pub async fn acquire(
        locks: &NamespaceLocks,
        state_dir: &Path,
        namespace: &Namespace,
        run: &RunId,
        config: &LockConfig,
        force: bool,
    ) -> Result<Self, PipelineError> {
        let deadline = Instant::now() + config.wait_timeout;

        let path = LockInfo::lock_path(state_dir, namespace);

        let mutex = locks.get(namespace);
        let guard = match tokio::time::timeout_at(deadline, mutex.lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                // Held by another run in this process; its lock file names it
                let info = match Self::read_existing(&path).await {
                    Existing::Held(info) => info,
                    _ => LockInfo::new(namespace, run),
                };
                return Err(PipelineError::lock_held(
                    namespace.clone(),
                    info.holder,
                    info.pid,
                    info.started_at,
                ));
            }
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                PipelineError::lock_error(format!("failed to create lock directory: {}", e))
            })?;
        }

        let lock_json = serde_json::to_vec(&LockInfo::new(namespace, run))
            .map_err(|e| PipelineError::lock_error(format!("failed to serialize lock: {}", e)))?;

        let mut attempt: u32 = 0;
        loop {
            match Self::try_create(&path, &lock_json).await {
                Ok(()) => {
                    tracing::debug!("Acquired lock {}", path.display());
                    return Ok(Self {
                        _guard: guard,
                        path,
                        namespace: namespace.clone(),
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(PipelineError::lock_error(format!(
                        "failed to create lock file {}: {}",
                        path.display(),
                        e
                    )));
                }
            }

            let existing = Self::read_existing(&path).await;
            if Self::should_break(&existing, config, force) {
                tracing::debug!("Removing stale/forced lock at {}", path.display());
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => {
                        return Err(PipelineError::lock_error(format!(
                            "failed to break lock {}: {}",
                            path.display(),
                            e
                        )));
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(match existing {
                    Existing::Held(info) => PipelineError::lock_held(
                        namespace.clone(),
                        info.holder,
                        info.pid,
                        info.started_at,
                    ),
                    _ => PipelineError::lock_error("lock held by another process"),
                });
            }

            attempt += 1;
            let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
            let delay = BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_MAX);
            tracing::debug!(
                "Namespace {} is locked, retrying in {:?}",
                namespace,
                delay
            );
            tokio::time::sleep(delay.min(deadline - now)).await;
        }
    }

    /// Write the lock to a temp file, then hard-link it into place.
    ///
    /// The link fails with `AlreadyExists` if the lock is held, and readers
    /// never see a partially written lock file.
    async fn try_create(path: &Path, contents: &[u8]) -> std::io::Result<()> {
        let tmp = path.with_extension(format!("lock.{}.tmp", std::process::id()));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(contents).await?;
        file.flush().await?;
        drop(file);

        let linked = tokio::fs::hard_link(&tmp, path).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        linked
    }

    async fn read_existing(path: &Path) -> Existing {
        match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(info) => Existing::Held(info),
                Err(_) => Existing::Corrupt,
            },
            Err(_) => Existing::Gone,
        }
    }

    /// Check if an existing lock should be broken (stale, forced, or corrupted).
    fn should_break(existing: &Existing, config: &LockConfig, force: bool) -> bool {
        match existing {
            Existing::Held(info) if force => {
                tracing::warn!(
                    "Breaking lock held by {} (pid {}) since {}",
                    info.holder,
                    info.pid,
                    info.started_at
                );
                true
            }
            Existing::Held(info) if info.is_stale(config.stale_after) => {
                tracing::warn!(
                    "Auto-breaking stale lock held by {} (pid {}) since {}",
                    info.holder,
                    info.pid,
                    info.started_at
                );
                true
            }
            Existing::Held(_) => false,
            Existing::Corrupt => {
                tracing::warn!("Lock info corrupted, breaking lock");
                true
            }
            // Released between our attempt and the read; retry after a pause
            Existing::Gone => false,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Release the lock, reporting failure to remove the lock file.
    pub async fn release(mut self) -> Result<(), PipelineError> {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::lock_error(format!(
                "failed to remove lock file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

impl Drop for NamespaceLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

// ABOUTME: Backup & Rollback Manager: snapshots target state before destructive steps.
// ABOUTME: Issues BackupTokens as proof and restores snapshots idempotently.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::plan::ExecuteAction;
use crate::transport::shell_quote as q;
use crate::types::{BackupId, RunId, TargetId};

use super::cancel::CancelToken;
use super::executor::{ExecResult, RemoteExecutor};
use super::health::{HealthCheck, HealthResult, HealthVerifier};
use super::remote::{PathKind, Remote, parent_dir};
use super::store::StateStore;
use super::{DeployError, elapsed_ms};

/// Upper bound for copying a snapshot on the target.
const COPY_TIMEOUT: Duration = Duration::from_secs(600);

/// Steps replayed after a restore to bring the previous version back up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreProcedure {
    #[serde(default)]
    pub commands: Vec<ExecuteAction>,
    #[serde(default)]
    pub health_checks: Vec<HealthCheck>,
}

/// Durable pointer to a snapshot of a target's prior state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: BackupId,
    pub run_id: RunId,
    pub target: TargetId,
    pub artifact: String,
    /// Path on the target that was snapshotted.
    pub source_path: String,
    pub backup_path: String,
    /// What existed at `source_path` when the snapshot was taken.
    pub content: PathKind,
    /// SHA-256 of the source file, taken before copying.
    #[serde(default)]
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    /// False until the copy has been checked. Unverified records are untrusted.
    pub verified: bool,
    #[serde(default)]
    pub restore: RestoreProcedure,
}

/// Proof that a verified backup exists for a target path.
///
/// Only [`BackupManager::backup`] can create one. Destructive operations take
/// `&BackupToken`.
#[derive(Debug)]
pub struct BackupToken {
    backup: BackupId,
    target: TargetId,
    path: String,
}

impl BackupToken {
    pub fn backup_id(&self) -> &BackupId {
        &self.backup
    }

    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this backup protects `path` on `target`.
    pub fn covers(&self, target: &TargetId, path: &str) -> bool {
        if &self.target != target {
            return false;
        }
        let base = self.path.trim_end_matches('/');
        let path = path.trim_end_matches('/');
        path == base || path.strip_prefix(base).is_some_and(|rest| rest.starts_with('/'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackStatus {
    Restored,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResult {
    pub backup: BackupId,
    pub target: TargetId,
    pub artifact: String,
    pub status: RollbackStatus,
    #[serde(default)]
    pub commands: Vec<ExecResult>,
    #[serde(default)]
    pub health: Vec<HealthResult>,
    pub detail: String,
    pub duration_ms: u64,
}

impl RollbackResult {
    pub fn restored(&self) -> bool {
        self.status == RollbackStatus::Restored
    }
}

/// One async mutex per target so two stages never back up or restore the
/// same target at once.
#[derive(Default)]
struct TargetLocks {
    inner: Mutex<HashMap<TargetId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TargetLocks {
    fn for_target(&self, target: &TargetId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.inner.lock().entry(target.clone()).or_default())
    }
}

#[derive(Clone)]
pub struct BackupManager {
    store: StateStore,
    locks: Arc<TargetLocks>,
    cancel: CancelToken,
    verifier: HealthVerifier,
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl BackupManager {
    /// `verifier` re-checks health after restores; restores never observe `cancel`.
    pub fn new(store: StateStore, verifier: HealthVerifier, cancel: CancelToken) -> Self {
        Self {
            store,
            locks: Arc::new(TargetLocks::default()),
            cancel,
            verifier,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Snapshot `path` on the target before a destructive step.
    ///
    /// The record is persisted unverified before copying and marked verified
    /// only after the copy checks out. A missing path is recorded as `Absent`;
    /// restoring it removes whatever was deployed there.
    pub async fn backup(
        &self,
        remote: &Remote,
        run_id: &RunId,
        artifact: &str,
        path: &str,
        restore: RestoreProcedure,
    ) -> Result<(BackupRecord, BackupToken), DeployError> {
        if self.cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        let lock = self.locks.for_target(remote.id());
        let _guard = lock.lock().await;

        let id = BackupId::generate();
        let created_at = Utc::now();
        let backup_path = format!(
            "{}/{}/{}-{}",
            remote.target.backups_dir(),
            path_label(artifact),
            created_at.format("%Y%m%dT%H%M%SZ"),
            id.short()
        );

        let content = remote.path_kind(path, DeployError::backup_failed).await?;
        let checksum = match content {
            PathKind::File => Some(remote.sha256(path, DeployError::backup_failed).await?),
            _ => None,
        };

        let mut record = BackupRecord {
            id,
            run_id: run_id.clone(),
            target: remote.id().clone(),
            artifact: artifact.to_string(),
            source_path: path.to_string(),
            backup_path,
            content,
            checksum,
            created_at,
            verified: false,
            restore,
        };
        self.store.save_backup(&record)?;

        if content != PathKind::Absent {
            let copy = format!(
                "mkdir -p {} && cp -a {} {}",
                q(parent_dir(&record.backup_path)),
                q(path),
                q(&record.backup_path)
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(DeployError::Cancelled),
                copied = remote.step(&copy, COPY_TIMEOUT, DeployError::backup_failed) => { copied?; }
            }
            self.verify(remote, &record, DeployError::backup_failed).await?;
        }

        record.verified = true;
        self.store.save_backup(&record)?;
        tracing::info!(
            target_id = %record.target,
            backup = %record.id,
            path,
            content = ?record.content,
            "backup verified"
        );

        let token = BackupToken {
            backup: record.id.clone(),
            target: record.target.clone(),
            path: record.source_path.clone(),
        };
        Ok((record, token))
    }

    /// Check that the snapshot on the target matches the record.
    async fn verify(
        &self,
        remote: &Remote,
        record: &BackupRecord,
        wrap: fn(&TargetId, String) -> DeployError,
    ) -> Result<(), DeployError> {
        if record.content == PathKind::Absent {
            return Ok(());
        }

        let found = remote.path_kind(&record.backup_path, wrap).await?;
        if found != record.content {
            return Err(wrap(
                remote.id(),
                format!(
                    "snapshot {} is {:?}, expected {:?}",
                    record.backup_path, found, record.content
                ),
            ));
        }

        if record.content == PathKind::File {
            let Some(expected) = &record.checksum else {
                return Err(wrap(remote.id(), "no checksum recorded for snapshot".to_string()));
            };
            let actual = remote.sha256(&record.backup_path, wrap).await?;
            if &actual != expected {
                return Err(wrap(
                    remote.id(),
                    format!("snapshot checksum mismatch: {} != {}", actual, expected),
                ));
            }
        }
        Ok(())
    }

    /// Restore a snapshot and bring the previous version back up.
    ///
    /// Never fails outright: the outcome is in the returned result. Safe to
    /// repeat, since the snapshot is copied rather than moved.
    pub async fn rollback(&self, remote: &Remote, record: &BackupRecord) -> RollbackResult {
        let start = Instant::now();
        let lock = self.locks.for_target(remote.id());
        let _guard = lock.lock().await;

        tracing::info!(target_id = %record.target, backup = %record.id, path = %record.source_path, "rolling back");
        let mut result = RollbackResult {
            backup: record.id.clone(),
            target: record.target.clone(),
            artifact: record.artifact.clone(),
            status: RollbackStatus::Failed,
            commands: Vec::new(),
            health: Vec::new(),
            detail: String::new(),
            duration_ms: 0,
        };

        match self.restore(remote, record, &mut result).await {
            Ok(()) => {
                result.status = RollbackStatus::Restored;
                result.detail = format!("restored {} from {}", record.source_path, record.backup_path);
                tracing::info!(target_id = %record.target, backup = %record.id, "rollback complete");
            }
            Err(e) => {
                result.detail = e.to_string();
                tracing::error!(target_id = %record.target, backup = %record.id, error = %e, "rollback failed");
            }
        }

        result.duration_ms = elapsed_ms(start);
        result
    }

    async fn restore(
        &self,
        remote: &Remote,
        record: &BackupRecord,
        result: &mut RollbackResult,
    ) -> Result<(), DeployError> {
        if &record.target != remote.id() {
            return Err(DeployError::rollback_failed(
                remote.id(),
                format!("backup {} belongs to {}", record.id, record.target),
            ));
        }

        self.verify(remote, record, |target, message| {
            DeployError::rollback_failed(target, format!("backup is untrusted: {}", message))
        })
        .await?;

        if !record.verified {
            let mut trusted = record.clone();
            trusted.verified = true;
            self.store.save_backup(&trusted)?;
        }

        let src = &record.source_path;
        let suffix = record.id.short();
        let command = match record.content {
            PathKind::Absent => format!("rm -rf {}", q(src)),
            PathKind::File => {
                let staged = format!("{}.stagehand-restore-{}", src, suffix);
                format!(
                    "mkdir -p {parent} && cp -a {backup} {staged} && mv -f {staged} {src}",
                    parent = q(parent_dir(src)),
                    backup = q(&record.backup_path),
                    staged = q(&staged),
                    src = q(src),
                )
            }
            PathKind::Directory => {
                let staged = format!("{}.stagehand-restore-{}", src, suffix);
                let old = format!("{}.stagehand-old-{}", src, suffix);
                format!(
                    "rm -rf {staged} {old} && mkdir -p {parent} && cp -a {backup} {staged} \
                     && if [ -e {src} ]; then mv {src} {old}; fi && mv {staged} {src} && rm -rf {old}",
                    staged = q(&staged),
                    old = q(&old),
                    parent = q(parent_dir(src)),
                    backup = q(&record.backup_path),
                    src = q(src),
                )
            }
        };
        remote
            .step(&command, COPY_TIMEOUT, DeployError::rollback_failed)
            .await?;

        // Restores run to completion even after an operator interrupt.
        let executor = RemoteExecutor::new(CancelToken::new());
        for action in &record.restore.commands {
            let exec = executor
                .execute(remote, &action.command, action.timeout)
                .await?;
            result.commands.push(exec.clone());
            exec.require_success(remote)?;
        }

        let verifier = self.verifier.with_cancel(CancelToken::new());
        for check in &record.restore.health_checks {
            let health = verifier.wait_for_healthy(check).await;
            let healthy = health.healthy;
            let detail = health.failure_detail();
            let attempts = health.attempts;
            result.health.push(health);
            if !healthy {
                return Err(DeployError::Unhealthy {
                    target: remote.id().clone(),
                    url: check.url.clone(),
                    attempts,
                    detail,
                });
            }
        }

        Ok(())
    }

    /// Drop snapshots from older runs once `run_id` has deployed successfully.
    pub async fn supersede(
        &self,
        remote: Option<&Remote>,
        run_id: &RunId,
        target: &TargetId,
        artifact: &str,
    ) -> Result<usize, DeployError> {
        let lock = self.locks.for_target(target);
        let _guard = lock.lock().await;

        let stale: Vec<_> = self
            .store
            .backups_for(target)?
            .into_iter()
            .filter(|r| r.artifact == artifact && &r.run_id != run_id)
            .collect();
        for record in &stale {
            self.discard(remote, record).await?;
        }
        Ok(stale.len())
    }

    /// Keep the newest `keep` snapshots for a target, delete the rest.
    pub async fn prune(
        &self,
        remote: Option<&Remote>,
        target: &TargetId,
        keep: usize,
    ) -> Result<Vec<BackupRecord>, DeployError> {
        let lock = self.locks.for_target(target);
        let _guard = lock.lock().await;

        let records = self.store.backups_for(target)?;
        let excess = records.len().saturating_sub(keep);
        let removed: Vec<_> = records.into_iter().take(excess).collect();
        for record in &removed {
            self.discard(remote, record).await?;
        }
        Ok(removed)
    }

    async fn discard(&self, remote: Option<&Remote>, record: &BackupRecord) -> Result<(), DeployError> {
        if let Some(remote) = remote
            && record.content != PathKind::Absent
        {
            remote
                .step_quietly(&format!("rm -rf {}", q(&record.backup_path)))
                .await;
        }
        tracing::debug!(target_id = %record.target, backup = %record.id, "discarding backup");
        self.store.delete_backup(&record.id)
    }
}

/// Artifact name as a single safe path component.
fn path_label(name: &str) -> String {
    let label: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    match label.trim_start_matches('.') {
        "" => "artifact".to_string(),
        trimmed => trimmed.to_string(),
    }
}

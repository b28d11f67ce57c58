// ABOUTME: Deploy lock to prevent concurrent runs against the same target.
// ABOUTME: Uses atomic noclobber file creation under the target's remote state dir.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transport::shell_quote as q;
use crate::types::{RunId, TargetId};

use super::error::TransportResultExt;
use super::remote::{HOUSEKEEPING_TIMEOUT, Remote};
use super::DeployError;

/// Information about who holds a deploy lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
    pub target: TargetId,
    pub run_id: RunId,
}

impl LockInfo {
    pub fn new(target: &TargetId, run_id: &RunId) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
            target: target.clone(),
            run_id: run_id.clone(),
        }
    }

    /// Check if this lock is stale (older than 1 hour).
    pub fn is_stale(&self) -> bool {
        let age = Utc::now() - self.started_at;
        age.num_hours() >= 1
    }
}

/// A held deploy lock. Call [`DeployLock::release`] when the run ends.
pub struct DeployLock {
    remote: Remote,
    path: String,
}

impl std::fmt::Debug for DeployLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployLock")
            .field("target", self.remote.id())
            .field("path", &self.path)
            .finish()
    }
}

impl DeployLock {
    /// Path to the lock file for a target.
    pub fn lock_path(remote: &Remote) -> String {
        format!("{}/{}.lock", remote.target.locks_dir(), remote.id().file_stem())
    }

    /// Acquire the deploy lock for a target.
    ///
    /// Uses shell noclobber mode for atomic acquisition (no TOCTOU race).
    /// Stale locks (>1 hour) are broken with a warning; `force` breaks any lock.
    pub async fn acquire(remote: &Remote, run_id: &RunId, force: bool) -> Result<Self, DeployError> {
        let path = Self::lock_path(remote);
        let target = remote.id();

        remote
            .step(
                &format!("mkdir -p {}", q(&remote.target.locks_dir())),
                HOUSEKEEPING_TIMEOUT,
                DeployError::lock_error,
            )
            .await?;

        let info = LockInfo::new(target, run_id);
        let json = serde_json::to_string(&info)
            .map_err(|e| DeployError::lock_error(target, format!("failed to serialize lock: {}", e)))?;
        // set -C makes > fail if the file already exists
        let acquire_cmd = format!("(set -C; echo {} > {}) 2>/dev/null", q(&json), q(&path));

        if Self::try_create(remote, &acquire_cmd).await? {
            return Ok(Self::held(remote, path));
        }

        match Self::read_existing(remote, &path).await? {
            Some(existing) if !force && !existing.is_stale() => {
                return Err(DeployError::lock_held(
                    target,
                    existing.holder,
                    existing.pid,
                    existing.started_at,
                ));
            }
            Some(existing) => {
                tracing::warn!(
                    target_id = %target,
                    "Breaking {} lock held by {} (pid {}) since {}",
                    if force { "forced" } else { "stale" },
                    existing.holder,
                    existing.pid,
                    existing.started_at
                );
            }
            None => tracing::warn!(target_id = %target, "Lock info unreadable, breaking lock"),
        }

        remote.step_quietly(&format!("rm -f {}", q(&path))).await;

        if !Self::try_create(remote, &acquire_cmd).await? {
            return Err(DeployError::lock_error(
                target,
                "lock acquired by another process during break",
            ));
        }
        Ok(Self::held(remote, path))
    }

    fn held(remote: &Remote, path: String) -> Self {
        tracing::debug!(target_id = %remote.id(), path = %path, "deploy lock acquired");
        Self {
            remote: remote.clone(),
            path,
        }
    }

    async fn try_create(remote: &Remote, acquire_cmd: &str) -> Result<bool, DeployError> {
        let output = remote
            .transport
            .exec(acquire_cmd, HOUSEKEEPING_TIMEOUT)
            .await
            .context_lock(remote.id())?;
        Ok(output.success())
    }

    /// Current lock contents, or `None` if missing or corrupted.
    async fn read_existing(remote: &Remote, path: &str) -> Result<Option<LockInfo>, DeployError> {
        let output = remote
            .transport
            .exec(&format!("cat {}", q(path)), HOUSEKEEPING_TIMEOUT)
            .await
            .context_lock(remote.id())?;
        if !output.success() {
            return Ok(None);
        }
        Ok(serde_json::from_str(output.stdout.trim()).ok())
    }

    pub fn target(&self) -> &TargetId {
        self.remote.id()
    }

    /// Release the lock.
    pub async fn release(self) -> Result<(), DeployError> {
        self.remote
            .step(
                &format!("rm -f {}", q(&self.path)),
                HOUSEKEEPING_TIMEOUT,
                DeployError::lock_error,
            )
            .await?;
        Ok(())
    }
}

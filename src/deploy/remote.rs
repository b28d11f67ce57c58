// ABOUTME: A resolved target paired with its open transport.
// ABOUTME: Runs internal housekeeping commands with target-attributed errors.

use std::sync::Arc;
use std::time::Duration;

use crate::transport::Transport;
use crate::types::TargetId;

use super::DeployError;
use super::error::with_context;
use super::resolver::Target;

/// Timeout for bookkeeping commands (mkdir, test, sha256sum, mv).
pub(crate) const HOUSEKEEPING_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Remote {
    pub target: Target,
    pub transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("target", &self.target.id)
            .field("endpoint", &self.transport.endpoint())
            .finish()
    }
}

impl Remote {
    pub fn new(target: Target, transport: Arc<dyn Transport>) -> Self {
        Self { target, transport }
    }

    pub fn id(&self) -> &TargetId {
        &self.target.id
    }

    /// Run a bookkeeping command, treating a non-zero exit as failure.
    ///
    /// `wrap` picks the error variant so failures land in the right category.
    pub(crate) async fn step(
        &self,
        command: &str,
        timeout: Duration,
        wrap: fn(&TargetId, String) -> DeployError,
    ) -> Result<String, DeployError> {
        tracing::debug!(target_id = %self.target.id, command, "remote step");
        let output = with_context(self.transport.exec(command, timeout).await, self.id(), wrap)?;
        if !output.success() {
            let stderr = output.stderr.trim();
            return Err(wrap(
                self.id(),
                format!("`{}` exited with status {}: {}", command, output.exit_code, stderr),
            ));
        }
        Ok(output.stdout)
    }

    /// Run a bookkeeping command whose failure is only worth a log line.
    pub(crate) async fn step_quietly(&self, command: &str) {
        match self.transport.exec(command, HOUSEKEEPING_TIMEOUT).await {
            Ok(output) if output.success() => {}
            Ok(output) => {
                tracing::debug!(target_id = %self.target.id, command, stderr = %output.stderr.trim(), "cleanup step failed")
            }
            Err(e) => tracing::debug!(target_id = %self.target.id, command, error = %e, "cleanup step failed"),
        }
    }

    /// SHA-256 of a file on the target, via `sha256sum`.
    pub(crate) async fn sha256(
        &self,
        path: &str,
        wrap: fn(&TargetId, String) -> DeployError,
    ) -> Result<String, DeployError> {
        let command = format!("sha256sum {}", crate::transport::shell_quote(path));
        let stdout = self.step(&command, HOUSEKEEPING_TIMEOUT, wrap).await?;
        stdout
            .split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| wrap(self.id(), format!("sha256sum printed nothing for {}", path)))
    }

    /// Whether `path` exists and what it is.
    pub(crate) async fn path_kind(
        &self,
        path: &str,
        wrap: fn(&TargetId, String) -> DeployError,
    ) -> Result<PathKind, DeployError> {
        let p = crate::transport::shell_quote(path);
        let command = format!(
            "if [ -d {p} ]; then echo dir; elif [ -e {p} ]; then echo file; else echo absent; fi"
        );
        let stdout = self.step(&command, HOUSEKEEPING_TIMEOUT, wrap).await?;
        match stdout.trim() {
            "dir" => Ok(PathKind::Directory),
            "file" => Ok(PathKind::File),
            "absent" => Ok(PathKind::Absent),
            other => Err(wrap(self.id(), format!("unexpected path probe output: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    File,
    Directory,
    Absent,
}

/// Parent directory of a remote absolute path.
pub(crate) fn parent_dir(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

// ABOUTME: Runs service commands on targets with a mandatory timeout.
// ABOUTME: Destructive commands need proof of a verified backup.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::transport::TransportErrorKind;

use super::backup::BackupToken;
use super::cancel::CancelToken;
use super::remote::Remote;
use super::{DeployError, elapsed_ms};

/// Outcome of one command. A non-zero exit is data, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub command: String,
    pub exit_code: u32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert a non-zero exit into `ExecutionFailed` for `remote`.
    pub fn require_success(self, remote: &Remote) -> Result<Self, DeployError> {
        if self.success() {
            return Ok(self);
        }
        Err(DeployError::ExecutionFailed {
            target: remote.id().clone(),
            command: self.command,
            exit_code: self.exit_code,
            stderr: self.stderr,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RemoteExecutor {
    cancel: CancelToken,
}

impl RemoteExecutor {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    /// Run a non-destructive command.
    pub async fn execute(
        &self,
        remote: &Remote,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecResult, DeployError> {
        self.run(remote, command, timeout).await
    }

    /// Run a command that stops or replaces a running service.
    ///
    /// `token` must come from a verified backup on the same target.
    pub async fn execute_destructive(
        &self,
        remote: &Remote,
        command: &str,
        timeout: Duration,
        token: &BackupToken,
    ) -> Result<ExecResult, DeployError> {
        if token.target() != remote.id() {
            return Err(DeployError::BackupRequired {
                target: remote.id().clone(),
                command: command.to_string(),
            });
        }
        tracing::debug!(target_id = %remote.id(), backup = %token.backup_id(), "destructive command authorized");
        self.run(remote, command, timeout).await
    }

    async fn run(
        &self,
        remote: &Remote,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecResult, DeployError> {
        if self.cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        tracing::info!(target_id = %remote.id(), command, "executing");
        let start = Instant::now();
        let output = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DeployError::Cancelled),
            output = remote.transport.exec(command, timeout) => output,
        };

        let output = output.map_err(|source| match source.kind() {
            TransportErrorKind::Timeout => DeployError::ExecutionTimeout {
                target: remote.id().clone(),
                command: command.to_string(),
                timeout,
            },
            _ => DeployError::Connection {
                target: remote.id().clone(),
                source,
            },
        })?;

        let result = ExecResult {
            command: command.to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: elapsed_ms(start),
        };
        if !result.success() {
            tracing::warn!(target_id = %remote.id(), command, exit_code = result.exit_code, "command failed");
        }
        Ok(result)
    }
}

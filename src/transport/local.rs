// ABOUTME: Transport for targets that live on the orchestrator host.
// ABOUTME: Runs commands through `sh -c` and writes files directly.

use async_trait::async_trait;
use snafu::ResultExt;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::error::{LocalSnafu, TransportError};
use super::{CommandOutput, Transport};

#[derive(Debug, Default, Clone)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn endpoint(&self) -> &str {
        "local"
    }

    async fn exec(&self, command: &str, timeout: Duration) -> Result<CommandOutput, TransportError> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(LocalSnafu { action: "spawn" })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.context(LocalSnafu { action: "wait" })?,
            Err(_) => {
                return Err(TransportError::Timeout {
                    endpoint: self.endpoint().to_string(),
                    timeout,
                });
            }
        };

        // Terminated by a signal.
        let exit_code = output.status.code().map(|c| c as u32).unwrap_or(255);

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn upload(
        &self,
        data: &[u8],
        remote_path: &str,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        match tokio::time::timeout(timeout, tokio::fs::write(remote_path, data)).await {
            Ok(result) => result.context(LocalSnafu { action: "write" }),
            Err(_) => Err(TransportError::Timeout {
                endpoint: self.endpoint().to_string(),
                timeout,
            }),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exec_captures_output_and_exit_code() {
        let t = LocalTransport::new();
        let out = t
            .exec("echo hello; echo oops >&2; exit 3", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn exec_times_out() {
        let t = LocalTransport::new();
        let err = t
            .exec("sleep 5", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn upload_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.bin");
        let t = LocalTransport::new();
        t.upload(b"payload", path.to_str().unwrap(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
    }
}

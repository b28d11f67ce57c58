// ABOUTME: Transport backed by an SSH session.
// ABOUTME: Uploads stream file contents into `cat` on the remote side.

use async_trait::async_trait;
use std::time::Duration;

use super::error::TransportError;
use super::{CommandOutput, Transport, shell_quote};
use crate::ssh::{Error as SshError, Session, SessionConfig};

#[derive(Debug)]
pub struct SshTransport {
    session: Session,
    endpoint: String,
}

impl SshTransport {
    pub async fn connect(config: SessionConfig) -> Result<Self, TransportError> {
        let endpoint = config.endpoint();
        let session = Session::connect(config)
            .await
            .map_err(|source| TransportError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;
        Ok(Self { session, endpoint })
    }

    fn remote_error(&self, source: SshError) -> TransportError {
        match source {
            SshError::CommandTimeout(timeout) => TransportError::Timeout {
                endpoint: self.endpoint.clone(),
                timeout,
            },
            source => TransportError::Remote {
                endpoint: self.endpoint.clone(),
                source,
            },
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn exec(&self, command: &str, timeout: Duration) -> Result<CommandOutput, TransportError> {
        self.session
            .exec(command, timeout)
            .await
            .map_err(|e| self.remote_error(e))
    }

    async fn upload(
        &self,
        data: &[u8],
        remote_path: &str,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let command = format!("cat > {}", shell_quote(remote_path));
        let output = self
            .session
            .exec_with_input(&command, data, timeout)
            .await
            .map_err(|e| self.remote_error(e))?;

        if !output.success() {
            return Err(TransportError::Upload {
                endpoint: self.endpoint.clone(),
                path: remote_path.to_string(),
                message: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.session
            .disconnect()
            .await
            .map_err(|e| self.remote_error(e))
    }
}

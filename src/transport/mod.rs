// ABOUTME: Transport abstraction for reaching deployment targets.
// ABOUTME: SSH for remote hosts, a local shell for the orchestrator host itself.

mod error;
mod local;
mod pool;
mod ssh;

pub use error::{TransportError, TransportErrorKind};
pub use local::LocalTransport;
pub use pool::{Connector, DefaultConnector, TransportPool};
pub use ssh::SshTransport;

pub use crate::ssh::CommandOutput;

use async_trait::async_trait;
use std::time::Duration;

/// Command execution and file delivery on one host.
///
/// Commands run under a POSIX shell on the target. A non-zero exit status is
/// reported in [`CommandOutput`], not as an error.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable endpoint, e.g. `deploy@web1:22` or `local`.
    fn endpoint(&self) -> &str;

    async fn exec(&self, command: &str, timeout: Duration) -> Result<CommandOutput, TransportError>;

    /// Write `data` to `remote_path`, replacing any existing file.
    /// The parent directory must exist.
    async fn upload(
        &self,
        data: &[u8],
        remote_path: &str,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Quote a value for a POSIX shell.
///
/// A leading `$HOME/` is left outside the quotes so the remote shell expands it.
pub fn shell_quote(value: &str) -> String {
    if let Some(rest) = value.strip_prefix("$HOME/") {
        return format!("\"$HOME\"/{}", shell_quote(rest));
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

// ABOUTME: Transport error types with SNAFU pattern.
// ABOUTME: Separates connection, timeout and I/O failures for programmatic handling.

use snafu::Snafu;
use std::time::Duration;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("failed to connect to {endpoint}: {source}"))]
    Connect {
        endpoint: String,
        source: crate::ssh::Error,
    },

    #[snafu(display("command on {endpoint} timed out after {timeout:?}"))]
    Timeout { endpoint: String, timeout: Duration },

    #[snafu(display("remote call on {endpoint} failed: {source}"))]
    Remote {
        endpoint: String,
        source: crate::ssh::Error,
    },

    #[snafu(display("local {action} failed: {source}"))]
    Local {
        action: &'static str,
        source: std::io::Error,
    },

    #[snafu(display("upload to {endpoint}:{path} failed: {message}"))]
    Upload {
        endpoint: String,
        path: String,
        message: String,
    },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Host unreachable or authentication failed.
    Connection,
    /// Command or upload exceeded its deadline.
    Timeout,
    /// Channel, process or file failure after connecting.
    Io,
}

impl TransportError {
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            TransportError::Connect { .. } => TransportErrorKind::Connection,
            TransportError::Timeout { .. } => TransportErrorKind::Timeout,
            TransportError::Remote {
                source: crate::ssh::Error::CommandTimeout(_),
                ..
            } => TransportErrorKind::Timeout,
            TransportError::Remote { .. }
            | TransportError::Local { .. }
            | TransportError::Upload { .. } => TransportErrorKind::Io,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == TransportErrorKind::Timeout
    }
}

// ABOUTME: Error types for deployment operations.
// ABOUTME: Every stage-local error carries the target it happened on.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::transport::{TransportError, TransportErrorKind};
use crate::types::{EnvironmentName, ServiceId, TargetId};

/// Holder of a deploy lock, shown when acquisition is refused.
#[derive(Debug, Clone)]
pub struct LockHolderInfo {
    pub holder: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("unknown environment: {0}")]
    UnknownEnvironment(EnvironmentName),

    #[error("service '{service}' is not declared in environment '{environment}'")]
    UnknownService {
        environment: EnvironmentName,
        service: ServiceId,
    },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("invalid target {target}: {message}")]
    InvalidTarget { target: TargetId, message: String },

    #[error("transfer to {target} failed: {message}")]
    Transfer { target: TargetId, message: String },

    #[error("command on {target} timed out after {}: {command}", humantime_duration(.timeout))]
    ExecutionTimeout {
        target: TargetId,
        command: String,
        timeout: Duration,
    },

    #[error("command on {target} exited with status {exit_code}: {command}{}", stderr_suffix(.stderr))]
    ExecutionFailed {
        target: TargetId,
        command: String,
        exit_code: u32,
        stderr: String,
    },

    #[error("destructive command on {target} refused without a verified backup: {command}")]
    BackupRequired { target: TargetId, command: String },

    #[error("{target} unhealthy after {attempts} attempt(s) at {url}: {detail}")]
    Unhealthy {
        target: TargetId,
        url: String,
        attempts: u32,
        detail: String,
    },

    #[error("backup on {target} failed: {message}")]
    BackupFailed { target: TargetId, message: String },

    #[error("backup not found: {0}")]
    BackupNotFound(String),

    #[error("rollback on {target} failed: {message}")]
    RollbackFailed { target: TargetId, message: String },

    #[error(
        "deploy lock for {target} held by {} (pid {}) since {}",
        .holder.holder, .holder.pid, .holder.started_at
    )]
    LockHeld {
        target: TargetId,
        holder: Box<LockHolderInfo>,
    },

    #[error("lock error on {target}: {message}")]
    Lock { target: TargetId, message: String },

    #[error("connection to {target} failed: {source}")]
    Connection {
        target: TargetId,
        #[source]
        source: TransportError,
    },

    #[error("http client setup failed: {0}")]
    HttpClient(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("state storage error: {0}")]
    Storage(String),
}

fn humantime_duration(d: &Duration) -> String {
    humantime_serde::re::humantime::format_duration(*d).to_string()
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(" ({})", trimmed.lines().last().unwrap_or(trimmed))
    }
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployErrorKind {
    UnknownEnvironment,
    UnknownService,
    InvalidPlan,
    Transfer,
    ExecutionTimeout,
    ExecutionFailed,
    Unhealthy,
    BackupFailed,
    BackupNotFound,
    RollbackFailed,
    LockHeld,
    Lock,
    Connection,
    HttpClient,
    Cancelled,
    Storage,
}

impl DeployError {
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DeployError::UnknownEnvironment(_) => DeployErrorKind::UnknownEnvironment,
            DeployError::UnknownService { .. } => DeployErrorKind::UnknownService,
            DeployError::InvalidPlan(_) | DeployError::InvalidTarget { .. } => {
                DeployErrorKind::InvalidPlan
            }
            DeployError::Transfer { .. } => DeployErrorKind::Transfer,
            DeployError::ExecutionTimeout { .. } => DeployErrorKind::ExecutionTimeout,
            DeployError::ExecutionFailed { .. } => DeployErrorKind::ExecutionFailed,
            DeployError::Unhealthy { .. } => DeployErrorKind::Unhealthy,
            DeployError::BackupFailed { .. } | DeployError::BackupRequired { .. } => {
                DeployErrorKind::BackupFailed
            }
            DeployError::BackupNotFound(_) => DeployErrorKind::BackupNotFound,
            DeployError::RollbackFailed { .. } => DeployErrorKind::RollbackFailed,
            DeployError::LockHeld { .. } => DeployErrorKind::LockHeld,
            DeployError::Lock { .. } => DeployErrorKind::Lock,
            DeployError::Connection { .. } => DeployErrorKind::Connection,
            DeployError::HttpClient(_) => DeployErrorKind::HttpClient,
            DeployError::Cancelled => DeployErrorKind::Cancelled,
            DeployError::Storage(_) => DeployErrorKind::Storage,
        }
    }

    /// Input errors abort before any side effect.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self.kind(),
            DeployErrorKind::UnknownEnvironment
                | DeployErrorKind::UnknownService
                | DeployErrorKind::InvalidPlan
        )
    }

    pub fn invalid_plan(message: impl Into<String>) -> Self {
        DeployError::InvalidPlan(message.into())
    }

    pub fn transfer(target: &TargetId, message: impl Into<String>) -> Self {
        DeployError::Transfer {
            target: target.clone(),
            message: message.into(),
        }
    }

    pub fn backup_failed(target: &TargetId, message: impl Into<String>) -> Self {
        DeployError::BackupFailed {
            target: target.clone(),
            message: message.into(),
        }
    }

    pub fn rollback_failed(target: &TargetId, message: impl Into<String>) -> Self {
        DeployError::RollbackFailed {
            target: target.clone(),
            message: message.into(),
        }
    }

    pub fn lock_error(target: &TargetId, message: impl Into<String>) -> Self {
        DeployError::Lock {
            target: target.clone(),
            message: message.into(),
        }
    }

    pub fn lock_held(target: &TargetId, holder: String, pid: u32, started_at: DateTime<Utc>) -> Self {
        DeployError::LockHeld {
            target: target.clone(),
            holder: Box::new(LockHolderInfo {
                holder,
                pid,
                started_at,
            }),
        }
    }

    /// Holder details when this is a `LockHeld` error.
    pub fn lock_holder_info(&self) -> Option<&LockHolderInfo> {
        match self {
            DeployError::LockHeld { holder, .. } => Some(holder),
            _ => None,
        }
    }

    pub fn storage(message: impl std::fmt::Display) -> Self {
        DeployError::Storage(message.to_string())
    }
}

/// Extension trait attaching target context to transport results.
pub trait TransportResultExt<T> {
    fn context_connection(self, target: &TargetId) -> Result<T, DeployError>;
    fn context_transfer(self, target: &TargetId) -> Result<T, DeployError>;
    fn context_backup(self, target: &TargetId) -> Result<T, DeployError>;
    fn context_rollback(self, target: &TargetId) -> Result<T, DeployError>;
    fn context_lock(self, target: &TargetId) -> Result<T, DeployError>;
}

pub(crate) fn with_context<T>(
    result: Result<T, TransportError>,
    target: &TargetId,
    wrap: fn(&TargetId, String) -> DeployError,
) -> Result<T, DeployError> {
    result.map_err(|source| match source.kind() {
        TransportErrorKind::Connection => DeployError::Connection {
            target: target.clone(),
            source,
        },
        _ => wrap(target, source.to_string()),
    })
}

impl<T> TransportResultExt<T> for Result<T, TransportError> {
    fn context_connection(self, target: &TargetId) -> Result<T, DeployError> {
        self.map_err(|source| DeployError::Connection {
            target: target.clone(),
            source,
        })
    }

    fn context_transfer(self, target: &TargetId) -> Result<T, DeployError> {
        with_context(self, target, |t, m| DeployError::transfer(t, m))
    }

    fn context_backup(self, target: &TargetId) -> Result<T, DeployError> {
        with_context(self, target, |t, m| DeployError::backup_failed(t, m))
    }

    fn context_rollback(self, target: &TargetId) -> Result<T, DeployError> {
        with_context(self, target, |t, m| DeployError::rollback_failed(t, m))
    }

    fn context_lock(self, target: &TargetId) -> Result<T, DeployError> {
        with_context(self, target, |t, m| DeployError::lock_error(t, m))
    }
}

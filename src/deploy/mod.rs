// ABOUTME: Deployment orchestration: resolve, transfer, execute, verify, back up, roll back.
// ABOUTME: The sequencer ties the components together; the run uses the type state pattern.

mod backup;
mod cancel;
mod error;
mod executor;
mod health;
mod lock;
mod remote;
mod report;
mod resolver;
mod run;
mod sequencer;
mod state;
mod store;
mod transfer;

use std::time::Instant;

pub use backup::{
    BackupManager, BackupRecord, BackupToken, RestoreProcedure, RollbackResult, RollbackStatus,
};
pub use cancel::CancelToken;
pub use error::{DeployError, DeployErrorKind, LockHolderInfo, TransportResultExt};
pub use executor::{ExecResult, RemoteExecutor};
pub use health::{HealthCheck, HealthResult, HealthVerifier, HttpProbe, Probe, ProbeResponse};
pub use lock::{DeployLock, LockInfo};
pub use remote::{PathKind, Remote};
pub use report::{
    AbortReason, DeploymentReport, OverallStatus, RunState, StageOutcome, StageResult, StageStatus,
    overall_status,
};
pub use resolver::{Target, TargetResolver};
pub use run::Run;
pub use sequencer::{NoProgress, Progress, Sequencer, SequencerOptions};
pub use state::{Aborted, Completed, InProgress, InvalidTransition, NotStarted, StageState};
pub use store::StateStore;
pub use transfer::{ArtifactTransfer, Overwrite, TransferResult};

/// Milliseconds since `start`, saturating at `u64::MAX`.
pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

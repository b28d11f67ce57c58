// ABOUTME: Run state markers for the type state pattern, plus the per-stage state machine.
// ABOUTME: Run markers are checked at compile time; stage states at runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::report::{AbortReason, StageStatus};

/// Run created, nothing executed yet.
/// Available actions: `start()`
#[derive(Debug, Clone, Copy, Default)]
pub struct NotStarted;

/// Stages are executing. The only state that accepts results.
/// Available actions: `record()`, `complete()`, `abort()`
#[derive(Debug, Clone)]
pub struct InProgress {
    pub(crate) started_at: DateTime<Utc>,
}

/// Every stage ran; no critical failure.
/// Available actions: `into_report()`
#[derive(Debug, Clone)]
pub struct Completed {
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) finished_at: DateTime<Utc>,
}

/// Stopped early by a critical failure or an operator interrupt.
/// Available actions: `into_report()`
#[derive(Debug, Clone)]
pub struct Aborted {
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) finished_at: DateTime<Utc>,
    pub(crate) reason: AbortReason,
}

impl Aborted {
    pub fn reason(&self) -> &AbortReason {
        &self.reason
    }
}

/// Lifecycle of one stage: `Pending -> Running -> {Succeeded, Failed, Warned}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Warned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid stage transition: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: StageState,
    pub to: StageState,
}

impl StageState {
    pub fn start(self) -> Result<Self, InvalidTransition> {
        match self {
            StageState::Pending => Ok(StageState::Running),
            from => Err(InvalidTransition {
                from,
                to: StageState::Running,
            }),
        }
    }

    pub fn finish(self, outcome: StageStatus) -> Result<Self, InvalidTransition> {
        let to = match outcome {
            StageStatus::Succeeded => StageState::Succeeded,
            StageStatus::Failed => StageState::Failed,
            StageStatus::Warned => StageState::Warned,
        };
        match self {
            StageState::Running => Ok(to),
            from => Err(InvalidTransition { from, to }),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StageState::Succeeded | StageState::Failed | StageState::Warned
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let state = StageState::Pending.start().unwrap();
        assert_eq!(state, StageState::Running);
        let done = state.finish(StageStatus::Warned).unwrap();
        assert_eq!(done, StageState::Warned);
        assert!(done.is_terminal());
    }

    #[test]
    fn terminal_states_cannot_restart() {
        let err = StageState::Succeeded.start().unwrap_err();
        assert_eq!(err.from, StageState::Succeeded);
        assert!(StageState::Failed.finish(StageStatus::Succeeded).is_err());
    }

    #[test]
    fn pending_cannot_finish() {
        assert!(StageState::Pending.finish(StageStatus::Succeeded).is_err());
        assert!(!StageState::Pending.is_terminal());
    }
}

// ABOUTME: Report Generator: aggregates stage results into a DeploymentReport.
// ABOUTME: Derives the overall status and the process exit code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::plan::DeploymentPlan;
use crate::types::{BackupId, EnvironmentName, RunId, TargetId};

use super::backup::RollbackResult;
use super::executor::ExecResult;
use super::health::HealthResult;
use super::state::StageState;
use super::transfer::TransferResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Succeeded,
    Failed,
    Warned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    PartialSuccess,
    Failure,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverallStatus::Success => "success",
            OverallStatus::PartialSuccess => "partial success",
            OverallStatus::Failure => "failure",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    CriticalFailure { stage: String },
    OperatorInterrupt,
    Error { message: String },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::CriticalFailure { stage } => {
                write!(f, "critical stage '{}' failed", stage)
            }
            AbortReason::OperatorInterrupt => f.write_str("interrupted by operator"),
            AbortReason::Error { message } => f.write_str(message),
        }
    }
}

/// Outcome of one stage on one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub target: TargetId,
    pub status: StageStatus,
    pub duration_ms: u64,
    pub detail: String,
    /// Kind of the error that ended the stage on this target, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub transfers: Vec<TransferResult>,
    #[serde(default)]
    pub executions: Vec<ExecResult>,
    #[serde(default)]
    pub health: Vec<HealthResult>,
    #[serde(default)]
    pub backups: Vec<BackupId>,
}

impl StageResult {
    pub fn new(stage: impl Into<String>, target: TargetId, status: StageStatus) -> Self {
        Self {
            stage: stage.into(),
            target,
            status,
            duration_ms: 0,
            detail: String::new(),
            error_kind: None,
            transfers: Vec::new(),
            executions: Vec::new(),
            health: Vec::new(),
            backups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub name: String,
    pub state: StageState,
    /// Targets never attempted because the stage stopped early.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_targets: Vec<TargetId>,
}

/// Persisted summary of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub run_id: RunId,
    pub environment: EnvironmentName,
    pub plan: DeploymentPlan,
    pub stages: Vec<StageOutcome>,
    pub results: Vec<StageResult>,
    #[serde(default)]
    pub rollbacks: Vec<RollbackResult>,
    #[serde(default)]
    pub skipped_stages: Vec<String>,
    #[serde(default)]
    pub alerts: Vec<String>,
    pub run_state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
    pub overall_status: OverallStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DeploymentReport {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn generate(
        run_id: RunId,
        plan: DeploymentPlan,
        stages: Vec<StageOutcome>,
        results: Vec<StageResult>,
        rollbacks: Vec<RollbackResult>,
        skipped_stages: Vec<String>,
        alerts: Vec<String>,
        run_state: RunState,
        abort_reason: Option<AbortReason>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let overall_status = overall_status(&results, &rollbacks, &alerts, abort_reason.as_ref());
        DeploymentReport {
            run_id,
            environment: plan.environment.clone(),
            plan,
            stages,
            results,
            rollbacks,
            skipped_stages,
            alerts,
            run_state,
            abort_reason,
            overall_status,
            started_at,
            finished_at,
        }
    }

    /// 0 on success or partial success, 2 on operator interrupt, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.abort_reason == Some(AbortReason::OperatorInterrupt) {
            return 2;
        }
        match self.overall_status {
            OverallStatus::Success | OverallStatus::PartialSuccess => 0,
            OverallStatus::Failure => 1,
        }
    }

    pub fn stage_state(&self, name: &str) -> Option<StageState> {
        self.stages.iter().find(|s| s.name == name).map(|s| s.state)
    }

    pub fn skipped_targets(&self, stage: &str) -> &[TargetId] {
        self.stages
            .iter()
            .find(|s| s.name == stage)
            .map(|s| s.skipped_targets.as_slice())
            .unwrap_or_default()
    }

    pub fn results_with(&self, status: StageStatus) -> impl Iterator<Item = &StageResult> {
        self.results.iter().filter(move |r| r.status == status)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Success only if every result succeeded and the run completed.
///
/// Warned results from best-effort stages downgrade to `PartialSuccess`. A
/// run aborted by a critical failure is also `PartialSuccess` when at least
/// one result warned and every backup taken by the run was restored. Any
/// other failed result, abort, failed rollback or alert is a `Failure`.
pub fn overall_status(
    results: &[StageResult],
    rollbacks: &[RollbackResult],
    alerts: &[String],
    abort_reason: Option<&AbortReason>,
) -> OverallStatus {
    let rollback_failed = rollbacks.iter().any(|r| !r.restored());
    if rollback_failed || !alerts.is_empty() {
        return OverallStatus::Failure;
    }
    let warned = results.iter().any(|r| r.status == StageStatus::Warned);
    let failed = results.iter().any(|r| r.status == StageStatus::Failed);
    match abort_reason {
        None if failed => OverallStatus::Failure,
        None if warned => OverallStatus::PartialSuccess,
        None => OverallStatus::Success,
        Some(AbortReason::CriticalFailure { .. }) if warned && all_restored(results, rollbacks) => {
            OverallStatus::PartialSuccess
        }
        Some(_) => OverallStatus::Failure,
    }
}

/// Every backup recorded by a result has a restored rollback.
fn all_restored(results: &[StageResult], rollbacks: &[RollbackResult]) -> bool {
    results
        .iter()
        .flat_map(|r| r.backups.iter())
        .all(|id| rollbacks.iter().any(|rb| &rb.backup == id && rb.restored()))
}

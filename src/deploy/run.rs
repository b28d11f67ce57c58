// ABOUTME: A deployment run parameterized by its lifecycle state.
// ABOUTME: Only an in-progress run accepts results; terminal runs only become reports.

use chrono::Utc;

use crate::plan::DeploymentPlan;
use crate::types::{RunId, TargetId};

use super::backup::RollbackResult;
use super::report::{AbortReason, DeploymentReport, RunState, StageOutcome, StageResult, StageStatus};
use super::state::{Aborted, Completed, InProgress, InvalidTransition, NotStarted, StageState};

/// A deployment run, parameterized by its current state.
///
/// Results are append-only: nothing recorded is ever edited.
#[derive(Debug)]
pub struct Run<S> {
    id: RunId,
    plan: DeploymentPlan,
    stages: Vec<StageOutcome>,
    results: Vec<StageResult>,
    rollbacks: Vec<RollbackResult>,
    skipped_stages: Vec<String>,
    alerts: Vec<String>,
    state: S,
}

impl<S> Run<S> {
    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn plan(&self) -> &DeploymentPlan {
        &self.plan
    }

    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    pub fn rollbacks(&self) -> &[RollbackResult] {
        &self.rollbacks
    }

    pub fn stage_state(&self, name: &str) -> Option<StageState> {
        self.stages.iter().find(|s| s.name == name).map(|s| s.state)
    }

    fn transition<T>(self, state: T) -> Run<T> {
        Run {
            id: self.id,
            plan: self.plan,
            stages: self.stages,
            results: self.results,
            rollbacks: self.rollbacks,
            skipped_stages: self.skipped_stages,
            alerts: self.alerts,
            state,
        }
    }
}

impl Run<NotStarted> {
    pub fn new(id: RunId, plan: DeploymentPlan) -> Self {
        let stages = plan
            .stages
            .iter()
            .map(|s| StageOutcome {
                name: s.name.clone(),
                state: StageState::Pending,
                skipped_targets: Vec::new(),
            })
            .collect();
        Run {
            id,
            plan,
            stages,
            results: Vec::new(),
            rollbacks: Vec::new(),
            skipped_stages: Vec::new(),
            alerts: Vec::new(),
            state: NotStarted,
        }
    }

    pub fn start(self) -> Run<InProgress> {
        tracing::info!(run = %self.id, environment = %self.plan.environment, "run started");
        self.transition(InProgress {
            started_at: Utc::now(),
        })
    }
}

impl Run<InProgress> {
    fn stage_mut(&mut self, name: &str) -> Option<&mut StageOutcome> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    pub fn begin_stage(&mut self, name: &str) -> Result<(), InvalidTransition> {
        if let Some(stage) = self.stage_mut(name) {
            stage.state = stage.state.start()?;
        }
        Ok(())
    }

    pub fn record(&mut self, result: StageResult) {
        self.results.push(result);
    }

    /// Close a running stage from the results recorded for it.
    pub fn finish_stage(&mut self, name: &str) -> Result<StageState, InvalidTransition> {
        let outcome = stage_status(self.results.iter().filter(|r| r.stage == name).map(|r| r.status));
        match self.stage_mut(name) {
            Some(stage) => {
                stage.state = stage.state.finish(outcome)?;
                Ok(stage.state)
            }
            None => Err(InvalidTransition {
                from: StageState::Pending,
                to: StageState::Running,
            }),
        }
    }

    /// Record targets of a running stage that will not be attempted.
    pub fn skip_targets(&mut self, name: &str, targets: Vec<TargetId>) {
        if targets.is_empty() {
            return;
        }
        if let Some(stage) = self.stage_mut(name) {
            tracing::warn!(stage = %name, skipped = targets.len(), "targets skipped");
            stage.skipped_targets.extend(targets);
        }
    }

    /// Record a rollback. A failed rollback raises a run-level alert.
    pub fn record_rollback(&mut self, result: RollbackResult) {
        if !result.restored() {
            self.alerts.push(format!(
                "ROLLBACK FAILED on {} (backup {}): {}; target may be inconsistent",
                result.target, result.backup, result.detail
            ));
        }
        self.rollbacks.push(result);
    }

    pub fn complete(self) -> Run<Completed> {
        let started_at = self.state.started_at;
        tracing::info!(run = %self.id, "run completed");
        self.transition(Completed {
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Stop the run. Stages that never started are recorded as skipped.
    pub fn abort(mut self, reason: AbortReason) -> Run<Aborted> {
        self.skipped_stages = self
            .stages
            .iter()
            .filter(|s| s.state == StageState::Pending)
            .map(|s| s.name.clone())
            .collect();
        let started_at = self.state.started_at;
        tracing::warn!(run = %self.id, reason = %reason, skipped = self.skipped_stages.len(), "run aborted");
        self.transition(Aborted {
            started_at,
            finished_at: Utc::now(),
            reason,
        })
    }
}

/// Failed beats Warned beats Succeeded.
fn stage_status(statuses: impl Iterator<Item = StageStatus>) -> StageStatus {
    statuses.fold(StageStatus::Succeeded, |acc, s| match (acc, s) {
        (StageStatus::Failed, _) | (_, StageStatus::Failed) => StageStatus::Failed,
        (StageStatus::Warned, _) | (_, StageStatus::Warned) => StageStatus::Warned,
        _ => StageStatus::Succeeded,
    })
}

impl Run<Completed> {
    pub fn into_report(self) -> DeploymentReport {
        DeploymentReport::generate(
            self.id,
            self.plan,
            self.stages,
            self.results,
            self.rollbacks,
            self.skipped_stages,
            self.alerts,
            RunState::Completed,
            None,
            self.state.started_at,
            self.state.finished_at,
        )
    }
}

impl Run<Aborted> {
    pub fn reason(&self) -> &AbortReason {
        self.state.reason()
    }

    pub fn into_report(self) -> DeploymentReport {
        DeploymentReport::generate(
            self.id,
            self.plan,
            self.stages,
            self.results,
            self.rollbacks,
            self.skipped_stages,
            self.alerts,
            RunState::Aborted,
            Some(self.state.reason),
            self.state.started_at,
            self.state.finished_at,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::report::OverallStatus;
    use crate::plan::PlanFile;
    use crate::types::{EnvironmentName, ServiceId, TargetId};

    fn plan() -> DeploymentPlan {
        let yaml = r#"
stages:
  - name: one
    targets: [api]
    actions: [{action: execute, command: "true"}]
  - name: two
    targets: [api]
    actions: [{action: execute, command: "true"}]
"#;
        DeploymentPlan::new(EnvironmentName::new("dev").unwrap(), PlanFile::from_yaml(yaml).unwrap())
    }

    fn result(stage: &str, status: StageStatus) -> StageResult {
        StageResult::new(
            stage,
            TargetId::new(&EnvironmentName::new("dev").unwrap(), &ServiceId::new("api").unwrap()),
            status,
        )
    }

    #[test]
    fn completed_run_reports_success() {
        let mut run = Run::new(RunId::new("r1"), plan()).start();
        for stage in ["one", "two"] {
            run.begin_stage(stage).unwrap();
            run.record(result(stage, StageStatus::Succeeded));
            assert_eq!(run.finish_stage(stage).unwrap(), StageState::Succeeded);
        }
        let report = run.complete().into_report();
        assert_eq!(report.overall_status, OverallStatus::Success);
        assert_eq!(report.results.len(), 2);
        assert!(report.skipped_stages.is_empty());
        assert!(report.finished_at >= report.started_at);
    }

    #[test]
    fn aborted_run_records_skipped_stages() {
        let mut run = Run::new(RunId::new("r1"), plan()).start();
        run.begin_stage("one").unwrap();
        run.record(result("one", StageStatus::Failed));
        assert_eq!(run.finish_stage("one").unwrap(), StageState::Failed);

        let run = run.abort(AbortReason::CriticalFailure {
            stage: "one".to_string(),
        });
        assert!(matches!(run.reason(), AbortReason::CriticalFailure { .. }));
        let report = run.into_report();
        assert_eq!(report.skipped_stages, vec!["two".to_string()]);
        assert_eq!(report.overall_status, OverallStatus::Failure);
        assert_eq!(report.stage_state("two"), Some(StageState::Pending));
    }

    #[test]
    fn stage_cannot_begin_twice() {
        let mut run = Run::new(RunId::new("r1"), plan()).start();
        run.begin_stage("one").unwrap();
        assert!(run.begin_stage("one").is_err());
    }

    #[test]
    fn failed_beats_warned() {
        let statuses = [StageStatus::Warned, StageStatus::Failed, StageStatus::Succeeded];
        assert_eq!(stage_status(statuses.into_iter()), StageStatus::Failed);
        assert_eq!(
            stage_status([StageStatus::Succeeded, StageStatus::Warned].into_iter()),
            StageStatus::Warned
        );
        assert_eq!(stage_status(std::iter::empty()), StageStatus::Succeeded);
    }
}

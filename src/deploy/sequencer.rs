// ABOUTME: Stage Sequencer: runs a plan's stages in order against resolved targets.
// ABOUTME: Enforces critical/best-effort policy and rolls back backed-up targets on abort.

use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::diagnostics::{Diagnostics, Warning};
use crate::plan::{Action, DeploymentPlan, Stage};
use crate::transport::TransportPool;
use crate::types::{BackupId, RunId, TargetId};

use super::backup::{BackupManager, BackupRecord, BackupToken, RestoreProcedure, RollbackResult};
use super::cancel::CancelToken;
use super::error::TransportResultExt;
use super::executor::{ExecResult, RemoteExecutor};
use super::health::{HealthCheck, HealthResult, HealthVerifier, Probe};
use super::lock::DeployLock;
use super::remote::Remote;
use super::report::{AbortReason, DeploymentReport, OverallStatus, RunState, StageResult, StageStatus};
use super::resolver::{Target, TargetResolver};
use super::run::Run;
use super::state::{InProgress, StageState};
use super::store::StateStore;
use super::transfer::{ArtifactTransfer, Overwrite, TransferResult};
use super::{DeployError, elapsed_ms};

/// Observer for run progress. All methods default to no-ops.
pub trait Progress: Send + Sync {
    fn stage_started(&self, _stage: &Stage, _targets: usize) {}
    fn target_finished(&self, _result: &StageResult) {}
    fn rollback_finished(&self, _result: &RollbackResult) {}
}

/// Progress observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {}

#[derive(Debug, Clone, Copy)]
pub struct SequencerOptions {
    /// Take a remote deploy lock on each target.
    pub lock: bool,
    /// Break locks held by other runs.
    pub force_lock: bool,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            lock: true,
            force_lock: false,
        }
    }
}

/// Run-wide bookkeeping owned by the sequencer task.
#[derive(Default)]
struct Ledger {
    remotes: HashMap<TargetId, Remote>,
    locks: Vec<DeployLock>,
    /// Verified backups in creation order.
    backups: Vec<BackupRecord>,
    /// Backups already restored by an explicit `rollback` action.
    restored: HashSet<BackupId>,
}

/// What one target produced during one stage.
struct TargetOutcome {
    result: StageResult,
    backups: Vec<BackupRecord>,
    rollbacks: Vec<RollbackResult>,
}

/// Per-target scratch state while a stage's actions run.
#[derive(Default)]
struct TargetWork {
    tokens: Vec<BackupToken>,
    records: Vec<BackupRecord>,
    restored: HashSet<BackupId>,
    transfers: Vec<TransferResult>,
    executions: Vec<ExecResult>,
    health: Vec<HealthResult>,
    rollbacks: Vec<RollbackResult>,
}

pub struct Sequencer<'a> {
    resolver: TargetResolver<'a>,
    pool: Arc<TransportPool>,
    backups: BackupManager,
    executor: RemoteExecutor,
    transfer: ArtifactTransfer,
    verifier: HealthVerifier,
    cancel: CancelToken,
    options: SequencerOptions,
    progress: &'a dyn Progress,
}

impl<'a> Sequencer<'a> {
    pub fn new(
        config: &'a Config,
        store: StateStore,
        probe: Arc<dyn Probe>,
        pool: Arc<TransportPool>,
        cancel: CancelToken,
    ) -> Self {
        let verifier = HealthVerifier::new(probe, cancel.clone());
        Self {
            resolver: TargetResolver::new(config),
            pool,
            backups: BackupManager::new(store, verifier.clone(), cancel.clone()),
            executor: RemoteExecutor::new(cancel.clone()),
            transfer: ArtifactTransfer::new(cancel.clone()),
            verifier,
            cancel,
            options: SequencerOptions {
                lock: config.lock,
                force_lock: false,
            },
            progress: &NoProgress,
        }
    }

    pub fn with_options(mut self, options: SequencerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Execute `plan` and return its report.
    ///
    /// Input errors (unknown environment or service, invalid plan) are returned
    /// before anything touches a target. Everything after that ends up in the
    /// report instead.
    pub async fn run(
        &self,
        plan: &DeploymentPlan,
        diag: &mut Diagnostics,
    ) -> Result<DeploymentReport, DeployError> {
        self.resolver.validate(plan)?;

        let mut run = Run::new(RunId::generate(), plan.clone()).start();
        let run_id = run.id().clone();
        let mut ledger = Ledger::default();
        let mut abort = None;

        for stage in &plan.stages {
            if self.cancel.is_cancelled() {
                abort = Some(AbortReason::OperatorInterrupt);
                break;
            }
            match self.run_stage(&mut run, &run_id, plan, stage, &mut ledger, diag).await {
                Ok(StageState::Failed) if self.cancel.is_cancelled() => {
                    abort = Some(AbortReason::OperatorInterrupt);
                    break;
                }
                Ok(StageState::Failed) => {
                    abort = Some(AbortReason::CriticalFailure {
                        stage: stage.name.clone(),
                    });
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    abort = Some(AbortReason::Error {
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }
        if abort.is_none() && self.cancel.is_cancelled() {
            abort = Some(AbortReason::OperatorInterrupt);
        }

        let report = match abort {
            None => run.complete().into_report(),
            Some(reason) => {
                self.rollback_run(&mut run, &ledger).await;
                run.abort(reason).into_report()
            }
        };

        // a rolled-back run keeps the older backups it fell back to
        if report.run_state == RunState::Completed
            && matches!(
                report.overall_status,
                OverallStatus::Success | OverallStatus::PartialSuccess
            )
        {
            self.supersede(&run_id, &ledger, diag).await;
        }
        self.finish(ledger, diag).await;
        Ok(report)
    }

    /// Run one stage and record a result for every target it attempted.
    ///
    /// Returns the stage's final state. `Failed` only happens on critical stages.
    async fn run_stage(
        &self,
        run: &mut Run<InProgress>,
        run_id: &RunId,
        plan: &DeploymentPlan,
        stage: &Stage,
        ledger: &mut Ledger,
        diag: &mut Diagnostics,
    ) -> Result<StageState, DeployError> {
        let targets = stage
            .targets
            .iter()
            .map(|service| self.resolver.resolve(&plan.environment, service))
            .collect::<Result<Vec<_>, _>>()?;
        run.begin_stage(&stage.name)
            .map_err(|e| DeployError::invalid_plan(e.to_string()))?;

        tracing::info!(
            stage = %stage.name,
            targets = targets.len(),
            critical = stage.is_critical(),
            parallel = stage.parallel,
            "stage started"
        );
        self.progress.stage_started(stage, targets.len());

        let mut outcomes = Vec::with_capacity(targets.len());
        if stage.parallel {
            let mut ready = Vec::with_capacity(targets.len());
            for target in targets {
                let id = target.id.clone();
                match self.prepare(run_id, target, ledger).await {
                    Ok(remote) => ready.push(remote),
                    Err(e) => outcomes.push(self.failed_outcome(stage, id, &e, Instant::now())),
                }
            }
            let width = ready.len().max(1);
            let finished: Vec<TargetOutcome> = futures::stream::iter(ready.iter())
                .map(|remote| self.run_target(run_id, plan, stage, remote))
                .buffered(width)
                .collect()
                .await;
            outcomes.extend(finished);
            for outcome in &outcomes {
                self.progress.target_finished(&outcome.result);
            }
        } else {
            let mut pending = targets.into_iter();
            while let Some(target) = pending.next() {
                let id = target.id.clone();
                let start = Instant::now();
                let outcome = match self.prepare(run_id, target, ledger).await {
                    Ok(remote) => self.run_target(run_id, plan, stage, &remote).await,
                    Err(e) => self.failed_outcome(stage, id, &e, start),
                };
                self.progress.target_finished(&outcome.result);
                let stop = outcome.result.status == StageStatus::Failed;
                outcomes.push(outcome);
                if stop || self.cancel.is_cancelled() {
                    run.skip_targets(&stage.name, pending.map(|t| t.id).collect());
                    break;
                }
            }
        }

        for outcome in outcomes {
            if outcome.result.status == StageStatus::Warned {
                diag.warn(Warning::best_effort(format!(
                    "best-effort stage '{}' failed on {}: {}",
                    stage.name, outcome.result.target, outcome.result.detail
                )));
            }
            ledger.backups.extend(outcome.backups);
            for rollback in outcome.rollbacks {
                ledger.restored.insert(rollback.backup.clone());
                run.record_rollback(rollback);
            }
            run.record(outcome.result);
        }

        let state = run
            .finish_stage(&stage.name)
            .map_err(|e| DeployError::invalid_plan(e.to_string()))?;
        tracing::info!(stage = %stage.name, state = ?state, "stage finished");
        Ok(state)
    }

    /// Connect to a target and take its lock the first time the run touches it.
    async fn prepare(
        &self,
        run_id: &RunId,
        target: Target,
        ledger: &mut Ledger,
    ) -> Result<Remote, DeployError> {
        if let Some(remote) = ledger.remotes.get(&target.id) {
            return Ok(remote.clone());
        }
        let id = target.id.clone();
        let transport = self.pool.get(&target).await.context_connection(&id)?;
        let remote = Remote::new(target, transport);
        if self.options.lock {
            let lock = DeployLock::acquire(&remote, run_id, self.options.force_lock).await?;
            ledger.locks.push(lock);
        }
        ledger.remotes.insert(id, remote.clone());
        Ok(remote)
    }

    async fn run_target(
        &self,
        run_id: &RunId,
        plan: &DeploymentPlan,
        stage: &Stage,
        remote: &Remote,
    ) -> TargetOutcome {
        let start = Instant::now();
        let mut work = TargetWork::default();
        let outcome = self.run_actions(run_id, plan, stage, remote, &mut work).await;

        let (status, detail, error_kind) = match &outcome {
            Ok(()) => (
                StageStatus::Succeeded,
                format!("{} action(s) completed", stage.actions.len()),
                None,
            ),
            Err(e) => (
                failure_status(stage),
                e.to_string(),
                Some(format!("{:?}", e.kind())),
            ),
        };
        match status {
            StageStatus::Succeeded => {
                tracing::info!(stage = %stage.name, target_id = %remote.id(), "target succeeded")
            }
            StageStatus::Warned => {
                tracing::warn!(stage = %stage.name, target_id = %remote.id(), detail = %detail, "best-effort target failed")
            }
            StageStatus::Failed => {
                tracing::error!(stage = %stage.name, target_id = %remote.id(), detail = %detail, "critical target failed")
            }
        }

        TargetOutcome {
            result: StageResult {
                stage: stage.name.clone(),
                target: remote.id().clone(),
                status,
                duration_ms: elapsed_ms(start),
                detail,
                error_kind,
                transfers: work.transfers,
                executions: work.executions,
                health: work.health,
                backups: work.records.iter().map(|r| r.id.clone()).collect(),
            },
            backups: work.records,
            rollbacks: work.rollbacks,
        }
    }

    fn failed_outcome(
        &self,
        stage: &Stage,
        target: TargetId,
        error: &DeployError,
        start: Instant,
    ) -> TargetOutcome {
        let mut result = StageResult::new(&stage.name, target, failure_status(stage));
        result.duration_ms = elapsed_ms(start);
        result.detail = error.to_string();
        result.error_kind = Some(format!("{:?}", error.kind()));
        tracing::warn!(stage = %stage.name, target_id = %result.target, error = %error, "target unavailable");
        TargetOutcome {
            result,
            backups: Vec::new(),
            rollbacks: Vec::new(),
        }
    }

    /// Execute a stage's actions in order on one target; the first error ends it.
    async fn run_actions(
        &self,
        run_id: &RunId,
        plan: &DeploymentPlan,
        stage: &Stage,
        remote: &Remote,
        work: &mut TargetWork,
    ) -> Result<(), DeployError> {
        let restore = restore_procedure(stage, &remote.target)?;

        for action in &stage.actions {
            if self.cancel.is_cancelled() {
                return Err(DeployError::Cancelled);
            }
            tracing::debug!(stage = %stage.name, target_id = %remote.id(), action = action.kind(), "action");

            match action {
                Action::Transfer(transfer) => {
                    let artifact = plan.artifact(&transfer.artifact).ok_or_else(|| {
                        DeployError::invalid_plan(format!("unknown artifact '{}'", transfer.artifact))
                    })?;
                    let result = if transfer.first_deploy {
                        self.transfer
                            .transfer(
                                remote,
                                artifact,
                                &transfer.destination,
                                Overwrite::FirstDeploy,
                                run_id,
                                transfer.timeout,
                            )
                            .await?
                    } else {
                        let (record, token) = self
                            .backups
                            .backup(remote, run_id, &artifact.name, &transfer.destination, restore.clone())
                            .await?;
                        work.records.push(record);
                        let result = self
                            .transfer
                            .transfer(
                                remote,
                                artifact,
                                &transfer.destination,
                                Overwrite::Backed(&token),
                                run_id,
                                transfer.timeout,
                            )
                            .await;
                        work.tokens.push(token);
                        result?
                    };
                    work.transfers.push(result);
                }
                Action::Execute(execute) => {
                    let result = if execute.destructive {
                        let token = work.tokens.last().ok_or_else(|| DeployError::BackupRequired {
                            target: remote.id().clone(),
                            command: execute.command.clone(),
                        })?;
                        self.executor
                            .execute_destructive(remote, &execute.command, execute.timeout, token)
                            .await?
                    } else {
                        self.executor
                            .execute(remote, &execute.command, execute.timeout)
                            .await?
                    };
                    work.executions.push(result.clone());
                    result.require_success(remote)?;
                }
                Action::HealthCheck(spec) => {
                    let check = HealthCheck::resolve(spec, &remote.target)?;
                    let result = self.verifier.wait_for_healthy(&check).await;
                    let healthy = result.healthy;
                    let error = DeployError::Unhealthy {
                        target: remote.id().clone(),
                        url: result.url.clone(),
                        attempts: result.attempts,
                        detail: result.failure_detail(),
                    };
                    work.health.push(result);
                    if !healthy {
                        if self.cancel.is_cancelled() {
                            return Err(DeployError::Cancelled);
                        }
                        return Err(error);
                    }
                }
                Action::Backup(backup) => {
                    let (record, token) = self
                        .backups
                        .backup(remote, run_id, &backup.artifact, &backup.path, restore.clone())
                        .await?;
                    work.records.push(record);
                    work.tokens.push(token);
                }
                Action::Rollback => {
                    let pending: Vec<_> = work
                        .records
                        .iter()
                        .rev()
                        .filter(|r| !work.restored.contains(&r.id))
                        .cloned()
                        .collect();
                    if pending.is_empty() {
                        tracing::debug!(stage = %stage.name, target_id = %remote.id(), "nothing to roll back");
                    }
                    for record in pending {
                        let result = self.backups.rollback(remote, &record).await;
                        let restored = result.restored();
                        let detail = result.detail.clone();
                        work.restored.insert(record.id.clone());
                        work.rollbacks.push(result);
                        if !restored {
                            return Err(DeployError::rollback_failed(remote.id(), detail));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Restore every verified backup of the run, newest first.
    async fn rollback_run(&self, run: &mut Run<InProgress>, ledger: &Ledger) {
        let pending: Vec<_> = ledger
            .backups
            .iter()
            .rev()
            .filter(|r| r.verified && !ledger.restored.contains(&r.id))
            .collect();
        if pending.is_empty() {
            return;
        }
        tracing::warn!(backups = pending.len(), "rolling back run");

        for record in pending {
            let Some(remote) = ledger.remotes.get(&record.target) else {
                continue;
            };
            let result = self.backups.rollback(remote, record).await;
            if !result.restored() {
                tracing::error!(target_id = %record.target, backup = %record.id, detail = %result.detail, "rollback failed");
            }
            self.progress.rollback_finished(&result);
            run.record_rollback(result);
        }
    }

    /// Drop older runs' snapshots for every (target, artifact) this run backed up.
    async fn supersede(&self, run_id: &RunId, ledger: &Ledger, diag: &mut Diagnostics) {
        let mut seen = HashSet::new();
        for record in &ledger.backups {
            if !seen.insert((record.target.clone(), record.artifact.clone())) {
                continue;
            }
            let remote = ledger.remotes.get(&record.target);
            if let Err(e) = self
                .backups
                .supersede(remote, run_id, &record.target, &record.artifact)
                .await
            {
                diag.warn(Warning::backup_cleanup(format!(
                    "failed to prune old backups of {} on {}: {}",
                    record.artifact, record.target, e
                )));
            }
        }
    }

    async fn finish(&self, ledger: Ledger, diag: &mut Diagnostics) {
        for lock in ledger.locks {
            let target = lock.target().clone();
            if let Err(e) = lock.release().await {
                diag.warn(Warning::lock_release(format!(
                    "failed to release lock on {}: {}",
                    target, e
                )));
            }
        }
        for (endpoint, e) in self.pool.close_all().await {
            diag.warn(Warning::transport_close(format!(
                "failed to close session to {}: {}",
                endpoint, e
            )));
        }
    }
}

fn failure_status(stage: &Stage) -> StageStatus {
    if stage.is_critical() {
        StageStatus::Failed
    } else {
        StageStatus::Warned
    }
}

/// The stage's restart commands and health checks, resolved for `target`.
fn restore_procedure(stage: &Stage, target: &Target) -> Result<RestoreProcedure, DeployError> {
    let health_checks = stage
        .health_checks()
        .iter()
        .map(|spec| HealthCheck::resolve(spec, target))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RestoreProcedure {
        commands: stage.restart_commands(),
        health_checks,
    })
}

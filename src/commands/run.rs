// ABOUTME: Run command implementation.
// ABOUTME: Loads the plan, runs hooks around the sequencer, and persists the report.

use stagehand::config::Config;
use stagehand::deploy::{
    CancelToken, HttpProbe, OverallStatus, Sequencer, SequencerOptions, StateStore,
};
use stagehand::diagnostics::{Diagnostics, Warning};
use stagehand::error::{Error, Result};
use stagehand::hooks::{HookContext, HookPoint, HookRunner};
use stagehand::output::Output;
use stagehand::plan::DeploymentPlan;
use stagehand::transport::TransportPool;
use stagehand::types::EnvironmentName;
use std::path::Path;
use std::sync::Arc;

/// Execute a plan against an environment. Returns the report's exit code.
pub async fn run(
    config: Config,
    environment: &str,
    plan_path: &Path,
    force: bool,
    cancel: CancelToken,
    mut output: Output,
) -> Result<i32> {
    output.start_timer();
    let environment = EnvironmentName::new(environment)?;
    let plan = DeploymentPlan::load(plan_path, environment)?;
    let store = StateStore::open(config.state_dir())?;
    let hook_runner = HookRunner::new(&config.base_dir);
    let mut diag = Diagnostics::default();

    if let Some(result) = hook_runner
        .run(HookPoint::PreRun, &HookContext::for_plan(&plan))
        .await
        && !result.success
    {
        if !result.stderr.is_empty() {
            eprintln!("{}", result.stderr);
        }
        return Err(Error::Hook("pre-run hook failed".to_string()));
    }

    output.progress(&format!(
        "Deploying {} stage(s) to {}",
        plan.stages.len(),
        plan.environment
    ));

    let probe = Arc::new(HttpProbe::new()?);
    let pool = Arc::new(TransportPool::default());
    let report = Sequencer::new(&config, store.clone(), probe, pool, cancel)
        .with_options(SequencerOptions {
            lock: config.lock,
            force_lock: force,
        })
        .with_progress(&output)
        .run(&plan, &mut diag)
        .await?;
    let report_path = store.save_report(&report)?;

    let point = match report.overall_status {
        OverallStatus::Failure => HookPoint::OnFailure,
        OverallStatus::Success | OverallStatus::PartialSuccess => HookPoint::PostRun,
    };
    let context = HookContext::for_report(&report, &report_path);
    if let Some(result) = hook_runner.run(point, &context).await
        && !result.success
    {
        diag.warn(Warning::hook(format!("{} hook failed", point.filename())));
    }

    // Emit collected warnings
    for warning in diag.warnings() {
        output.warning(&warning.message);
    }

    output.report(&report);
    output.progress(&format!("Report: {}", report_path.display()));
    Ok(report.exit_code())
}

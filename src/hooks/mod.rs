// ABOUTME: Hooks system for run lifecycle events.
// ABOUTME: Discovers and executes shell scripts at pre-run, post-run, and on-failure points.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::deploy::DeploymentReport;
use crate::plan::DeploymentPlan;
use crate::types::RunId;

/// Hook execution points in the run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    /// Before the first stage. Failure aborts the run.
    PreRun,
    /// After a run that did not fail. Failure logs warning.
    PostRun,
    /// After a failed or aborted run. Failure logs warning.
    OnFailure,
}

impl HookPoint {
    /// Get the hook filename for this point.
    pub fn filename(&self) -> &'static str {
        match self {
            HookPoint::PreRun => "pre-run",
            HookPoint::PostRun => "post-run",
            HookPoint::OnFailure => "on-failure",
        }
    }

    /// Whether failure at this hook point should abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HookPoint::PreRun)
    }
}

/// Context passed to hooks via environment variables.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub run_id: Option<RunId>,
    pub environment: String,
    pub plan: Option<PathBuf>,
    pub status: Option<String>,
    pub report: Option<PathBuf>,
}

impl HookContext {
    /// Context before the run exists.
    pub fn for_plan(plan: &DeploymentPlan) -> Self {
        Self {
            run_id: None,
            environment: plan.environment.to_string(),
            plan: plan.source.clone(),
            status: None,
            report: None,
        }
    }

    /// Context for a finished run and its persisted report.
    pub fn for_report(report: &DeploymentReport, report_path: &Path) -> Self {
        Self {
            run_id: Some(report.run_id.clone()),
            environment: report.environment.to_string(),
            plan: report.plan.source.clone(),
            status: Some(report.overall_status.to_string()),
            report: Some(report_path.to_path_buf()),
        }
    }

    /// Convert context to environment variables.
    pub fn to_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("STAGEHAND_ENVIRONMENT".to_string(), self.environment.clone());
        if let Some(ref run_id) = self.run_id {
            env.insert("STAGEHAND_RUN_ID".to_string(), run_id.to_string());
        }
        if let Some(ref plan) = self.plan {
            env.insert("STAGEHAND_PLAN".to_string(), plan.display().to_string());
        }
        if let Some(ref status) = self.status {
            env.insert("STAGEHAND_STATUS".to_string(), status.clone());
        }
        if let Some(ref report) = self.report {
            env.insert("STAGEHAND_REPORT".to_string(), report.display().to_string());
        }
        env
    }
}

/// Result of running a hook.
#[derive(Debug)]
pub struct HookResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Discovers and runs hooks from a project directory.
pub struct HookRunner {
    hooks_dir: PathBuf,
}

impl HookRunner {
    /// Create a new hook runner looking for hooks in the given project directory.
    pub fn new(project_dir: &Path) -> Self {
        Self {
            hooks_dir: project_dir.join(".stagehand").join("hooks"),
        }
    }

    /// Check if a hook exists for the given point.
    pub fn hook_exists(&self, point: HookPoint) -> bool {
        self.hook_path(point).is_file()
    }

    fn hook_path(&self, point: HookPoint) -> PathBuf {
        self.hooks_dir.join(point.filename())
    }

    /// Run a hook if it exists.
    ///
    /// Returns None if the hook doesn't exist, or Some(HookResult) if it was run.
    pub async fn run(&self, point: HookPoint, context: &HookContext) -> Option<HookResult> {
        let hook_path = self.hook_path(point);

        if !hook_path.is_file() {
            return None;
        }

        tracing::info!("Running {} hook: {}", point.filename(), hook_path.display());

        let output = Command::new(&hook_path)
            .envs(context.to_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match output {
            Ok(output) => {
                let result = HookResult {
                    success: output.status.success(),
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if result.success {
                    tracing::info!("{} hook completed successfully", point.filename());
                } else {
                    tracing::warn!(
                        "{} hook failed with exit code {:?}",
                        point.filename(),
                        result.exit_code
                    );
                }

                Some(result)
            }
            Err(e) => {
                tracing::error!("Failed to execute {} hook: {}", point.filename(), e);
                Some(HookResult {
                    success: false,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                })
            }
        }
    }
}

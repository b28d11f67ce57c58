// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes.

use serde::Serialize;
use std::time::Instant;

use crate::deploy::{
    BackupRecord, DeploymentReport, Progress, RollbackResult, StageResult, StageStatus,
};
use crate::plan::Stage;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => {
                // Print only the essential result
                println!("{message}");
            }
            OutputMode::Json => self.emit("success", message, false),
        }
    }

    /// Print a non-fatal warning.
    pub fn warning(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Warning: {message}"),
            OutputMode::Json => self.emit("warning", message, true),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => self.emit("error", message, true),
        }
    }

    fn emit(&self, event: &str, message: &str, stderr: bool) {
        let event = JsonEvent {
            event,
            message,
            duration_secs: self.duration(),
        };
        if let Ok(json) = serde_json::to_string(&event) {
            if stderr {
                eprintln!("{json}");
            } else {
                println!("{json}");
            }
        }
    }

    /// Print a finished run. JSON mode prints the whole report.
    pub fn report(&self, report: &DeploymentReport) {
        match self.mode {
            OutputMode::Json => {
                if let Ok(json) = serde_json::to_string(report) {
                    println!("{json}");
                }
            }
            OutputMode::Quiet => {
                println!("{} {}", report.run_id, report.overall_status);
            }
            OutputMode::Normal => {
                println!();
                println!(
                    "Run {} on {}: {} ({})",
                    report.run_id.short(),
                    report.environment,
                    report.overall_status,
                    format_duration(report.duration())
                );
                if let Some(reason) = &report.abort_reason {
                    println!("  aborted: {}", reason);
                }
                for result in &report.results {
                    println!(
                        "  {} {} [{}] {}",
                        status_mark(result.status),
                        result.target,
                        result.stage,
                        result.detail
                    );
                }
                for rollback in &report.rollbacks {
                    println!(
                        "  rollback {} {} ({})",
                        rollback.target,
                        if rollback.restored() { "restored" } else { "FAILED" },
                        rollback.detail
                    );
                }
                for stage in report.stages.iter().filter(|s| !s.skipped_targets.is_empty()) {
                    let targets: Vec<_> = stage.skipped_targets.iter().map(|t| t.as_str()).collect();
                    println!("  [{}] not attempted: {}", stage.name, targets.join(", "));
                }
                if !report.skipped_stages.is_empty() {
                    println!("  skipped: {}", report.skipped_stages.join(", "));
                }
                for alert in &report.alerts {
                    eprintln!("ALERT: {alert}");
                }
            }
        }
    }

    /// Print backup records as a table or JSON lines.
    pub fn backups(&self, records: &[BackupRecord]) {
        for record in records {
            match self.mode {
                OutputMode::Json => {
                    if let Ok(json) = serde_json::to_string(record) {
                        println!("{json}");
                    }
                }
                OutputMode::Quiet => println!("{}", record.id),
                OutputMode::Normal => println!(
                    "{}  {}  {}  {}  {}{}",
                    record.id,
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.target,
                    record.artifact,
                    record.source_path,
                    if record.verified { "" } else { "  (unverified)" }
                ),
            }
        }
    }
}

impl Progress for Output {
    fn stage_started(&self, stage: &Stage, targets: usize) {
        self.progress(&format!(
            "→ Stage {} ({} target(s){})",
            stage.name,
            targets,
            if stage.is_critical() { "" } else { ", best-effort" }
        ));
    }

    fn target_finished(&self, result: &StageResult) {
        self.progress(&format!(
            "  {} {} ({}ms)",
            status_mark(result.status),
            result.target,
            result.duration_ms
        ));
        if result.status != StageStatus::Succeeded {
            self.progress(&format!("    {}", result.detail));
        }
    }

    fn rollback_finished(&self, result: &RollbackResult) {
        if result.restored() {
            self.progress(&format!("  ↺ restored {} on {}", result.artifact, result.target));
        } else {
            self.error(&format!(
                "rollback of {} on {} failed: {}",
                result.artifact, result.target, result.detail
            ));
        }
    }
}

fn status_mark(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Succeeded => "✓",
        StageStatus::Warned => "!",
        StageStatus::Failed => "✗",
    }
}

/// `12.3s`, clamped at zero.
fn format_duration(duration: chrono::Duration) -> String {
    let ms = duration.num_milliseconds().max(0);
    format!("{}.{}s", ms / 1000, ms % 1000 / 100)
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

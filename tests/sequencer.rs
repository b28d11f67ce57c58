// ABOUTME: Integration tests for the stage sequencer over local transports.
// ABOUTME: Covers success, critical abort with rollback, best-effort warnings and cancellation.

mod support;

use stagehand::deploy::{
    AbortReason, CancelToken, DeployLock, OverallStatus, Remote, RunState, SequencerOptions,
    StageState, StageStatus, TargetResolver,
};
use stagehand::diagnostics::WarningKind;
use stagehand::transport::LocalTransport;
use stagehand::types::{RunId, ServiceId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{ScriptedProbe, Workspace, dev, run_plan, run_plan_with};

fn two_service_plan(ws: &Workspace, web_command: &str) -> String {
    let api = ws.artifact("api.bin", "api-v2");
    let web = ws.artifact("web.bin", "web-v2");
    format!(
        r#"
artifacts:
  api:
    path: {api}
    kind: binary
    version: 2.0.0
  web:
    path: {web}
    kind: binary
    version: 2.0.0
stages:
  - name: ship-api
    targets: [api]
    actions:
      - action: transfer
        artifact: api
        destination: {api_dest}
      - action: execute
        command: touch {marker}
        destructive: true
        restart: true
      - action: health_check
        path: /health
        interval: 10ms
        max_attempts: 2
  - name: ship-web
    targets: [web]
    actions:
      - action: transfer
        artifact: web
        destination: {web_dest}
      - action: execute
        command: "{web_command}"
  - name: smoke
    targets: [api, web]
    actions:
      - action: execute
        command: "true"
"#,
        api = api.display(),
        web = web.display(),
        api_dest = ws.remote_str("api/app.bin"),
        marker = ws.remote_str("api/restarted"),
        web_dest = ws.remote_str("web/app.bin"),
    )
}

#[tokio::test]
async fn all_stages_succeed() {
    let ws = Workspace::new();
    ws.seed_remote("api/app.bin", "api-v1");
    ws.seed_remote("web/app.bin", "web-v1");
    let config = ws.config(&["api", "web"]);
    let plan = ws.plan(&two_service_plan(&ws, "true"));
    let probe = ScriptedProbe::new().healthy("http://api.test/health");

    let (report, diag) = run_plan(&ws, &config, &plan, probe.clone(), CancelToken::new()).await;

    assert_eq!(report.overall_status, OverallStatus::Success);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.run_state, RunState::Completed);
    // one result per target per stage
    assert_eq!(report.results.len(), 4);
    assert!(report.rollbacks.is_empty());
    assert!(report.skipped_stages.is_empty());
    assert!(!diag.has_warnings());

    assert_eq!(ws.read_remote("api/app.bin").as_deref(), Some("api-v2"));
    assert_eq!(ws.read_remote("web/app.bin").as_deref(), Some("web-v2"));
    assert!(ws.remote("api/restarted").exists());
    assert_eq!(probe.calls("http://api.test/health"), 1);

    let backups = ws.store().list_backups().unwrap();
    assert_eq!(backups.len(), 2);
    assert!(backups.iter().all(|b| b.verified && b.run_id == report.run_id));
    assert_eq!(report.results[0].transfers[0].version, "2.0.0");
    assert!(report.duration() >= chrono::Duration::zero());
}

#[tokio::test]
async fn critical_failure_rolls_back_in_reverse_order() {
    let ws = Workspace::new();
    ws.seed_remote("api/app.bin", "api-v1");
    ws.seed_remote("web/app.bin", "web-v1");
    let config = ws.config(&["api", "web"]);
    let plan = ws.plan(&two_service_plan(&ws, "exit 3"));
    let probe = ScriptedProbe::new().healthy("http://api.test/health");

    let (report, _) = run_plan(&ws, &config, &plan, probe, CancelToken::new()).await;

    assert_eq!(report.overall_status, OverallStatus::Failure);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.run_state, RunState::Aborted);
    assert_eq!(
        report.abort_reason,
        Some(AbortReason::CriticalFailure {
            stage: "ship-web".to_string()
        })
    );
    assert_eq!(report.skipped_stages, vec!["smoke".to_string()]);
    assert_eq!(report.stage_state("ship-web"), Some(StageState::Failed));
    assert_eq!(report.stage_state("smoke"), Some(StageState::Pending));

    let failed: Vec<_> = report.results_with(StageStatus::Failed).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_kind.as_deref(), Some("ExecutionFailed"));
    assert!(failed[0].detail.contains("status 3"));

    // newest backup first: web, then api
    assert_eq!(report.rollbacks.len(), 2);
    assert_eq!(report.rollbacks[0].target.as_str(), "dev/web");
    assert_eq!(report.rollbacks[1].target.as_str(), "dev/api");
    assert!(report.rollbacks.iter().all(|r| r.restored()));
    assert!(report.alerts.is_empty());

    assert_eq!(ws.read_remote("api/app.bin").as_deref(), Some("api-v1"));
    assert_eq!(ws.read_remote("web/app.bin").as_deref(), Some("web-v1"));
}

#[tokio::test]
async fn best_effort_failure_is_partial_success() {
    let ws = Workspace::new();
    let config = ws.config(&["api", "web"]);
    let plan = ws.plan(
        r#"
stages:
  - name: warm-cache
    targets: [web]
    criticality: best-effort
    actions:
      - action: health_check
        path: /warm
        interval: 10ms
        max_attempts: 3
  - name: smoke
    targets: [api]
    actions:
      - action: execute
        command: "true"
"#,
    );
    let probe = ScriptedProbe::new().status("http://web.test/warm", 500);

    let (report, diag) = run_plan(&ws, &config, &plan, probe.clone(), CancelToken::new()).await;

    assert_eq!(report.overall_status, OverallStatus::PartialSuccess);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.stage_state("warm-cache"), Some(StageState::Warned));
    assert_eq!(report.stage_state("smoke"), Some(StageState::Succeeded));
    assert_eq!(probe.calls("http://web.test/warm"), 3);

    let warned = &report.results[0];
    assert_eq!(warned.status, StageStatus::Warned);
    assert_eq!(warned.health[0].attempts, 3);
    assert_eq!(warned.health[0].last_status, Some(500));
    assert!(report.rollbacks.is_empty());
    assert!(
        diag.warnings()
            .iter()
            .any(|w| w.kind == WarningKind::BestEffortFailure)
    );
}

/// Ship the api artifact, then poll `/health` up to five times.
fn ship_api_with_health(ws: &Workspace, preamble: &str) -> String {
    let api = ws.artifact("api.bin", "api-v2");
    format!(
        r#"
artifacts:
  api:
    path: {api}
    kind: binary
    version: 2.0.0
stages:
{preamble}
  - name: ship-api
    targets: [api]
    actions:
      - action: transfer
        artifact: api
        destination: {dest}
      - action: health_check
        path: /health
        interval: 10ms
        max_attempts: 5
"#,
        api = api.display(),
        dest = ws.remote_str("api/app.bin"),
    )
}

#[tokio::test]
async fn healthy_on_second_attempt_succeeds() {
    let ws = Workspace::new();
    ws.seed_remote("api/app.bin", "api-v1");
    let config = ws.config(&["api"]);
    let plan = ws.plan(&ship_api_with_health(&ws, ""));
    let probe = ScriptedProbe::new().sequence("http://api.test/health", &[503, 200]);

    let (report, _) = run_plan(&ws, &config, &plan, probe.clone(), CancelToken::new()).await;

    assert_eq!(report.overall_status, OverallStatus::Success);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].status, StageStatus::Succeeded);
    assert_eq!(report.results[0].health[0].attempts, 2);
    assert!(report.results[0].health[0].healthy);
    assert!(report.rollbacks.is_empty());
    assert_eq!(probe.calls("http://api.test/health"), 2);
    assert_eq!(ws.read_remote("api/app.bin").as_deref(), Some("api-v2"));
}

#[tokio::test]
async fn exhausted_health_checks_fail_and_roll_back() {
    let ws = Workspace::new();
    ws.seed_remote("api/app.bin", "api-v1");
    let config = ws.config(&["api"]);
    let plan = ws.plan(&ship_api_with_health(&ws, ""));
    // five unhealthy answers during the deploy, healthy again once restored
    let probe = ScriptedProbe::new().sequence("http://api.test/health", &[503, 503, 503, 503, 503, 200]);

    let (report, _) = run_plan(&ws, &config, &plan, probe.clone(), CancelToken::new()).await;

    assert_eq!(report.stage_state("ship-api"), Some(StageState::Failed));
    assert_eq!(report.results[0].status, StageStatus::Failed);
    assert_eq!(report.results[0].error_kind.as_deref(), Some("Unhealthy"));
    assert_eq!(report.results[0].health[0].attempts, 5);
    assert_eq!(report.results[0].health[0].last_status, Some(503));

    assert_eq!(report.rollbacks.len(), 1);
    assert!(report.rollbacks[0].restored());
    assert_eq!(report.overall_status, OverallStatus::Failure);
    assert_ne!(report.exit_code(), 0);
    assert_eq!(probe.calls("http://api.test/health"), 6);
    assert_eq!(ws.read_remote("api/app.bin").as_deref(), Some("api-v1"));
}

#[tokio::test]
async fn warned_stage_then_restored_critical_failure_is_partial_success() {
    let ws = Workspace::new();
    ws.seed_remote("api/app.bin", "api-v1");
    let config = ws.config(&["api", "web"]);
    let warm_cache = r#"
  - name: warm-cache
    targets: [web]
    criticality: best-effort
    actions:
      - action: health_check
        path: /warm
        interval: 10ms
        max_attempts: 2"#;
    let plan = ws.plan(&ship_api_with_health(&ws, warm_cache));
    let probe = ScriptedProbe::new()
        .status("http://web.test/warm", 500)
        .sequence("http://api.test/health", &[503, 503, 503, 503, 503, 200]);

    let (report, _) = run_plan(&ws, &config, &plan, probe, CancelToken::new()).await;

    assert_eq!(report.run_state, RunState::Aborted);
    assert_eq!(report.stage_state("warm-cache"), Some(StageState::Warned));
    assert_eq!(report.stage_state("ship-api"), Some(StageState::Failed));
    assert_eq!(report.rollbacks.len(), 1);
    assert!(report.rollbacks[0].restored());
    assert!(report.alerts.is_empty());

    assert_eq!(report.overall_status, OverallStatus::PartialSuccess);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(ws.read_remote("api/app.bin").as_deref(), Some("api-v1"));
    // the restored backup stays on record
    assert_eq!(ws.store().list_backups().unwrap().len(), 1);
}

#[tokio::test]
async fn destructive_command_without_backup_is_refused() {
    let ws = Workspace::new();
    let config = ws.config(&["api"]);
    let marker = ws.remote_str("api/restarted");
    let plan = ws.plan(&format!(
        r#"
stages:
  - name: restart
    targets: [api]
    actions:
      - action: execute
        command: touch {marker}
        destructive: true
"#
    ));

    let (report, _) = run_plan(&ws, &config, &plan, ScriptedProbe::new(), CancelToken::new()).await;

    assert_eq!(report.overall_status, OverallStatus::Failure);
    assert_eq!(report.results[0].error_kind.as_deref(), Some("BackupFailed"));
    assert!(report.results[0].detail.contains("without a verified backup"));
    assert!(!ws.remote("api/restarted").exists());
}

#[tokio::test]
async fn backup_action_authorizes_destructive_command() {
    let ws = Workspace::new();
    ws.seed_remote("api/config.yml", "port: 1");
    let config = ws.config(&["api"]);
    let cfg = ws.remote_str("api/config.yml");
    let plan = ws.plan(&format!(
        r#"
stages:
  - name: reconfigure
    targets: [api]
    actions:
      - action: backup
        artifact: api-config
        path: {cfg}
      - action: execute
        command: "echo 'port: 2' > {cfg}"
        destructive: true
"#
    ));

    let (report, _) = run_plan(&ws, &config, &plan, ScriptedProbe::new(), CancelToken::new()).await;

    assert_eq!(report.overall_status, OverallStatus::Success);
    assert_eq!(report.results[0].backups.len(), 1);
    assert_eq!(ws.read_remote("api/config.yml").as_deref(), Some("port: 2\n"));
}

#[tokio::test]
async fn rollback_action_restores_within_stage() {
    let ws = Workspace::new();
    ws.seed_remote("api/config.yml", "port: 1");
    let config = ws.config(&["api"]);
    let cfg = ws.remote_str("api/config.yml");
    let plan = ws.plan(&format!(
        r#"
stages:
  - name: try-config
    targets: [api]
    actions:
      - action: backup
        artifact: api-config
        path: {cfg}
      - action: execute
        command: "echo 'port: 2' > {cfg}"
        destructive: true
      - action: rollback
"#
    ));

    let (report, _) = run_plan(&ws, &config, &plan, ScriptedProbe::new(), CancelToken::new()).await;

    assert_eq!(report.overall_status, OverallStatus::Success);
    assert_eq!(report.rollbacks.len(), 1);
    assert!(report.rollbacks[0].restored());
    assert_eq!(ws.read_remote("api/config.yml").as_deref(), Some("port: 1"));
}

#[tokio::test]
async fn first_deploy_refuses_existing_destination() {
    let ws = Workspace::new();
    ws.seed_remote("api/app.bin", "api-v1");
    let config = ws.config(&["api"]);
    let api = ws.artifact("api.bin", "api-v2");
    let plan = ws.plan(&format!(
        r#"
artifacts:
  api:
    path: {}
    kind: binary
    version: 2.0.0
stages:
  - name: ship
    targets: [api]
    actions:
      - action: transfer
        artifact: api
        destination: {}
        first_deploy: true
"#,
        api.display(),
        ws.remote_str("api/app.bin")
    ));

    let (report, _) = run_plan(&ws, &config, &plan, ScriptedProbe::new(), CancelToken::new()).await;

    assert_eq!(report.overall_status, OverallStatus::Failure);
    assert_eq!(report.results[0].error_kind.as_deref(), Some("Transfer"));
    assert_eq!(ws.read_remote("api/app.bin").as_deref(), Some("api-v1"));
    assert!(ws.store().list_backups().unwrap().is_empty());
}

#[tokio::test]
async fn first_deploy_onto_clean_host() {
    let ws = Workspace::new();
    let config = ws.config(&["api"]);
    let api = ws.artifact("api.bin", "api-v1");
    let plan = ws.plan(&format!(
        r#"
artifacts:
  api:
    path: {}
    kind: binary
    version: 1.0.0
stages:
  - name: ship
    targets: [api]
    actions:
      - action: transfer
        artifact: api
        destination: {}
        first_deploy: true
"#,
        api.display(),
        ws.remote_str("api/app.bin")
    ));

    let (report, _) = run_plan(&ws, &config, &plan, ScriptedProbe::new(), CancelToken::new()).await;

    assert_eq!(report.overall_status, OverallStatus::Success);
    assert!(!report.results[0].transfers[0].replaced);
    assert_eq!(ws.read_remote("api/app.bin").as_deref(), Some("api-v1"));
}

#[tokio::test]
async fn parallel_stage_runs_targets_concurrently() {
    let ws = Workspace::new();
    let config = ws.config(&["a", "b", "c"]);
    let plan = ws.plan(
        r#"
stages:
  - name: warm
    targets: [a, b, c]
    parallel: true
    actions:
      - action: execute
        command: sleep 0.5
"#,
    );

    let start = Instant::now();
    let (report, _) = run_plan(&ws, &config, &plan, ScriptedProbe::new(), CancelToken::new()).await;

    assert_eq!(report.overall_status, OverallStatus::Success);
    assert_eq!(report.results.len(), 3);
    assert!(start.elapsed() < Duration::from_millis(1400));
}

#[tokio::test]
async fn sequential_critical_stage_stops_at_first_failure() {
    let ws = Workspace::new();
    let config = ws.config(&["a", "b"]);
    let plan = ws.plan(
        r#"
stages:
  - name: check
    targets: [a, b]
    actions:
      - action: execute
        command: "false"
"#,
    );

    let (report, _) = run_plan(&ws, &config, &plan, ScriptedProbe::new(), CancelToken::new()).await;

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].target.as_str(), "dev/a");
    let skipped: Vec<_> = report.skipped_targets("check").iter().map(|t| t.as_str()).collect();
    assert_eq!(skipped, vec!["dev/b"]);
    assert_eq!(report.overall_status, OverallStatus::Failure);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["stages"][0]["skipped_targets"][0], "dev/b");
}

#[tokio::test]
async fn cancelled_before_start_skips_everything() {
    let ws = Workspace::new();
    let config = ws.config(&["api", "web"]);
    let plan = ws.plan(&two_service_plan(&ws, "true"));
    let cancel = CancelToken::new();
    cancel.cancel();

    let (report, _) = run_plan(&ws, &config, &plan, ScriptedProbe::new(), cancel).await;

    assert_eq!(report.abort_reason, Some(AbortReason::OperatorInterrupt));
    assert_eq!(report.exit_code(), 2);
    assert!(report.results.is_empty());
    assert_eq!(report.skipped_stages.len(), 3);
}

#[tokio::test]
async fn interrupt_mid_run_rolls_back_and_exits_2() {
    let ws = Workspace::new();
    ws.seed_remote("api/app.bin", "api-v1");
    let config = ws.config(&["api"]);
    let api = ws.artifact("api.bin", "api-v2");
    let plan = ws.plan(&format!(
        r#"
artifacts:
  api:
    path: {}
    kind: binary
    version: 2.0.0
stages:
  - name: ship
    targets: [api]
    actions:
      - action: transfer
        artifact: api
        destination: {}
  - name: migrate
    targets: [api]
    actions:
      - action: execute
        command: sleep 10
        timeout: 30s
  - name: never
    targets: [api]
    actions:
      - action: execute
        command: "true"
"#,
        api.display(),
        ws.remote_str("api/app.bin")
    ));

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let (report, _) = run_plan(&ws, &config, &plan, ScriptedProbe::new(), cancel).await;

    assert!(start.elapsed() < Duration::from_secs(8));
    assert_eq!(report.abort_reason, Some(AbortReason::OperatorInterrupt));
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.skipped_stages, vec!["never".to_string()]);
    assert_eq!(report.results[1].error_kind.as_deref(), Some("Cancelled"));
    assert_eq!(report.rollbacks.len(), 1);
    assert!(report.rollbacks[0].restored());
    assert_eq!(ws.read_remote("api/app.bin").as_deref(), Some("api-v1"));
}

#[tokio::test]
async fn held_lock_fails_target_unless_forced() {
    let ws = Workspace::new();
    let config = ws.config(&["api"]);
    let plan = ws.plan(
        r#"
stages:
  - name: smoke
    targets: [api]
    actions:
      - action: execute
        command: "true"
"#,
    );

    let target = TargetResolver::new(&config)
        .resolve(&dev(), &ServiceId::new("api").unwrap())
        .unwrap();
    let remote = Remote::new(target, Arc::new(LocalTransport::new()));
    let _held = DeployLock::acquire(&remote, &RunId::new("other-run"), false)
        .await
        .unwrap();

    let (report, _) = run_plan(&ws, &config, &plan, ScriptedProbe::new(), CancelToken::new()).await;
    assert_eq!(report.overall_status, OverallStatus::Failure);
    assert_eq!(report.results[0].error_kind.as_deref(), Some("LockHeld"));

    let forced = SequencerOptions {
        lock: true,
        force_lock: true,
    };
    let (report, _) =
        run_plan_with(&ws, &config, &plan, ScriptedProbe::new(), CancelToken::new(), forced).await;
    assert_eq!(report.overall_status, OverallStatus::Success);
}

#[tokio::test]
async fn unknown_service_fails_before_any_side_effect() {
    let ws = Workspace::new();
    let config = ws.config(&["api"]);
    let marker = ws.remote_str("touched");
    let plan = ws.plan(&format!(
        r#"
stages:
  - name: first
    targets: [api]
    actions:
      - action: execute
        command: touch {marker}
  - name: second
    targets: [ghost]
    actions:
      - action: execute
        command: "true"
"#
    ));

    let mut diag = stagehand::diagnostics::Diagnostics::default();
    let err = stagehand::deploy::Sequencer::new(
        &config,
        ws.store(),
        ScriptedProbe::new(),
        Arc::new(stagehand::transport::TransportPool::default()),
        CancelToken::new(),
    )
    .run(&plan, &mut diag)
    .await
    .unwrap_err();

    assert!(err.is_input_error());
    assert!(!ws.remote("touched").exists());
}

#[tokio::test]
async fn successful_rerun_supersedes_older_backups() {
    let ws = Workspace::new();
    ws.seed_remote("api/app.bin", "api-v1");
    ws.seed_remote("web/app.bin", "web-v1");
    let config = ws.config(&["api", "web"]);
    let plan = ws.plan(&two_service_plan(&ws, "true"));
    let probe = ScriptedProbe::new().healthy("http://api.test/health");

    let (first, _) = run_plan(&ws, &config, &plan, probe.clone(), CancelToken::new()).await;
    let (second, _) = run_plan(&ws, &config, &plan, probe, CancelToken::new()).await;
    assert_eq!(second.overall_status, OverallStatus::Success);

    let backups = ws.store().list_backups().unwrap();
    assert_eq!(backups.len(), 2);
    assert!(backups.iter().all(|b| b.run_id == second.run_id));
    assert!(backups.iter().all(|b| b.run_id != first.run_id));
}

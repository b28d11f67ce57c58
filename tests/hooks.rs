// ABOUTME: Integration tests for hooks system.
// ABOUTME: Tests hook discovery, execution, and environment variable passing.

use stagehand::hooks::{HookContext, HookPoint, HookRunner};
use stagehand::types::RunId;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tempfile::TempDir;

fn create_hook(dir: &TempDir, name: &str, script: &str) {
    let hooks_dir = dir.path().join(".stagehand").join("hooks");
    fs::create_dir_all(&hooks_dir).unwrap();

    let hook_path = hooks_dir.join(name);
    fs::write(&hook_path, script).unwrap();

    // Make executable
    let mut perms = fs::metadata(&hook_path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&hook_path, perms).unwrap();
}

fn test_context() -> HookContext {
    HookContext {
        run_id: Some(RunId::new("3f2a9c")),
        environment: "staging".to_string(),
        plan: Some(PathBuf::from("/srv/app/deploy-plan.yml")),
        status: Some("failure".to_string()),
        report: Some(PathBuf::from("/var/lib/stagehand/runs/3f2a9c.json")),
    }
}

/// Test: pre-run hook runs.
#[tokio::test]
async fn pre_run_hook_runs() {
    let temp_dir = TempDir::new().unwrap();
    create_hook(&temp_dir, "pre-run", "#!/bin/sh\necho 'pre-run ran'\nexit 0\n");

    let runner = HookRunner::new(temp_dir.path());
    assert!(runner.hook_exists(HookPoint::PreRun));

    let result = runner.run(HookPoint::PreRun, &test_context()).await.unwrap();
    assert!(result.success);
    assert!(result.stdout.contains("pre-run ran"));
}

/// Test: on-failure hook runs and sees the report path.
#[tokio::test]
async fn on_failure_hook_receives_report() {
    let temp_dir = TempDir::new().unwrap();
    create_hook(
        &temp_dir,
        "on-failure",
        r#"#!/bin/sh
echo "RUN=$STAGEHAND_RUN_ID"
echo "ENV=$STAGEHAND_ENVIRONMENT"
echo "PLAN=$STAGEHAND_PLAN"
echo "STATUS=$STAGEHAND_STATUS"
echo "REPORT=$STAGEHAND_REPORT"
"#,
    );

    let runner = HookRunner::new(temp_dir.path());
    let result = runner
        .run(HookPoint::OnFailure, &test_context())
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.stdout.contains("RUN=3f2a9c"));
    assert!(result.stdout.contains("ENV=staging"));
    assert!(result.stdout.contains("PLAN=/srv/app/deploy-plan.yml"));
    assert!(result.stdout.contains("STATUS=failure"));
    assert!(result.stdout.contains("REPORT=/var/lib/stagehand/runs/3f2a9c.json"));
}

/// Test: failing hook is detectable.
#[tokio::test]
async fn pre_run_failure_detected() {
    let temp_dir = TempDir::new().unwrap();
    create_hook(&temp_dir, "pre-run", "#!/bin/sh\necho 'failing' >&2\nexit 1\n");

    let runner = HookRunner::new(temp_dir.path());
    let result = runner.run(HookPoint::PreRun, &test_context()).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(1));
    assert!(result.stderr.contains("failing"));
}

/// Test: Missing hook returns None.
#[tokio::test]
async fn missing_hook_returns_none() {
    let temp_dir = TempDir::new().unwrap();

    let runner = HookRunner::new(temp_dir.path());
    assert!(!runner.hook_exists(HookPoint::PostRun));
    assert!(runner.run(HookPoint::PostRun, &test_context()).await.is_none());
}

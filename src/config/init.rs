// ABOUTME: Config scaffolding for new projects.
// ABOUTME: Creates stagehand.yml and a starter deployment plan.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::plan::PLAN_FILENAME;

use super::CONFIG_FILENAME;

/// Write template config and plan files into `dir`.
///
/// Refuses to overwrite existing files unless `force` is set.
pub fn init_config(dir: &Path, force: bool) -> Result<Vec<PathBuf>> {
    let config_path = dir.join(CONFIG_FILENAME);
    let plan_path = dir.join(PLAN_FILENAME);

    if !force {
        for path in [&config_path, &plan_path] {
            if path.exists() {
                return Err(Error::AlreadyExists(path.clone()));
            }
        }
    }

    std::fs::write(&config_path, CONFIG_TEMPLATE)?;
    std::fs::write(&plan_path, PLAN_TEMPLATE)?;

    Ok(vec![config_path, plan_path])
}

const CONFIG_TEMPLATE: &str = r#"# Local directory for run reports and backup records.
# state_dir: .stagehand/state

environments:
  staging:
    api:
      ssh: deploy@staging-1.example.com:22
      port: 8080
      # base_url: https://api.staging.example.com
      # Private key path, literal or from the environment:
      # credential: { env: STAGING_SSH_KEY }
      # SSH host key verification (default: false for security)
      # Set trust_first_connection via the detailed form to enable Trust-On-First-Use:
      # ssh: { host: staging-1.example.com, user: deploy, trust_first_connection: true }
"#;

const PLAN_TEMPLATE: &str = r#"artifacts:
  api-jar:
    path: build/libs/api.jar
    kind: binary
    version: 0.1.0

stages:
  - name: ship-api
    targets: [api]
    criticality: critical
    actions:
      - action: transfer
        artifact: api-jar
        destination: /opt/api/api.jar
      - action: execute
        command: sudo systemctl restart api
        timeout: 60s
        destructive: true
        restart: true
      - action: health_check
        path: /health
        expected_status: 200-299
        interval: 5s
        max_attempts: 12
"#;

// ABOUTME: Stages and the actions they run against each target.
// ABOUTME: Actions are tagged in YAML with an `action:` key.

use super::artifact::Artifact;
use super::health::HealthCheckSpec;
use super::serde_helpers::{deserialize_nonempty, serialize_nonempty};
use crate::deploy::DeployError;
use crate::types::ServiceId;
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Criticality {
    /// Failure aborts the run and rolls back.
    #[default]
    Critical,
    /// Failure is recorded as a warning and the run continues.
    BestEffort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,

    #[serde(
        serialize_with = "serialize_nonempty",
        deserialize_with = "deserialize_nonempty"
    )]
    pub targets: NonEmpty<ServiceId>,

    #[serde(default)]
    pub criticality: Criticality,

    /// Run targets concurrently. Only safe when targets don't depend on each other.
    #[serde(default)]
    pub parallel: bool,

    #[serde(
        serialize_with = "serialize_nonempty",
        deserialize_with = "deserialize_nonempty"
    )]
    pub actions: NonEmpty<Action>,
}

impl Stage {
    pub fn is_critical(&self) -> bool {
        self.criticality == Criticality::Critical
    }

    /// Commands marked `restart`, replayed after a restore to bring the
    /// previous version back up. Other commands are never replayed.
    pub fn restart_commands(&self) -> Vec<ExecuteAction> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::Execute(exec) if exec.restart => Some(exec.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn health_checks(&self) -> Vec<HealthCheckSpec> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::HealthCheck(spec) => Some(spec.clone()),
                _ => None,
            })
            .collect()
    }

    pub(super) fn validate(&self, artifacts: &BTreeMap<String, Artifact>) -> Result<(), DeployError> {
        let mut seen = HashSet::new();
        for target in &self.targets {
            if !seen.insert(target) {
                return Err(DeployError::invalid_plan(format!(
                    "stage '{}' lists target '{}' twice",
                    self.name, target
                )));
            }
        }

        for action in &self.actions {
            if let Action::Transfer(t) = action
                && !artifacts.contains_key(&t.artifact)
            {
                return Err(DeployError::invalid_plan(format!(
                    "stage '{}' references unknown artifact '{}'",
                    self.name, t.artifact
                )));
            }

            match action {
                Action::Transfer(t) if !t.destination.starts_with('/') => {
                    return Err(DeployError::invalid_plan(format!(
                        "stage '{}': transfer destination must be absolute: {}",
                        self.name, t.destination
                    )));
                }
                Action::Backup(b) if b.artifact.trim().is_empty() => {
                    return Err(DeployError::invalid_plan(format!(
                        "stage '{}': backup needs an artifact label",
                        self.name
                    )));
                }
                Action::Backup(b) if !b.path.starts_with('/') => {
                    return Err(DeployError::invalid_plan(format!(
                        "stage '{}': backup path must be absolute: {}",
                        self.name, b.path
                    )));
                }
                Action::Execute(e) if e.command.trim().is_empty() => {
                    return Err(DeployError::invalid_plan(format!(
                        "stage '{}': execute command cannot be empty",
                        self.name
                    )));
                }
                Action::HealthCheck(h) => h
                    .validate()
                    .map_err(|e| DeployError::invalid_plan(format!("stage '{}': {}", self.name, e)))?,
                _ => {}
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Transfer(TransferAction),
    Execute(ExecuteAction),
    HealthCheck(HealthCheckSpec),
    Backup(BackupAction),
    /// Restore this stage's backups on the current target.
    Rollback,
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Transfer(_) => "transfer",
            Action::Execute(_) => "execute",
            Action::HealthCheck(_) => "health_check",
            Action::Backup(_) => "backup",
            Action::Rollback => "rollback",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferAction {
    pub artifact: String,
    pub destination: String,

    /// Allow writing to a destination that has no backup. Refused if the
    /// destination already exists.
    #[serde(default)]
    pub first_deploy: bool,

    #[serde(default = "default_transfer_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteAction {
    pub command: String,

    #[serde(default = "default_execute_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Stops or replaces a running service; requires a verified backup first.
    #[serde(default)]
    pub destructive: bool,

    /// Restarts the service without changing its state on disk, so it is
    /// safe to run again after a restore.
    #[serde(default)]
    pub restart: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupAction {
    pub artifact: String,
    pub path: String,
}

fn default_transfer_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_execute_timeout() -> Duration {
    Duration::from_secs(60)
}

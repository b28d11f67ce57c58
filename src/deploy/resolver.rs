// ABOUTME: Maps (environment, service) pairs to concrete deployment targets.
// ABOUTME: Unknown pairs are rejected; there is no default host.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::{Config, ServerConfig, TransportKind};
use crate::plan::DeploymentPlan;
use crate::types::{EnvironmentName, ServiceId, TargetId};

use super::DeployError;

/// A resolved deployment destination. Immutable for the lifetime of a run.
#[derive(Debug, Clone, Serialize)]
pub struct Target {
    pub id: TargetId,
    pub environment: EnvironmentName,
    pub service: ServiceId,
    pub host: String,
    pub port: Option<u16>,
    pub base_url: Option<String>,
    #[serde(skip)]
    pub transport: TransportKind,
    #[serde(skip)]
    pub ssh: Option<ServerConfig>,
    /// Resolved private key path; never serialized.
    #[serde(skip)]
    pub key_path: Option<PathBuf>,
    /// Remote directory for locks and backups.
    pub state_dir: String,
}

impl Target {
    /// A target on the orchestrator host.
    pub fn local(environment: &EnvironmentName, service: &ServiceId, state_dir: &str) -> Self {
        Self {
            id: TargetId::new(environment, service),
            environment: environment.clone(),
            service: service.clone(),
            host: "localhost".to_string(),
            port: None,
            base_url: None,
            transport: TransportKind::Local,
            ssh: None,
            key_path: None,
            state_dir: state_dir.trim_end_matches('/').to_string(),
        }
    }

    /// Key used to share one connection between targets on the same endpoint.
    pub fn endpoint_key(&self) -> String {
        match (&self.transport, &self.ssh) {
            (TransportKind::Ssh, Some(server)) => server.endpoint(),
            _ => "local".to_string(),
        }
    }

    pub fn backups_dir(&self) -> String {
        format!("{}/backups", self.state_dir)
    }

    pub fn locks_dir(&self) -> String {
        format!("{}/locks", self.state_dir)
    }
}

/// Resolves targets from the loaded environment table.
#[derive(Debug, Clone, Copy)]
pub struct TargetResolver<'a> {
    config: &'a Config,
}

impl<'a> TargetResolver<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn resolve(
        &self,
        environment: &EnvironmentName,
        service: &ServiceId,
    ) -> Result<Target, DeployError> {
        let services = self
            .config
            .environment(environment)
            .ok_or_else(|| DeployError::UnknownEnvironment(environment.clone()))?;
        let entry = services
            .get(service)
            .ok_or_else(|| DeployError::UnknownService {
                environment: environment.clone(),
                service: service.clone(),
            })?;

        let id = TargetId::new(environment, service);
        let key_path = entry
            .credential
            .as_ref()
            .map(|c| c.resolve())
            .transpose()
            .map_err(|e| DeployError::InvalidTarget {
                target: id.clone(),
                message: format!("credential: {}", e),
            })?
            .map(PathBuf::from);

        Ok(Target {
            id,
            environment: environment.clone(),
            service: service.clone(),
            host: entry.host().to_string(),
            port: entry.port,
            base_url: entry.base_url(),
            transport: entry.transport,
            ssh: entry.ssh.clone(),
            key_path,
            state_dir: entry.state_dir.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve every target the plan references, before any side effect.
    ///
    /// Also rejects relative health-check paths against targets without a base URL.
    pub fn validate(&self, plan: &DeploymentPlan) -> Result<BTreeMap<ServiceId, Target>, DeployError> {
        let mut targets = BTreeMap::new();
        for stage in &plan.stages {
            for service in &stage.targets {
                let target = self.resolve(&plan.environment, service)?;
                for check in stage.health_checks() {
                    if check.url.is_none() && target.base_url.is_none() {
                        return Err(DeployError::invalid_plan(format!(
                            "stage '{}': {} has no base_url or port for health path {}",
                            stage.name,
                            target.id,
                            check.path.as_deref().unwrap_or_default()
                        )));
                    }
                }
                targets.insert(service.clone(), target);
            }
        }
        Ok(targets)
    }
}

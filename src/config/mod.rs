// ABOUTME: Configuration types and parsing for stagehand.yml.
// ABOUTME: Handles YAML parsing, discovery, and the per-environment target table.

mod deserialize;
mod env_value;
mod init;
mod server;
mod target;

pub use env_value::EnvValue;
pub use init::init_config;
pub use server::ServerConfig;
pub use target::{DEFAULT_REMOTE_STATE_DIR, TargetEntry, TransportKind};

use crate::error::{Error, Result};
use crate::types::{EnvironmentName, ServiceId};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "stagehand.yml";
pub const CONFIG_FILENAME_ALT: &str = "stagehand.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".stagehand/config.yml";

/// Services of one environment, keyed by service id.
pub type ServiceTable = BTreeMap<ServiceId, TargetEntry>;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Local directory for persisted reports and backup records.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Whether runs take a remote lock per target.
    #[serde(default = "default_lock")]
    pub lock: bool,

    pub environments: BTreeMap<EnvironmentName, ServiceTable>,

    /// Directory the config was loaded from; relative paths resolve against it.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_lock() -> bool {
    true
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        config.base_dir = path
            .parent()
            .map(|p| {
                // `.stagehand/config.yml` belongs to the project root, not `.stagehand/`
                if p.file_name().is_some_and(|n| n == ".stagehand") {
                    p.parent().unwrap_or(p).to_path_buf()
                } else {
                    p.to_path_buf()
                }
            })
            .unwrap_or_default();
        Ok(config)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Check cross-field constraints serde cannot express.
    fn validate(&self) -> Result<()> {
        if self.environments.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one environment is required".to_string(),
            ));
        }

        for (env, services) in &self.environments {
            if services.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "environment '{}' declares no services",
                    env
                )));
            }
            for (service, entry) in services {
                entry
                    .validate()
                    .map_err(|e| Error::InvalidConfig(format!("{}/{}: {}", env, service, e)))?;
            }
        }

        Ok(())
    }

    /// Local state directory for reports and backup records.
    ///
    /// Relative paths resolve against the config directory. Falls back to the
    /// platform state dir (`~/.local/state/stagehand` on Linux).
    pub fn state_dir(&self) -> PathBuf {
        match &self.state_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.base_dir.join(dir),
            None => dirs::state_dir()
                .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("state")))
                .unwrap_or_else(std::env::temp_dir)
                .join("stagehand"),
        }
    }

    /// Services declared for an environment.
    pub fn environment(&self, name: &EnvironmentName) -> Option<&ServiceTable> {
        self.environments.get(name)
    }
}

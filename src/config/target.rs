// ABOUTME: Target descriptors from the environment table.
// ABOUTME: Describes how to reach one service in one environment.

use serde::Deserialize;

use super::deserialize::deserialize_server_option;
use super::{EnvValue, ServerConfig};

/// Default remote directory for lock files and backups.
/// `$HOME` is expanded by the remote shell.
pub const DEFAULT_REMOTE_STATE_DIR: &str = "$HOME/.local/state/stagehand";

/// How commands and files reach the target host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Remote shell over SSH.
    #[default]
    Ssh,
    /// The orchestrator host itself.
    Local,
}

/// One service entry under an environment in `stagehand.yml`.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetEntry {
    #[serde(default)]
    pub transport: TransportKind,

    /// SSH endpoint, either `[user@]host[:port]` or a detailed mapping.
    #[serde(default, deserialize_with = "deserialize_server_option")]
    pub ssh: Option<ServerConfig>,

    /// Port the service listens on.
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub base_url: Option<String>,

    /// Private key path (literal or from the environment).
    #[serde(default)]
    pub credential: Option<EnvValue>,

    /// Remote directory for locks and backups.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

fn default_state_dir() -> String {
    DEFAULT_REMOTE_STATE_DIR.to_string()
}

impl TargetEntry {
    pub(crate) fn validate(&self) -> Result<(), String> {
        match (self.transport, &self.ssh) {
            (TransportKind::Ssh, None) => {
                return Err("ssh transport requires an `ssh` endpoint".to_string());
            }
            (TransportKind::Local, Some(_)) => {
                return Err("local transport cannot declare an `ssh` endpoint".to_string());
            }
            _ => {}
        }

        if let Some(url) = &self.base_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(format!("base_url must be http(s): {}", url));
        }

        if self.state_dir.trim().is_empty() {
            return Err("state_dir cannot be empty".to_string());
        }

        Ok(())
    }

    /// Host name the service runs on.
    pub fn host(&self) -> &str {
        self.ssh
            .as_ref()
            .map(|s| s.host.as_str())
            .unwrap_or("localhost")
    }

    /// Base URL for relative health-check paths.
    pub fn base_url(&self) -> Option<String> {
        self.base_url
            .clone()
            .or_else(|| self.port.map(|p| format!("http://{}:{}", self.host(), p)))
            .map(|u| u.trim_end_matches('/').to_string())
    }
}

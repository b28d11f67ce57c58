// ABOUTME: SSH endpoint configuration for target hosts.
// ABOUTME: Parses formats like "host", "user@host", "host:port", "user@host:port".

use crate::ssh::{HostKeyPolicy, SessionConfig};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub trust_first_connection: bool,
    /// known_hosts file to check instead of `~/.ssh/known_hosts`.
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
}

fn default_port() -> u16 {
    22
}

impl ServerConfig {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("server address cannot be empty".to_string());
        }

        // Parse format: [user@]host[:port]
        let (user_part, rest) = if let Some(at_pos) = s.find('@') {
            (Some(&s[..at_pos]), &s[at_pos + 1..])
        } else {
            (None, s)
        };

        let (host, port) = if let Some(colon_pos) = rest.rfind(':') {
            let port_str = &rest[colon_pos + 1..];
            let port = port_str
                .parse::<u16>()
                .map_err(|_| format!("invalid port: {}", port_str))?;
            (&rest[..colon_pos], port)
        } else {
            (rest, 22)
        };

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }

        if user_part.is_some_and(str::is_empty) {
            return Err("user cannot be empty".to_string());
        }

        Ok(ServerConfig {
            host: host.to_string(),
            port,
            user: user_part.map(|s| s.to_string()),
            trust_first_connection: false,
            known_hosts: None,
        })
    }

    /// Connection key shared by targets on the same endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.login_user(), self.host, self.port)
    }

    /// Configured user, or `$USER`, or `root`.
    pub fn login_user(&self) -> String {
        self.user
            .clone()
            .unwrap_or_else(|| std::env::var("USER").unwrap_or_else(|_| "root".to_string()))
    }

    /// Build an SSH session config, optionally pinned to a key file.
    pub fn ssh_session_config(&self, key_path: Option<PathBuf>) -> SessionConfig {
        let policy = if self.trust_first_connection {
            HostKeyPolicy::TrustFirstUse
        } else {
            HostKeyPolicy::Strict
        };
        let config = SessionConfig::new(&self.host, self.login_user())
            .port(self.port)
            .host_keys(policy)
            .key_path(key_path);
        match &self.known_hosts {
            Some(path) => config.known_hosts(path),
            None => config,
        }
    }
}

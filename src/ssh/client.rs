// ABOUTME: SSH sessions to deployment targets using russh.
// ABOUTME: Resolves an identity, checks host keys against known_hosts, runs commands with optional stdin.

use super::error::{Error, Result};
use russh::client::{self, Config, Handle, Msg};
use russh::keys::agent::client::AgentClient;
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use russh::{Channel, ChannelMsg, Disconnect};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;

/// Keys tried under `~/.ssh` when no key file is configured and no agent is running.
const DEFAULT_IDENTITIES: [&str; 3] = ["id_ed25519", "id_ecdsa", "id_rsa"];

/// Idle sessions are dropped by russh after this long.
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do with a host that is missing from known_hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// Refuse unknown hosts.
    #[default]
    Strict,
    /// Accept and record the key of a host seen for the first time.
    TrustFirstUse,
}

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Private key file. Without one the agent is tried, then `~/.ssh` defaults.
    pub key_path: Option<PathBuf>,
    pub host_keys: HostKeyPolicy,
    /// Alternative known_hosts file; `~/.ssh/known_hosts` otherwise.
    pub known_hosts: Option<PathBuf>,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            key_path: None,
            host_keys: HostKeyPolicy::Strict,
            known_hosts: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn key_path(mut self, path: Option<PathBuf>) -> Self {
        self.key_path = path;
        self
    }

    pub fn host_keys(mut self, policy: HostKeyPolicy) -> Self {
        self.host_keys = policy;
        self
    }

    pub fn known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    /// `user@host:port`, used in logs and as the transport endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Exit status and captured output of one remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: u32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// russh handler that verifies the server key.
pub(crate) struct HostKeyCheck {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts: Option<PathBuf>,
}

impl HostKeyCheck {
    fn lookup(&self, key: &ssh_key::PublicKey) -> std::result::Result<bool, russh::keys::Error> {
        match &self.known_hosts {
            Some(path) => check_known_hosts_path(&self.host, self.port, key, path),
            None => check_known_hosts(&self.host, self.port, key),
        }
    }

    fn remember(&self, key: &ssh_key::PublicKey) {
        let learned = match &self.known_hosts {
            Some(path) => learn_known_hosts_path(&self.host, self.port, key, path),
            None => learn_known_hosts(&self.host, self.port, key),
        };
        if let Err(e) = learned {
            tracing::warn!(host = %self.host, error = %e, "could not record host key");
        }
    }
}

impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let accepted = match (self.lookup(server_public_key), self.policy) {
            (Ok(true), _) => true,
            (Err(russh::keys::Error::KeyChanged { line }), _) => {
                tracing::error!(
                    host = %self.host,
                    port = self.port,
                    line,
                    "host key does not match known_hosts"
                );
                false
            }
            (Ok(false), HostKeyPolicy::TrustFirstUse) => {
                tracing::warn!(host = %self.host, port = self.port, "trusting host key on first use");
                self.remember(server_public_key);
                true
            }
            // unreadable known_hosts counts as an unknown host
            (Err(e), HostKeyPolicy::TrustFirstUse) => {
                tracing::debug!(host = %self.host, error = %e, "known_hosts lookup failed");
                true
            }
            (_, HostKeyPolicy::Strict) => false,
        };
        Ok(accepted)
    }
}

/// Credentials a session authenticates with.
enum Identity {
    Agent(AgentClient<UnixStream>),
    Key(Arc<ssh_key::PrivateKey>),
}

impl Identity {
    async fn resolve(key_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = key_path {
            return load_key(path).map(Identity::Key);
        }

        if let Ok(agent) = AgentClient::connect_env().await {
            return Ok(Identity::Agent(agent));
        }

        let ssh_dir = dirs::home_dir()
            .map(|home| home.join(".ssh"))
            .ok_or_else(|| Error::NoIdentity("no SSH agent and no home directory".to_string()))?;
        DEFAULT_IDENTITIES
            .iter()
            .find_map(|name| load_key(&ssh_dir.join(name)).ok())
            .map(Identity::Key)
            .ok_or_else(|| {
                Error::NoIdentity(format!("no SSH agent and no key in {}", ssh_dir.display()))
            })
    }

    async fn authenticate(self, handle: &mut Handle<HostKeyCheck>, user: &str) -> Result<()> {
        let accepted = match self {
            Identity::Agent(mut agent) => {
                let keys = agent
                    .request_identities()
                    .await
                    .map_err(|e| Error::NoIdentity(format!("agent: {}", e)))?;
                if keys.is_empty() {
                    return Err(Error::NoIdentity("SSH agent holds no keys".to_string()));
                }

                let mut accepted = false;
                for key in keys {
                    if let Ok(result) = handle
                        .authenticate_publickey_with(user, key, None, &mut agent)
                        .await
                        && result.success()
                    {
                        accepted = true;
                        break;
                    }
                }
                accepted
            }
            Identity::Key(key) => {
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(Error::Protocol)?
                    .flatten();
                handle
                    .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
                    .await
                    .map_err(Error::Protocol)?
                    .success()
            }
        };

        if accepted {
            Ok(())
        } else {
            Err(Error::AuthenticationFailed)
        }
    }
}

fn load_key(path: &Path) -> Result<Arc<ssh_key::PrivateKey>> {
    load_secret_key(path, None)
        .map(Arc::new)
        .map_err(|e| Error::KeyLoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Output gathered from a channel until the command has exited and closed its streams.
#[derive(Default)]
struct Collected {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<u32>,
    eof: bool,
}

impl Collected {
    /// Fold one message in. Returns true once nothing more is expected.
    fn absorb(&mut self, msg: ChannelMsg) -> bool {
        match msg {
            ChannelMsg::Data { data } => self.stdout.extend_from_slice(&data),
            // ext 1 is stderr
            ChannelMsg::ExtendedData { data, ext: 1 } => self.stderr.extend_from_slice(&data),
            ChannelMsg::ExitStatus { exit_status } => self.exit_code = Some(exit_status),
            ChannelMsg::Eof => self.eof = true,
            ChannelMsg::Close => return true,
            _ => {}
        }
        self.eof && self.exit_code.is_some()
    }

    fn finish(self) -> Result<CommandOutput> {
        // a channel that closes without an exit status lost its connection
        let exit_code = self.exit_code.ok_or(Error::ChannelClosed)?;
        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
        })
    }
}

/// An authenticated SSH connection. Each command gets its own channel.
pub struct Session {
    endpoint: String,
    handle: Handle<HostKeyCheck>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connect and authenticate.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let endpoint = config.endpoint();
        let identity = Identity::resolve(config.key_path.as_deref()).await?;

        let check = HostKeyCheck {
            host: config.host.clone(),
            port: config.port,
            policy: config.host_keys,
            known_hosts: config.known_hosts.clone(),
        };
        let russh_config = Config {
            inactivity_timeout: Some(INACTIVITY_TIMEOUT),
            ..Default::default()
        };

        tracing::debug!(endpoint = %endpoint, "connecting");
        let mut handle = client::connect(
            Arc::new(russh_config),
            (config.host.as_str(), config.port),
            check,
        )
        .await
        .map_err(|e| Error::Connection(format!("{}:{}: {}", config.host, config.port, e)))?;

        identity.authenticate(&mut handle, &config.user).await?;
        Ok(Self { endpoint, handle })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run a command, giving up after `timeout`.
    pub async fn exec(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        self.run(command, None, timeout).await
    }

    /// Run a command with `input` written to its stdin.
    pub async fn exec_with_input(
        &self,
        command: &str,
        input: &[u8],
        timeout: Duration,
    ) -> Result<CommandOutput> {
        self.run(command, Some(input), timeout).await
    }

    async fn run(
        &self,
        command: &str,
        input: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        tokio::time::timeout(timeout, async {
            let mut channel = self
                .handle
                .channel_open_session()
                .await
                .map_err(|e| Error::Channel(format!("open: {}", e)))?;
            channel
                .exec(true, command)
                .await
                .map_err(|e| Error::Channel(format!("exec: {}", e)))?;
            if let Some(input) = input {
                send_input(&channel, input).await?;
            }
            collect(&mut channel).await
        })
        .await
        .map_err(|_| Error::CommandTimeout(timeout))?
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)
    }
}

async fn send_input(channel: &Channel<Msg>, input: &[u8]) -> Result<()> {
    channel
        .data(input)
        .await
        .map_err(|e| Error::Channel(format!("stdin: {}", e)))?;
    channel
        .eof()
        .await
        .map_err(|e| Error::Channel(format!("stdin eof: {}", e)))
}

async fn collect(channel: &mut Channel<Msg>) -> Result<CommandOutput> {
    let mut collected = Collected::default();
    while let Some(msg) = channel.wait().await {
        if collected.absorb(msg) {
            break;
        }
    }
    collected.finish()
}

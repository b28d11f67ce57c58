// ABOUTME: Per-run cache of open transports keyed by endpoint.
// ABOUTME: Targets sharing a host reuse one connection.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{LocalTransport, SshTransport, Transport, TransportError};
use crate::config::TransportKind;
use crate::deploy::Target;

/// Opens a transport for a resolved target.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &Target) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Connects over SSH or the local shell according to the target's transport kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, target: &Target) -> Result<Arc<dyn Transport>, TransportError> {
        match (target.transport, &target.ssh) {
            (TransportKind::Ssh, Some(server)) => {
                let config = server.ssh_session_config(target.key_path.clone());
                Ok(Arc::new(SshTransport::connect(config).await?))
            }
            _ => Ok(Arc::new(LocalTransport::new())),
        }
    }
}

pub struct TransportPool {
    connector: Arc<dyn Connector>,
    connections: Mutex<HashMap<String, Arc<dyn Transport>>>,
}

impl Default for TransportPool {
    fn default() -> Self {
        Self::new(Arc::new(DefaultConnector))
    }
}

impl std::fmt::Debug for TransportPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPool").finish_non_exhaustive()
    }
}

impl TransportPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Return the open transport for `target`, connecting on first use.
    pub async fn get(&self, target: &Target) -> Result<Arc<dyn Transport>, TransportError> {
        let key = target.endpoint_key();
        // Held across connect so parallel targets on one host share a session.
        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.get(&key) {
            return Ok(Arc::clone(existing));
        }

        tracing::debug!(target_id = %target.id, endpoint = %key, "opening transport");
        let transport = self.connector.connect(target).await?;
        connections.insert(key, Arc::clone(&transport));
        Ok(transport)
    }

    /// Close every open transport. Failures are returned per endpoint.
    pub async fn close_all(&self) -> Vec<(String, TransportError)> {
        let connections: Vec<_> = self.connections.lock().await.drain().collect();
        let mut failures = Vec::new();
        for (key, transport) in connections {
            if let Err(e) = transport.close().await {
                failures.push((key, e));
            }
        }
        failures
    }
}

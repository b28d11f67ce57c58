// ABOUTME: Backup inspection and pruning commands.
// ABOUTME: Lists persisted backup records and deletes old snapshots of a target.

use stagehand::config::Config;
use stagehand::deploy::{
    BackupManager, CancelToken, HealthVerifier, HttpProbe, Remote, StateStore, TargetResolver,
    TransportResultExt,
};
use stagehand::error::Result;
use stagehand::output::Output;
use stagehand::transport::TransportPool;
use stagehand::types::{EnvironmentName, ServiceId};
use std::sync::Arc;

/// List backups, optionally narrowed to an environment and service.
pub fn backups(
    config: &Config,
    environment: Option<&str>,
    service: Option<&str>,
    output: &Output,
) -> Result<i32> {
    let environment = environment.map(EnvironmentName::new).transpose()?;
    let service = service.map(ServiceId::new).transpose()?;
    let store = StateStore::open(config.state_dir())?;

    let records: Vec<_> = store
        .list_backups()?
        .into_iter()
        .filter(|record| match record.target.parts() {
            Ok((env, svc)) => {
                environment.as_ref().is_none_or(|e| *e == env)
                    && service.as_ref().is_none_or(|s| *s == svc)
            }
            Err(_) => false,
        })
        .collect();

    if records.is_empty() {
        output.progress("No backups recorded");
    }
    output.backups(&records);
    Ok(0)
}

/// Keep the newest `keep` backups of one target and delete the rest.
pub async fn prune(
    config: &Config,
    environment: &str,
    service: &str,
    keep: usize,
    output: &Output,
) -> Result<i32> {
    let environment = EnvironmentName::new(environment)?;
    let service = ServiceId::new(service)?;
    let target = TargetResolver::new(config).resolve(&environment, &service)?;
    let store = StateStore::open(config.state_dir())?;

    let pool = TransportPool::default();
    let transport = pool.get(&target).await.context_connection(&target.id)?;
    let remote = Remote::new(target, transport);

    let cancel = CancelToken::new();
    let verifier = HealthVerifier::new(Arc::new(HttpProbe::new()?), cancel.clone());
    let manager = BackupManager::new(store, verifier, cancel);
    let removed = manager.prune(Some(&remote), remote.id(), keep).await?;

    for (endpoint, e) in pool.close_all().await {
        output.warning(&format!("failed to close session to {}: {}", endpoint, e));
    }
    output.success(&format!(
        "Removed {} backup(s) of {}, kept at most {}",
        removed.len(),
        remote.id(),
        keep
    ));
    Ok(0)
}

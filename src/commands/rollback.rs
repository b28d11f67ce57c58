// ABOUTME: Rollback command implementation.
// ABOUTME: Restores a single recorded backup on its target, outside of any run.

use stagehand::config::Config;
use stagehand::deploy::{
    BackupManager, CancelToken, DeployError, DeployLock, HealthVerifier, HttpProbe, Remote,
    StateStore, TargetResolver, TransportResultExt,
};
use stagehand::diagnostics::{Diagnostics, Warning};
use stagehand::error::Result;
use stagehand::output::Output;
use stagehand::transport::TransportPool;
use stagehand::types::{BackupId, RunId, ServiceId};
use std::sync::Arc;

/// Restore `backup` on `service`. Exit code 0 when restored, 1 otherwise.
///
/// Ignores interrupts once the restore has started.
pub async fn rollback(config: Config, service: &str, backup: &str, mut output: Output) -> Result<i32> {
    output.start_timer();
    let service = ServiceId::new(service)?;
    let store = StateStore::open(config.state_dir())?;
    let record = store.load_backup(&BackupId::new(backup))?;
    let (environment, owner) = record.target.parts()?;
    if owner != service {
        return Err(DeployError::BackupNotFound(format!("{} for service {}", backup, service)).into());
    }

    let target = TargetResolver::new(&config).resolve(&environment, &service)?;
    let pool = TransportPool::default();
    let transport = pool.get(&target).await.context_connection(&target.id)?;
    let remote = Remote::new(target, transport);
    let mut diag = Diagnostics::default();

    let cancel = CancelToken::new();
    let verifier = HealthVerifier::new(Arc::new(HttpProbe::new()?), cancel.clone());
    let manager = BackupManager::new(store, verifier, cancel);

    let lock = if config.lock {
        output.progress("  → Acquiring deploy lock...");
        Some(DeployLock::acquire(&remote, &RunId::generate(), false).await?)
    } else {
        None
    };

    output.progress(&format!(
        "Restoring {} on {} from backup {}",
        record.artifact, record.target, record.id
    ));
    let result = manager.rollback(&remote, &record).await;

    if let Some(lock) = lock
        && let Err(e) = lock.release().await
    {
        diag.warn(Warning::lock_release(format!(
            "failed to release lock on {}: {}",
            record.target, e
        )));
    }
    for (endpoint, e) in pool.close_all().await {
        diag.warn(Warning::transport_close(format!(
            "failed to close session to {}: {}",
            endpoint, e
        )));
    }
    for warning in diag.warnings() {
        output.warning(&warning.message);
    }

    if result.restored() {
        output.success(&format!("Restored {} on {}", record.artifact, record.target));
        Ok(0)
    } else {
        output.error(&format!(
            "ROLLBACK FAILED on {}: {}; target may be inconsistent",
            record.target, result.detail
        ));
        Ok(1)
    }
}

// ABOUTME: Artifact Transfer: stages artifacts next to their destination and swaps them in.
// ABOUTME: Overwrites need a covering backup token or an explicit first-deploy opt-out.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

use crate::plan::{Artifact, ArtifactKind};
use crate::transport::shell_quote as q;
use crate::types::{RunId, TargetId};

use super::backup::BackupToken;
use super::cancel::CancelToken;
use super::error::TransportResultExt;
use super::remote::{HOUSEKEEPING_TIMEOUT, PathKind, Remote, parent_dir};
use super::{DeployError, elapsed_ms};

/// Permission to replace whatever is at the destination.
#[derive(Debug, Clone, Copy)]
pub enum Overwrite<'a> {
    /// A verified backup covers the destination.
    Backed(&'a BackupToken),
    /// Clean host: the destination must not exist yet.
    FirstDeploy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    pub artifact: String,
    pub version: String,
    pub target: TargetId,
    pub destination: String,
    pub bytes: u64,
    pub checksum: String,
    /// Whether something existed at the destination before.
    pub replaced: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ArtifactTransfer {
    cancel: CancelToken,
}

impl ArtifactTransfer {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    /// Move `artifact` to `destination` on the target.
    ///
    /// The destination is never partially written: the payload is staged at
    /// `<destination>.stagehand-<run>.tmp`, checksummed, then renamed into place.
    pub async fn transfer(
        &self,
        remote: &Remote,
        artifact: &Artifact,
        destination: &str,
        overwrite: Overwrite<'_>,
        run_id: &RunId,
        timeout: Duration,
    ) -> Result<TransferResult, DeployError> {
        let start = Instant::now();
        if self.cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }
        artifact
            .check_local()
            .map_err(|e| DeployError::transfer(remote.id(), e))?;

        let existing = remote.path_kind(destination, DeployError::transfer).await?;
        check_overwrite(remote.id(), artifact, destination, existing, overwrite)?;

        let payload = pack(artifact)
            .await
            .map_err(|e| DeployError::transfer(remote.id(), format!("failed to read {}: {}", artifact.path.display(), e)))?;
        let checksum = format!("{:x}", Sha256::digest(&payload));
        let bytes = payload.len() as u64;

        let staged = format!("{}.stagehand-{}.tmp", destination.trim_end_matches('/'), run_id.short());
        let upload_path = match artifact.kind {
            ArtifactKind::Binary => staged.clone(),
            ArtifactKind::StaticBundle => format!("{}.tar", staged),
        };

        tracing::info!(
            target_id = %remote.id(),
            artifact = %artifact.name,
            version = %artifact.version,
            destination,
            bytes,
            "transferring"
        );

        let outcome = self
            .stage_and_swap(remote, artifact, destination, &staged, &upload_path, &payload, &checksum, run_id, timeout)
            .await;
        if outcome.is_err() {
            remote
                .step_quietly(&format!("rm -rf {} {}", q(&staged), q(&upload_path)))
                .await;
        }
        outcome?;

        Ok(TransferResult {
            artifact: artifact.name.clone(),
            version: artifact.version.clone(),
            target: remote.id().clone(),
            destination: destination.to_string(),
            bytes,
            checksum,
            replaced: existing != PathKind::Absent,
            duration_ms: elapsed_ms(start),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn stage_and_swap(
        &self,
        remote: &Remote,
        artifact: &Artifact,
        destination: &str,
        staged: &str,
        upload_path: &str,
        payload: &[u8],
        checksum: &str,
        run_id: &RunId,
        timeout: Duration,
    ) -> Result<(), DeployError> {
        remote
            .step(
                &format!("mkdir -p {}", q(parent_dir(destination))),
                HOUSEKEEPING_TIMEOUT,
                DeployError::transfer,
            )
            .await?;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DeployError::Cancelled),
            uploaded = remote.transport.upload(payload, upload_path, timeout) => {
                uploaded.context_transfer(remote.id())?;
            }
        }

        let remote_sum = remote.sha256(upload_path, DeployError::transfer).await?;
        if remote_sum != checksum {
            return Err(DeployError::transfer(
                remote.id(),
                format!("checksum mismatch after upload: {} != {}", remote_sum, checksum),
            ));
        }

        // Last chance to back out; the swap itself is not interruptible.
        if self.cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        let swap = match artifact.kind {
            ArtifactKind::Binary => {
                format!(
                    "chmod {:o} {staged} && mv -f {staged} {dest}",
                    local_mode(artifact),
                    staged = q(staged),
                    dest = q(destination),
                )
            }
            ArtifactKind::StaticBundle => {
                let old = format!("{}.stagehand-old-{}", destination.trim_end_matches('/'), run_id.short());
                format!(
                    "rm -rf {staged} {old} && mkdir -p {staged} && tar -xf {tarball} -C {staged} \
                     && rm -f {tarball} && if [ -e {dest} ]; then mv {dest} {old}; fi \
                     && mv {staged} {dest} && rm -rf {old}",
                    staged = q(staged),
                    old = q(&old),
                    tarball = q(upload_path),
                    dest = q(destination),
                )
            }
        };
        remote
            .step(&swap, HOUSEKEEPING_TIMEOUT, DeployError::transfer)
            .await?;
        Ok(())
    }
}

fn check_overwrite(
    target: &TargetId,
    artifact: &Artifact,
    destination: &str,
    existing: PathKind,
    overwrite: Overwrite<'_>,
) -> Result<(), DeployError> {
    match (artifact.kind, existing) {
        (ArtifactKind::Binary, PathKind::Directory) => {
            return Err(DeployError::transfer(
                target,
                format!("{} is a directory; artifact {} is a file", destination, artifact.name),
            ));
        }
        (ArtifactKind::StaticBundle, PathKind::File) => {
            return Err(DeployError::transfer(
                target,
                format!("{} is a file; artifact {} is a directory", destination, artifact.name),
            ));
        }
        _ => {}
    }

    match overwrite {
        Overwrite::Backed(token) if !token.covers(target, destination) => Err(DeployError::transfer(
            target,
            format!("backup {} does not cover {}", token.backup_id(), destination),
        )),
        Overwrite::FirstDeploy if existing != PathKind::Absent => Err(DeployError::transfer(
            target,
            format!("{} already exists; first deploy refuses to overwrite it without a backup", destination),
        )),
        _ => Ok(()),
    }
}

/// Read a binary or tar up a bundle. Runs on the blocking pool.
async fn pack(artifact: &Artifact) -> std::io::Result<Vec<u8>> {
    let path = artifact.path.clone();
    let kind = artifact.kind;
    tokio::task::spawn_blocking(move || match kind {
        ArtifactKind::Binary => std::fs::read(&path),
        ArtifactKind::StaticBundle => {
            let mut builder = tar::Builder::new(Vec::new());
            builder.append_dir_all(".", &path)?;
            builder.into_inner()
        }
    })
    .await
    .map_err(std::io::Error::other)?
}

fn local_mode(artifact: &Artifact) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(&artifact.path)
        .map(|m| m.permissions().mode() & 0o7777)
        .unwrap_or(0o644)
}

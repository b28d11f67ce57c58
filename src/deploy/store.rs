// ABOUTME: Durable local storage for backup records and deployment reports.
// ABOUTME: JSON files written via temp file + rename so readers never see partial writes.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use crate::types::{BackupId, RunId, TargetId};

use super::backup::BackupRecord;
use super::report::DeploymentReport;
use super::DeployError;

const RUNS_DIR: &str = "runs";
const BACKUPS_DIR: &str = "backups";

/// State directory layout: `runs/<run-id>.json` and `backups/<backup-id>.json`.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// Open (and create if needed) a state directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, DeployError> {
        let store = Self { root: root.into() };
        for dir in [store.runs_dir(), store.backups_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                DeployError::storage(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join(RUNS_DIR)
    }

    fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    pub fn report_path(&self, run: &RunId) -> PathBuf {
        self.runs_dir().join(format!("{}.json", run))
    }

    fn backup_path(&self, id: &BackupId) -> PathBuf {
        self.backups_dir().join(format!("{}.json", id))
    }

    pub fn save_report(&self, report: &DeploymentReport) -> Result<PathBuf, DeployError> {
        let path = self.report_path(&report.run_id);
        write_json(&path, report)?;
        Ok(path)
    }

    pub fn load_report(&self, run: &RunId) -> Result<Option<DeploymentReport>, DeployError> {
        let path = self.report_path(run);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    /// Report with the newest `finished_at`.
    pub fn latest_report(&self) -> Result<Option<DeploymentReport>, DeployError> {
        let reports: Vec<DeploymentReport> = read_all(&self.runs_dir())?;
        Ok(reports.into_iter().max_by_key(|r| r.finished_at))
    }

    pub fn save_backup(&self, record: &BackupRecord) -> Result<(), DeployError> {
        write_json(&self.backup_path(&record.id), record)
    }

    pub fn load_backup(&self, id: &BackupId) -> Result<BackupRecord, DeployError> {
        let path = self.backup_path(id);
        if !path.exists() {
            return Err(DeployError::BackupNotFound(id.to_string()));
        }
        read_json(&path)
    }

    /// All records, oldest first.
    pub fn list_backups(&self) -> Result<Vec<BackupRecord>, DeployError> {
        let mut records: Vec<BackupRecord> = read_all(&self.backups_dir())?;
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    pub fn backups_for(&self, target: &TargetId) -> Result<Vec<BackupRecord>, DeployError> {
        Ok(self
            .list_backups()?
            .into_iter()
            .filter(|r| &r.target == target)
            .collect())
    }

    pub fn delete_backup(&self, id: &BackupId) -> Result<(), DeployError> {
        match std::fs::remove_file(self.backup_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeployError::storage(format!("failed to delete backup {}: {}", id, e))),
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), DeployError> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| DeployError::storage(format!("failed to serialize {}: {}", path.display(), e)))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .and_then(|_| std::fs::rename(&tmp, path))
        .map_err(|e| DeployError::storage(format!("failed to write {}: {}", path.display(), e)))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, DeployError> {
    let content = std::fs::read(path)
        .map_err(|e| DeployError::storage(format!("failed to read {}: {}", path.display(), e)))?;
    serde_json::from_slice(&content)
        .map_err(|e| DeployError::storage(format!("corrupt state file {}: {}", path.display(), e)))
}

/// Read every `*.json` in `dir`. Unreadable files are skipped with a warning.
fn read_all<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, DeployError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(DeployError::storage(format!("failed to list {}: {}", dir.display(), e)));
        }
    };

    let mut items = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        match read_json(&path) {
            Ok(item) => items.push(item),
            Err(e) => tracing::warn!("skipping {}: {}", path.display(), e),
        }
    }
    Ok(items)
}

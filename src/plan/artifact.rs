// ABOUTME: Deployable artifacts produced by an external build step.
// ABOUTME: Read-only to the orchestrator.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// A single file such as a JAR or executable.
    Binary,
    /// A directory tree such as a static site bundle.
    StaticBundle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Name from the plan's artifact table.
    #[serde(default)]
    pub name: String,
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub version: String,
}

impl Artifact {
    /// Check that the local path matches the declared kind.
    pub fn check_local(&self) -> Result<(), String> {
        let meta = std::fs::metadata(&self.path)
            .map_err(|e| format!("artifact {} at {}: {}", self.name, self.path.display(), e))?;

        match self.kind {
            ArtifactKind::Binary if !meta.is_file() => Err(format!(
                "artifact {} must be a file: {}",
                self.name,
                self.path.display()
            )),
            ArtifactKind::StaticBundle if !meta.is_dir() => Err(format!(
                "artifact {} must be a directory: {}",
                self.name,
                self.path.display()
            )),
            _ => Ok(()),
        }
    }
}

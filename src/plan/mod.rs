// ABOUTME: Declarative deployment plans: ordered stages, artifacts and actions.
// ABOUTME: Loaded once per invocation from YAML and never mutated during a run.

mod artifact;
mod health;
mod serde_helpers;
mod stage;

pub use artifact::{Artifact, ArtifactKind};
pub use health::{HealthCheckSpec, StatusRange};
pub use stage::{Action, BackupAction, Criticality, ExecuteAction, Stage, TransferAction};

use crate::deploy::DeployError;
use crate::error::Result;
use crate::types::EnvironmentName;
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

pub const PLAN_FILENAME: &str = "deploy-plan.yml";

/// A plan file as written on disk, before an environment is chosen.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanFile {
    #[serde(default)]
    pub artifacts: BTreeMap<String, Artifact>,

    #[serde(deserialize_with = "serde_helpers::deserialize_nonempty")]
    pub stages: NonEmpty<Stage>,
}

impl PlanFile {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut plan: PlanFile = serde_yaml::from_str(yaml)?;
        for (name, artifact) in plan.artifacts.iter_mut() {
            artifact.name = name.clone();
        }
        plan.validate()?;
        Ok(plan)
    }

    /// Load a plan file; relative artifact paths resolve against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut plan = Self::from_yaml(&content)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for artifact in plan.artifacts.values_mut() {
            if artifact.path.is_relative() {
                artifact.path = base.join(&artifact.path);
            }
        }
        Ok(plan)
    }

    fn validate(&self) -> std::result::Result<(), DeployError> {
        let mut names = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(DeployError::invalid_plan("stage name cannot be empty"));
            }
            if !names.insert(stage.name.as_str()) {
                return Err(DeployError::invalid_plan(format!(
                    "duplicate stage name '{}'",
                    stage.name
                )));
            }
            stage.validate(&self.artifacts)?;
        }

        for artifact in self.artifacts.values() {
            if artifact.version.trim().is_empty() {
                return Err(DeployError::invalid_plan(format!(
                    "artifact '{}' has an empty version",
                    artifact.name
                )));
            }
        }

        Ok(())
    }
}

/// The top-level input of a run: an environment plus its ordered stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub environment: EnvironmentName,
    #[serde(
        serialize_with = "serde_helpers::serialize_nonempty",
        deserialize_with = "serde_helpers::deserialize_nonempty"
    )]
    pub stages: NonEmpty<Stage>,
    pub artifacts: BTreeMap<String, Artifact>,
    /// Plan file the plan was loaded from.
    #[serde(default)]
    pub source: Option<PathBuf>,
}

impl DeploymentPlan {
    pub fn new(environment: EnvironmentName, file: PlanFile) -> Self {
        Self {
            environment,
            stages: file.stages,
            artifacts: file.artifacts,
            source: None,
        }
    }

    pub fn load(path: &Path, environment: EnvironmentName) -> Result<Self> {
        let file = PlanFile::load(path)?;
        let mut plan = Self::new(environment, file);
        plan.source = Some(path.to_path_buf());
        Ok(plan)
    }

    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.name.as_str())
    }
}

// ABOUTME: Validated environment names and composite target identifiers.
// ABOUTME: A target id names one (environment, service) deployment destination.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::service_id::{NameError, ServiceId, validate_label};

/// Name of a deployment environment such as `staging` or `production`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EnvironmentName(String);

impl EnvironmentName {
    pub fn new(value: &str) -> Result<Self, NameError> {
        validate_label("environment name", value)?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EnvironmentName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_label("environment name", &value)?;
        Ok(Self(value))
    }
}

impl From<EnvironmentName> for String {
    fn from(name: EnvironmentName) -> Self {
        name.0
    }
}

impl fmt::Display for EnvironmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `environment/service` key. Used for locks, backups and report attribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(environment: &EnvironmentName, service: &ServiceId) -> Self {
        Self(format!("{}/{}", environment, service))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split back into its environment and service.
    pub fn parts(&self) -> Result<(EnvironmentName, ServiceId), NameError> {
        let (environment, service) = self.0.split_once('/').unwrap_or((self.0.as_str(), ""));
        Ok((EnvironmentName::new(environment)?, ServiceId::new(service)?))
    }

    /// File-name safe form (`staging-api`).
    pub fn file_stem(&self) -> String {
        self.0.replace('/', "-")
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_id_joins_environment_and_service() {
        let env = EnvironmentName::new("staging").unwrap();
        let svc = ServiceId::new("api").unwrap();
        let id = TargetId::new(&env, &svc);
        assert_eq!(id.as_str(), "staging/api");
        assert_eq!(id.file_stem(), "staging-api");
        assert_eq!(id.parts().unwrap(), (env, svc));
    }

    #[test]
    fn environment_name_rejects_uppercase() {
        assert!(EnvironmentName::new("Prod").is_err());
    }
}

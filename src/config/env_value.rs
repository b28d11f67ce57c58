// ABOUTME: Config values with environment variable indirection.
// ABOUTME: Used for credential references so secrets stay out of config files.

use crate::error::{Error, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl EnvValue {
    pub fn resolve(&self) -> Result<String> {
        match self {
            EnvValue::Literal(s) => Ok(s.clone()),
            EnvValue::FromEnv { var, default } => match std::env::var(var) {
                Ok(val) => Ok(val),
                Err(_) => default
                    .clone()
                    .ok_or_else(|| Error::MissingEnvVar(var.clone())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_resolves_to_itself() {
        let v = EnvValue::Literal("/keys/deploy".to_string());
        assert_eq!(v.resolve().unwrap(), "/keys/deploy");
    }

    #[test]
    fn env_reference_reads_variable() {
        temp_env::with_var("STAGEHAND_TEST_KEY", Some("/keys/from-env"), || {
            let v: EnvValue = serde_yaml::from_str("env: STAGEHAND_TEST_KEY").unwrap();
            assert_eq!(v.resolve().unwrap(), "/keys/from-env");
        });
    }

    #[test]
    fn missing_env_uses_default_or_errors() {
        temp_env::with_var_unset("STAGEHAND_TEST_MISSING", || {
            let with_default: EnvValue =
                serde_yaml::from_str("{env: STAGEHAND_TEST_MISSING, default: /fallback}").unwrap();
            assert_eq!(with_default.resolve().unwrap(), "/fallback");

            let without: EnvValue = serde_yaml::from_str("env: STAGEHAND_TEST_MISSING").unwrap();
            assert!(matches!(without.resolve(), Err(Error::MissingEnvVar(v)) if v == "STAGEHAND_TEST_MISSING"));
        });
    }
}

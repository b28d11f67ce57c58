// ABOUTME: DNS-compatible service identifier validation.
// ABOUTME: Ensures service ids follow RFC 1123 label requirements.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("{0} exceeds maximum length of 63 characters")]
    TooLong(&'static str),

    #[error("{0} cannot start with a hyphen")]
    StartsWithHyphen(&'static str),

    #[error("{0} cannot end with a hyphen")]
    EndsWithHyphen(&'static str),

    #[error("{0} must be lowercase")]
    NotLowercase(&'static str),

    #[error("invalid character in {0}: '{1}'")]
    InvalidChar(&'static str, char),
}

/// Validate an RFC 1123 label. Shared by service ids and environment names.
pub(crate) fn validate_label(what: &'static str, value: &str) -> Result<(), NameError> {
    if value.is_empty() {
        return Err(NameError::Empty(what));
    }

    if value.len() > 63 {
        return Err(NameError::TooLong(what));
    }

    if value.starts_with('-') {
        return Err(NameError::StartsWithHyphen(what));
    }

    if value.ends_with('-') {
        return Err(NameError::EndsWithHyphen(what));
    }

    for c in value.chars() {
        if c.is_ascii_uppercase() {
            return Err(NameError::NotLowercase(what));
        }
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return Err(NameError::InvalidChar(what, c));
        }
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(value: &str) -> Result<Self, NameError> {
        validate_label("service id", value)?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ServiceId {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_label("service id", &value)?;
        Ok(Self(value))
    }
}

impl From<ServiceId> for String {
    fn from(id: ServiceId) -> Self {
        id.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

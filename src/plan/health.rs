// ABOUTME: Health check declarations as written in a plan.
// ABOUTME: Resolved per target into concrete probes by the deploy layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    /// Absolute URL to probe.
    #[serde(default)]
    pub url: Option<String>,

    /// Path appended to the target's base URL.
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub expected_status: StatusRange,

    /// Substring the response body must contain.
    #[serde(default)]
    pub body_contains: Option<String>,

    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-request timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl HealthCheckSpec {
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            url: None,
            path: Some(path.into()),
            expected_status: StatusRange::default(),
            body_contains: None,
            interval: default_interval(),
            max_attempts: default_max_attempts(),
            timeout: default_timeout(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match (&self.url, &self.path) {
            (Some(_), Some(_)) => return Err("health check takes either url or path, not both".to_string()),
            (None, None) => return Err("health check requires url or path".to_string()),
            (Some(url), None) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                return Err(format!("health check url must be http(s): {}", url));
            }
            (None, Some(path)) if !path.starts_with('/') => {
                return Err(format!("health check path must start with '/': {}", path));
            }
            _ => {}
        }
        if self.max_attempts == 0 {
            return Err("health check max_attempts must be at least 1".to_string());
        }
        Ok(())
    }

    /// Full URL for a target whose services live under `base_url`.
    pub fn url_for(&self, base_url: &str) -> String {
        match (&self.url, &self.path) {
            (Some(url), _) => url.clone(),
            (None, Some(path)) => format!("{}{}", base_url.trim_end_matches('/'), path),
            (None, None) => base_url.to_string(),
        }
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_attempts() -> u32 {
    12
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Inclusive range of acceptable HTTP status codes.
///
/// Written in YAML as a single code (`200`) or a range (`"200-299"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StatusRangeRepr", into = "String")]
pub struct StatusRange {
    low: u16,
    high: u16,
}

impl StatusRange {
    pub fn new(low: u16, high: u16) -> Result<Self, String> {
        if !(100..=599).contains(&low) || !(100..=599).contains(&high) {
            return Err(format!("status codes must be within 100-599: {}-{}", low, high));
        }
        if low > high {
            return Err(format!("invalid status range {}-{}", low, high));
        }
        Ok(Self { low, high })
    }

    pub fn exact(code: u16) -> Result<Self, String> {
        Self::new(code, code)
    }

    pub fn contains(&self, status: u16) -> bool {
        (self.low..=self.high).contains(&status)
    }
}

impl Default for StatusRange {
    fn default() -> Self {
        Self { low: 200, high: 299 }
    }
}

impl fmt::Display for StatusRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.low == self.high {
            write!(f, "{}", self.low)
        } else {
            write!(f, "{}-{}", self.low, self.high)
        }
    }
}

impl From<StatusRange> for String {
    fn from(range: StatusRange) -> Self {
        range.to_string()
    }
}

impl std::str::FromStr for StatusRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<u16>()
                .map_err(|_| format!("invalid status code: {}", v.trim()))
        };
        match s.split_once('-') {
            Some((low, high)) => Self::new(parse(low)?, parse(high)?),
            None => Self::exact(parse(s)?),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StatusRangeRepr {
    Code(u16),
    Text(String),
}

impl TryFrom<StatusRangeRepr> for StatusRange {
    type Error = String;

    fn try_from(repr: StatusRangeRepr) -> Result<Self, Self::Error> {
        match repr {
            StatusRangeRepr::Code(code) => Self::exact(code),
            StatusRangeRepr::Text(text) => text.parse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_range_forms() {
        let single: StatusRange = serde_yaml::from_str("204").unwrap();
        assert!(single.contains(204));
        assert!(!single.contains(200));

        let range: StatusRange = serde_yaml::from_str("\"200-299\"").unwrap();
        assert!(range.contains(250));
        assert!(!range.contains(301));

        let quoted: StatusRange = serde_yaml::from_str("\"503\"").unwrap();
        assert_eq!(quoted, StatusRange::exact(503).unwrap());
    }

    #[test]
    fn status_range_rejects_bad_input() {
        assert!(serde_yaml::from_str::<StatusRange>("\"299-200\"").is_err());
        assert!(serde_yaml::from_str::<StatusRange>("42").is_err());
        assert!(serde_yaml::from_str::<StatusRange>("\"abc\"").is_err());
    }

    #[test]
    fn status_range_displays_compactly() {
        assert_eq!(StatusRange::default().to_string(), "200-299");
        assert_eq!(StatusRange::exact(200).unwrap().to_string(), "200");
    }

    #[test]
    fn spec_defaults() {
        let spec: HealthCheckSpec = serde_yaml::from_str("path: /health\n").unwrap();
        assert_eq!(spec.interval, Duration::from_secs(5));
        assert_eq!(spec.max_attempts, 12);
        assert_eq!(spec.expected_status, StatusRange::default());
        spec.validate().unwrap();
    }

    #[test]
    fn spec_requires_exactly_one_location() {
        let both: HealthCheckSpec =
            serde_yaml::from_str("path: /health\nurl: http://x/health\n").unwrap();
        assert!(both.validate().is_err());

        let neither: HealthCheckSpec = serde_yaml::from_str("max_attempts: 3\n").unwrap();
        assert!(neither.validate().is_err());
    }

    #[test]
    fn zero_attempts_rejected() {
        let spec: HealthCheckSpec = serde_yaml::from_str("path: /h\nmax_attempts: 0\n").unwrap();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn url_for_joins_base_and_path() {
        let spec = HealthCheckSpec::for_path("/health");
        assert_eq!(spec.url_for("http://api:8080/"), "http://api:8080/health");

        let mut absolute = spec.clone();
        absolute.url = Some("https://lb/ping".to_string());
        absolute.path = None;
        assert_eq!(absolute.url_for("http://api:8080"), "https://lb/ping");
    }
}

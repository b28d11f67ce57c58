// ABOUTME: Health Verifier: polls an HTTP(S) endpoint until healthy or out of attempts.
// ABOUTME: "Not healthy yet" is a normal result, never an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::plan::{HealthCheckSpec, StatusRange};
use crate::types::TargetId;

use super::cancel::CancelToken;
use super::resolver::Target;
use super::{DeployError, elapsed_ms};

/// A health check resolved against one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub target: TargetId,
    pub url: String,
    pub expected_status: StatusRange,
    #[serde(default)]
    pub body_contains: Option<String>,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl HealthCheck {
    pub fn resolve(spec: &HealthCheckSpec, target: &Target) -> Result<Self, DeployError> {
        let url = match (&spec.url, &target.base_url) {
            (Some(url), _) => url.clone(),
            (None, Some(base)) => spec.url_for(base),
            (None, None) => {
                return Err(DeployError::InvalidTarget {
                    target: target.id.clone(),
                    message: "health check path needs a base_url or port".to_string(),
                });
            }
        };

        Ok(Self {
            target: target.id.clone(),
            url,
            expected_status: spec.expected_status,
            body_contains: spec.body_contains.clone(),
            interval: spec.interval,
            max_attempts: spec.max_attempts.max(1),
            timeout: spec.timeout,
        })
    }
}

/// Raw response from one probe.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

/// One request against a health endpoint.
#[async_trait]
pub trait Probe: Send + Sync {
    /// `Err` means no response (connection refused, timeout, TLS failure).
    async fn probe(&self, url: &str, timeout: Duration) -> Result<ProbeResponse, String>;
}

/// Probe over reqwest with rustls.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self, DeployError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("stagehand/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DeployError::HttpClient(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, url: &str, timeout: Duration) -> Result<ProbeResponse, String> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| e.to_string())?;
        Ok(ProbeResponse { status, body })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub url: String,
    pub healthy: bool,
    pub attempts: u32,
    pub last_status: Option<u16>,
    pub last_error: Option<String>,
    pub elapsed_ms: u64,
}

impl HealthResult {
    /// Short description of the last failed attempt.
    pub fn failure_detail(&self) -> String {
        match (&self.last_error, self.last_status) {
            (Some(err), _) => err.clone(),
            (None, Some(status)) => format!("last status {}", status),
            (None, None) => "no response".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct HealthVerifier {
    probe: Arc<dyn Probe>,
    cancel: CancelToken,
}

impl std::fmt::Debug for HealthVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthVerifier").finish_non_exhaustive()
    }
}

impl HealthVerifier {
    pub fn new(probe: Arc<dyn Probe>, cancel: CancelToken) -> Self {
        Self { probe, cancel }
    }

    /// Same probe, different cancellation scope.
    pub fn with_cancel(&self, cancel: CancelToken) -> Self {
        Self {
            probe: Arc::clone(&self.probe),
            cancel,
        }
    }

    /// Poll until the check passes or `max_attempts` probes have been made.
    ///
    /// Sleeps only between attempts. Cancellation ends the loop unhealthy.
    pub async fn wait_for_healthy(&self, check: &HealthCheck) -> HealthResult {
        let start = Instant::now();
        let max_attempts = check.max_attempts.max(1);
        let mut result = HealthResult {
            url: check.url.clone(),
            healthy: false,
            attempts: 0,
            last_status: None,
            last_error: None,
            elapsed_ms: 0,
        };

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                result.last_error = Some("cancelled".to_string());
                break;
            }

            result.attempts = attempt;
            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    result.last_error = Some("cancelled".to_string());
                    break;
                }
                response = self.probe.probe(&check.url, check.timeout) => response,
            };

            match response {
                Ok(response) => {
                    result.last_status = Some(response.status);
                    result.last_error = evaluate(check, &response).err();
                }
                Err(e) => {
                    result.last_status = None;
                    result.last_error = Some(e);
                }
            }

            if result.last_error.is_none() {
                result.healthy = true;
                break;
            }

            tracing::debug!(
                target_id = %check.target,
                url = %check.url,
                attempt,
                max_attempts,
                detail = %result.failure_detail(),
                "health check not passing yet"
            );

            if attempt < max_attempts {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        result.last_error = Some("cancelled".to_string());
                        break;
                    }
                    _ = tokio::time::sleep(check.interval) => {}
                }
            }
        }

        result.elapsed_ms = elapsed_ms(start);
        if result.healthy {
            tracing::info!(target_id = %check.target, url = %check.url, attempts = result.attempts, "healthy");
        } else {
            tracing::warn!(target_id = %check.target, url = %check.url, attempts = result.attempts, "unhealthy");
        }
        result
    }
}

fn evaluate(check: &HealthCheck, response: &ProbeResponse) -> Result<(), String> {
    if !check.expected_status.contains(response.status) {
        return Err(format!(
            "status {} outside expected {}",
            response.status, check.expected_status
        ));
    }
    if let Some(needle) = &check.body_contains
        && !response.body.contains(needle.as_str())
    {
        return Err(format!("body does not contain '{}'", needle));
    }
    Ok(())
}

//! Endpoint failover with per-host health tracking.
//!
//! Given an ordered endpoint list, [`FallbackClient`] tries each host
//! strictly in priority order, skipping hosts marked unhealthy until their
//! cool-down window has elapsed. Endpoints are never raced in parallel;
//! quota costs favor sequential fallback over speculative requests.
//!
//! Health bookkeeping: any success resets a host's failure count and marks
//! it healthy. Failures increment the count; at the threshold the host
//! flips unhealthy and is skipped until the cool-down passes, after which
//! the next request probes it again. Only the primary (first) endpoint
//! failing is worth a user-visible warning — secondary hosts failing is
//! expected operation.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// Health bookkeeping for one candidate endpoint.
#[derive(Debug, Clone)]
struct EndpointHealth {
    endpoint: String,
    is_healthy: bool,
    last_checked: Instant,
    failure_count: u32,
}

/// Point-in-time health snapshot for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    /// The endpoint base URL.
    pub endpoint: String,
    /// Whether the endpoint is currently considered healthy.
    pub is_healthy: bool,
    /// Consecutive failures recorded.
    pub failures: u32,
}

/// A POST request to be attempted across the endpoint list.
#[derive(Debug, Clone)]
pub struct FallbackRequest {
    /// Path appended to the endpoint base URL.
    pub path: String,
    /// JSON request body.
    pub body: serde_json::Value,
    /// Bearer token for the `Authorization` header.
    pub bearer: String,
    /// Extra headers to send.
    pub headers: Vec<(String, String)>,
}

/// Sequential-failover HTTP client over a prioritized endpoint list.
pub struct FallbackClient {
    endpoints: Vec<String>,
    client: reqwest::Client,
    request_timeout: Duration,
    cooldown: Duration,
    failure_threshold: u32,
    health: Mutex<Vec<EndpointHealth>>,
}

impl FallbackClient {
    /// Create a client over the given endpoints, all initialized healthy.
    pub fn new(
        endpoints: Vec<String>,
        request_timeout: Duration,
        cooldown: Duration,
        failure_threshold: u32,
    ) -> Self {
        let health = endpoints
            .iter()
            .map(|endpoint| EndpointHealth {
                endpoint: endpoint.clone(),
                is_healthy: true,
                last_checked: Instant::now(),
                failure_count: 0,
            })
            .collect();

        Self {
            endpoints,
            client: reqwest::Client::new(),
            request_timeout,
            cooldown,
            failure_threshold,
            health: Mutex::new(health),
        }
    }

    /// Create a client from the endpoint list and knobs in [`AuthConfig`].
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.endpoints.clone(),
            config.request_timeout,
            config.cooldown,
            config.failure_threshold,
        )
    }

    /// Replace the HTTP client (custom TLS, proxies, tests).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// The endpoint list in priority order.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Whether an endpoint should be attempted right now: healthy, or
    /// unhealthy with the cool-down elapsed since it was last checked.
    pub async fn should_attempt(&self, endpoint: &str) -> bool {
        let health = self.health.lock().await;
        match health.iter().find(|h| h.endpoint == endpoint) {
            Some(h) => h.is_healthy || h.last_checked.elapsed() >= self.cooldown,
            None => false,
        }
    }

    /// Attempt the request against a single endpoint, recording the
    /// outcome in that endpoint's health record.
    pub async fn attempt(
        &self,
        endpoint: &str,
        request: &FallbackRequest,
    ) -> Result<serde_json::Value> {
        debug!(%endpoint, path = %request.path, "Trying endpoint");

        let outcome = tokio::time::timeout(self.request_timeout, async {
            let url = format!("{}{}", endpoint, request.path);
            let mut builder = self
                .client
                .post(&url)
                .bearer_auth(&request.bearer)
                .json(&request.body);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let response = builder.send().await?;
            let status = response.status();
            let body = response.text().await?;

            if !status.is_success() {
                return Ok::<_, reqwest::Error>(Err(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    body
                )));
            }

            match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(value) => Ok(Ok(value)),
                Err(e) => Ok(Err(format!("invalid JSON response: {}", e))),
            }
        })
        .await;

        let result = match outcome {
            Err(_elapsed) => Err(format!(
                "timed out after {}ms",
                self.request_timeout.as_millis()
            )),
            Ok(Err(transport)) => Err(transport.to_string()),
            Ok(Ok(inner)) => inner,
        };

        match result {
            Ok(value) => {
                self.mark_success(endpoint).await;
                Ok(value)
            }
            Err(message) => {
                self.mark_failure(endpoint).await;
                Err(Error::EndpointFailed {
                    endpoint: endpoint.to_string(),
                    message,
                })
            }
        }
    }

    /// Try the request against each endpoint in priority order until one
    /// succeeds. Fails with [`Error::AllEndpointsFailed`] once every
    /// eligible endpoint has been tried.
    pub async fn request_with_fallback(
        &self,
        request: &FallbackRequest,
    ) -> Result<serde_json::Value> {
        let mut last_error: Option<Error> = None;

        for endpoint in &self.endpoints {
            if !self.should_attempt(endpoint).await {
                debug!(%endpoint, "Skipping unhealthy endpoint within cool-down");
                continue;
            }

            match self.attempt(endpoint, request).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!(%endpoint, error = %e, "Endpoint attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(Error::AllEndpointsFailed {
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no endpoint was eligible to attempt".to_string()),
        })
    }

    /// Clear all failure counts and mark every endpoint healthy.
    /// Manual-recovery operation.
    pub async fn reset_health(&self) {
        let mut health = self.health.lock().await;
        for h in health.iter_mut() {
            h.is_healthy = true;
            h.failure_count = 0;
            h.last_checked = Instant::now();
        }
        debug!("All endpoints reset to healthy");
    }

    /// Snapshot of every endpoint's health record.
    pub async fn health_status(&self) -> Vec<EndpointStatus> {
        let health = self.health.lock().await;
        health
            .iter()
            .map(|h| EndpointStatus {
                endpoint: h.endpoint.clone(),
                is_healthy: h.is_healthy,
                failures: h.failure_count,
            })
            .collect()
    }

    async fn mark_success(&self, endpoint: &str) {
        let mut health = self.health.lock().await;
        if let Some(h) = health.iter_mut().find(|h| h.endpoint == endpoint) {
            h.is_healthy = true;
            h.failure_count = 0;
            h.last_checked = Instant::now();
        }
    }

    async fn mark_failure(&self, endpoint: &str) {
        let is_primary = self.endpoints.first().is_some_and(|e| e == endpoint);
        let mut health = self.health.lock().await;
        if let Some(h) = health.iter_mut().find(|h| h.endpoint == endpoint) {
            h.failure_count += 1;
            h.last_checked = Instant::now();

            if h.failure_count >= self.failure_threshold && h.is_healthy {
                h.is_healthy = false;
                if is_primary {
                    warn!(%endpoint, "Primary endpoint marked unhealthy, using fallback");
                } else {
                    debug!(%endpoint, "Endpoint marked unhealthy");
                }
            }
        }
    }
}

//! HTTP readiness probes

use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Result of probing one endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// URL that was probed
    pub url: String,

    /// Whether the endpoint answered 200
    pub healthy: bool,

    /// Round trip in milliseconds
    pub response_time_ms: f64,

    /// Transport error or unexpected status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Probes health endpoints with a shared HTTP client
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
}

impl HealthProbe {
    /// Create a probe whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                debug!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self { client }
    }

    /// GET `url` and report whether it answered 200
    pub async fn check(&self, url: &str) -> HealthReport {
        let started = Instant::now();
        let result = self.client.get(url).send().await;
        let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (healthy, error) = match result {
            Ok(resp) if resp.status() == StatusCode::OK => (true, None),
            Ok(resp) => (false, Some(format!("status {}", resp.status()))),
            Err(e) => (false, Some(e.to_string())),
        };
        debug!(url, healthy, response_time_ms, "health probe");

        HealthReport {
            url: url.to_string(),
            healthy,
            response_time_ms,
            error,
        }
    }

    pub async fn is_healthy(&self, url: &str) -> bool {
        self.check(url).await.healthy
    }
}

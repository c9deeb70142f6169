//! Endpoint liveness probes.

use crate::core::{Error, Result};
use crate::probe::sample::{Sample, SignalKind, HEALTHY, UNHEALTHY};
use crate::probe::Probe;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Slack granted on top of the HTTP timeout before the scheduler gives up
/// on a poll and records missing data instead.
const DEADLINE_SLACK: Duration = Duration::from_secs(1);

/// Liveness check against a region endpoint.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Succeeds only if the endpoint is healthy within `timeout`.
    async fn check(&self, endpoint: &str, timeout: Duration) -> Result<()>;
}

/// `GET <endpoint>/health`, healthy on HTTP 200.
#[derive(Debug, Clone)]
pub struct HttpHealthCheck {
    client: Client,
}

impl HttpHealthCheck {
    /// Create a checker with its own connection pool.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::ProbeConfiguration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn health_url(endpoint: &str) -> String {
        format!("{}/health", endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self, endpoint: &str, timeout: Duration) -> Result<()> {
        let response = self
            .client
            .get(Self::health_url(endpoint))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::ProbeTransient(e.to_string()))?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(Error::ProbeTransient(format!(
                "unexpected status {}",
                response.status()
            )))
        }
    }
}

/// Periodic health probe for one region.
pub struct HealthProbe {
    region: String,
    endpoint: String,
    checker: Arc<dyn HealthCheck>,
    interval: Duration,
    timeout: Duration,
}

impl HealthProbe {
    /// Create a new health probe.
    pub fn new(
        region: &str,
        endpoint: &str,
        checker: Arc<dyn HealthCheck>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
            checker,
            interval,
            timeout,
        }
    }
}

#[async_trait]
impl Probe for HealthProbe {
    fn region(&self) -> &str {
        &self.region
    }

    fn kind(&self) -> SignalKind {
        SignalKind::Health
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn deadline(&self) -> Duration {
        self.timeout + DEADLINE_SLACK
    }

    async fn poll(&self) -> Sample {
        match self.checker.check(&self.endpoint, self.timeout).await {
            Ok(()) => Sample::measured(&self.region, SignalKind::Health, HEALTHY),
            Err(e) => {
                debug!(region = %self.region, error = %e, "health check failed");
                Sample::measured(&self.region, SignalKind::Health, UNHEALTHY)
            }
        }
    }
}

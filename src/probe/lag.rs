//! Replication lag gauges.

use crate::core::{now, Error, Result, Timestamp};
use crate::probe::sample::{Sample, SignalKind};
use crate::probe::Probe;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Latest datapoint of a lag metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LagReading {
    /// Lag in milliseconds
    pub value_ms: f64,
    /// When the datapoint was recorded
    pub timestamp: Timestamp,
}

/// Pull-based lag metric feed.
#[async_trait]
pub trait LagMetricSource: Send + Sync {
    /// Latest datapoint, or `None` when the feed has nothing to report.
    async fn latest_value(&self, metric_id: &str) -> Option<LagReading>;
}

/// Reads `<base>/<metric_id>` returning a JSON `LagReading`.
#[derive(Debug, Clone)]
pub struct HttpLagSource {
    client: Client,
    base: Url,
}

impl HttpLagSource {
    /// Create a source for the given base URL.
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(&format!("{}/", base.trim_end_matches('/')))
            .map_err(|e| Error::ProbeConfiguration(format!("lag feed url {:?}: {}", base, e)))?;
        let client = Client::builder()
            .build()
            .map_err(|e| Error::ProbeConfiguration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, base })
    }
}

#[async_trait]
impl LagMetricSource for HttpLagSource {
    async fn latest_value(&self, metric_id: &str) -> Option<LagReading> {
        let url = match self.base.join(metric_id) {
            Ok(url) => url,
            Err(e) => {
                warn!(metric_id, error = %e, "invalid lag metric id");
                return None;
            }
        };
        let response = match self.client.get(url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(metric_id, status = %r.status(), "lag feed returned no datapoint");
                return None;
            }
            Err(e) => {
                debug!(metric_id, error = %e, "lag feed unreachable");
                return None;
            }
        };
        match response.json::<LagReading>().await {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!(metric_id, error = %e, "malformed lag datapoint");
                None
            }
        }
    }
}

/// Periodic lag gauge for one region's replica.
pub struct ReplicationLagGauge {
    region: String,
    metric_id: String,
    source: Arc<dyn LagMetricSource>,
    interval: Duration,
    timeout: Duration,
    max_staleness: Duration,
}

impl ReplicationLagGauge {
    /// Create a new gauge.
    pub fn new(
        region: &str,
        metric_id: &str,
        source: Arc<dyn LagMetricSource>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            region: region.to_string(),
            metric_id: metric_id.to_string(),
            source,
            interval,
            timeout,
            max_staleness: interval * 3,
        }
    }

    /// Set the age after which a datapoint counts as missing.
    pub fn with_max_staleness(mut self, max_staleness: Duration) -> Self {
        self.max_staleness = max_staleness;
        self
    }
}

#[async_trait]
impl Probe for ReplicationLagGauge {
    fn region(&self) -> &str {
        &self.region
    }

    fn kind(&self) -> SignalKind {
        SignalKind::ReplicationLag
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn deadline(&self) -> Duration {
        self.timeout
    }

    async fn poll(&self) -> Sample {
        let Some(reading) = self.source.latest_value(&self.metric_id).await else {
            return Sample::missing(&self.region, SignalKind::ReplicationLag);
        };

        // A datapoint stamped in the future is taken at face value.
        if let Ok(age) = (now() - reading.timestamp).to_std() {
            if age > self.max_staleness {
                warn!(
                    region = %self.region,
                    metric_id = %self.metric_id,
                    age_secs = age.as_secs(),
                    "stale lag datapoint treated as missing"
                );
                return Sample::missing(&self.region, SignalKind::ReplicationLag);
            }
        }

        Sample::measured(&self.region, SignalKind::ReplicationLag, reading.value_ms)
            .at(reading.timestamp)
    }
}

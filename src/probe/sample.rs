//! Raw observations produced by probes and gauges.

use crate::core::{now, Timestamp};
use serde::{Deserialize, Serialize};

/// Value reported by a health probe when the endpoint answered 200.
pub const HEALTHY: f64 = 1.0;

/// Sentinel reported by a health probe on timeout, refusal or non-2xx.
pub const UNHEALTHY: f64 = 0.0;

/// Signal a sample belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    /// Endpoint liveness (1.0 healthy, 0.0 unhealthy)
    Health,
    /// Replication lag in milliseconds
    ReplicationLag,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Health => write!(f, "HEALTH"),
            SignalKind::ReplicationLag => write!(f, "REPLICATION_LAG"),
        }
    }
}

/// Observed value, or the absence of one.
///
/// `Missing` means no observation could be made at all (the poll did not
/// finish within its deadline, or the metric feed had no datapoint). An
/// endpoint that answered badly is a `Measured(UNHEALTHY)`, not `Missing`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum SampleValue {
    Measured(f64),
    Missing,
}

/// An immutable observation for one `(region, kind)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Region the observation is about
    pub region: String,
    /// Signal kind
    pub kind: SignalKind,
    /// Observed value
    pub value: SampleValue,
    /// When the observation was taken
    pub timestamp: Timestamp,
}

impl Sample {
    /// Create a measured sample stamped now.
    pub fn measured(region: &str, kind: SignalKind, value: f64) -> Self {
        Self {
            region: region.to_string(),
            kind,
            value: SampleValue::Measured(value),
            timestamp: now(),
        }
    }

    /// Create a missing-data sample stamped now.
    pub fn missing(region: &str, kind: SignalKind) -> Self {
        Self {
            region: region.to_string(),
            kind,
            value: SampleValue::Missing,
            timestamp: now(),
        }
    }

    /// Override the timestamp.
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether this sample carries no observation.
    pub fn is_missing(&self) -> bool {
        matches!(self.value, SampleValue::Missing)
    }
}

//! Probe Module
//!
//! Leaf observers of a region:
//! - HTTP health probes
//! - Replication lag gauges
//! - Interval scheduling with per-call deadlines

pub mod health;
pub mod lag;
pub mod sample;
pub mod scheduler;

pub use health::{HealthCheck, HealthProbe, HttpHealthCheck};
pub use lag::{HttpLagSource, LagMetricSource, LagReading, ReplicationLagGauge};
pub use sample::{Sample, SampleValue, SignalKind};
pub use scheduler::ProbeScheduler;

use async_trait::async_trait;
use std::time::Duration;

/// A periodic observer of one `(region, kind)`.
///
/// `poll` never fails: problems reaching the target are folded into the
/// returned sample so the next cycle can recover on its own.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Region observed.
    fn region(&self) -> &str;

    /// Signal produced.
    fn kind(&self) -> SignalKind;

    /// Polling interval.
    fn interval(&self) -> Duration;

    /// Hard limit for one poll; exceeding it records missing data.
    fn deadline(&self) -> Duration;

    /// Take one observation.
    async fn poll(&self) -> Sample;
}

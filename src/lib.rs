//! # ARFC - Active/passive Region Failover Controller
//!
//! Watches the health and replication lag of two regions, turns probe
//! samples into alarms, and repoints a DNS failover record from the
//! primary to the secondary once the primary has stayed unhealthy past a
//! grace period. Failback is operator driven.
//!
//! - **probe**: periodic health checks and lag gauges
//! - **alarm**: threshold rules over consecutive evaluation periods
//! - **region**: the single-writer failover controller
//! - **dns**: retried, idempotent failover-record upserts
//! - **notify**: deduplicated, retried notifications
//! - **audit**: hash-chained, append-only audit log
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use arfc::config::ArfcConfig;
//! use arfc::dns::InMemoryDnsProvider;
//! use arfc::probe::HttpLagSource;
//! use arfc::service::{FailoverService, ServiceDeps};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> arfc::Result<()> {
//!     let config = Arc::new(ArfcConfig::from_file("arfc.json")?);
//!     let lag = Arc::new(HttpLagSource::new("http://metrics.internal")?);
//!     let deps = ServiceDeps::from_config(&config, lag, Arc::new(InMemoryDnsProvider::new()))?;
//!     let service = FailoverService::start(config, deps)?;
//!     println!("phase: {}", service.snapshot().phase);
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod alarm;
pub mod audit;
pub mod config;
pub mod core;
pub mod dns;
pub mod notify;
pub mod probe;
pub mod region;
pub mod service;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use core::error::{Error, Result};

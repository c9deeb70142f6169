//! DNS Module
//!
//! Redirects traffic by rewriting the failover record pair:
//! - Provider contract for the external DNS API
//! - In-memory provider for dry runs and tests
//! - Idempotent, retrying updater

pub mod memory;
pub mod provider;
pub mod updater;

pub use memory::InMemoryDnsProvider;
pub use provider::{DnsProvider, FailoverRecord};
pub use updater::{DnsApplyResult, DnsChange, DnsUpdater};

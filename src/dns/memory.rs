//! In-memory DNS provider.
//!
//! Backs the daemon's dry-run mode and the test suite.

use crate::core::Result;
use crate::dns::provider::{DnsProvider, FailoverRecord};
use crate::region::RegionRole;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::info;

type RecordKey = (String, String, RegionRole);

/// Record store that counts calls and effective mutations.
#[derive(Default)]
pub struct InMemoryDnsProvider {
    records: RwLock<HashMap<RecordKey, FailoverRecord>>,
    calls: AtomicU64,
    mutations: AtomicU64,
}

impl InMemoryDnsProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record for `(zone, name, role)`.
    pub async fn record(&self, zone_id: &str, record_name: &str, role: RegionRole) -> Option<FailoverRecord> {
        let key = (zone_id.to_string(), record_name.to_string(), role);
        self.records.read().await.get(&key).cloned()
    }

    /// Endpoint the PRIMARY record currently points at.
    pub async fn primary_target(&self, zone_id: &str, record_name: &str) -> Option<String> {
        self.record(zone_id, record_name, RegionRole::Primary)
            .await
            .map(|r| r.target_endpoint)
    }

    /// Number of upsert calls received.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Number of upserts that changed a record.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DnsProvider for InMemoryDnsProvider {
    async fn upsert_failover_record(&self, record: &FailoverRecord) -> Result<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let key = (record.zone_id.clone(), record.record_name.clone(), record.role);

        let mut records = self.records.write().await;
        if records.get(&key) == Some(record) {
            return Ok(());
        }
        info!(
            zone_id = %record.zone_id,
            record_name = %record.record_name,
            role = %record.role,
            target = %record.target_endpoint,
            "dns record upserted"
        );
        records.insert(key, record.clone());
        self.mutations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

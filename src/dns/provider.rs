//! DNS provider contract.

use crate::core::Result;
use crate::region::RegionRole;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One record of a failover routing pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailoverRecord {
    /// Hosted zone
    pub zone_id: String,
    /// Record name (e.g. "app.example.com")
    pub record_name: String,
    /// Endpoint the record resolves to
    pub target_endpoint: String,
    /// Failover role of this record
    pub role: RegionRole,
    /// Record TTL
    pub ttl_seconds: u64,
}

/// External DNS API able to upsert failover records.
///
/// Implementations must accept repeated calls with identical arguments.
/// Errors are reported as `Error::DnsTransient` (safe to retry) or
/// `Error::DnsPermanent` (invalid record, auth failure).
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Create or replace the record for `(zone, name, role)`.
    async fn upsert_failover_record(&self, record: &FailoverRecord) -> Result<()>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}

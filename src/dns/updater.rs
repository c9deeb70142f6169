//! Idempotent DNS failover updates.
//!
//! Each transition upserts the SECONDARY and then the PRIMARY record of
//! the configured failover pair. Updates to one hosted zone are serialized by
//! a zone mutex, and records already known to hold the requested target
//! are skipped. Transient provider errors are retried with capped
//! exponential backoff until the attempt limit or the caller's deadline;
//! permanent errors are returned at once.

use crate::audit::{AuditEntry, AuditLog, EntrySeverity, EntryType};
use crate::config::DnsSettings;
use crate::core::Error;
use crate::dns::provider::{DnsProvider, FailoverRecord};
use crate::region::RegionRole;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Requested routing: which endpoint each record should resolve to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsChange {
    pub primary_endpoint: String,
    pub secondary_endpoint: String,
}

/// Terminal result of a DNS update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DnsApplyResult {
    /// Records hold the requested endpoints
    Applied {
        /// False when every record already matched
        changed: bool,
        /// Provider calls made
        attempts: u32,
        /// Resolvers converge within one TTL
        expected_convergence_secs: u64,
    },
    /// Gave up
    Failed {
        error: String,
        attempts: u32,
        permanent: bool,
    },
}

impl DnsApplyResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DnsApplyResult::Applied { .. })
    }
}

impl std::fmt::Display for DnsApplyResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DnsApplyResult::Applied {
                changed,
                attempts,
                expected_convergence_secs,
            } => write!(
                f,
                "applied (changed={}, attempts={}, converges within {}s)",
                changed, attempts, expected_convergence_secs
            ),
            DnsApplyResult::Failed {
                error,
                attempts,
                permanent,
            } => write!(
                f,
                "failed after {} attempts ({}): {}",
                attempts,
                if *permanent { "permanent" } else { "transient" },
                error
            ),
        }
    }
}

/// Last endpoint successfully written per (record name, role).
type ZoneCache = HashMap<(String, RegionRole), String>;

/// Applies failover routing to one hosted zone.
///
/// Clones share the zone mutex and cache.
#[derive(Clone)]
pub struct DnsUpdater {
    provider: Arc<dyn DnsProvider>,
    settings: DnsSettings,
    zone: Arc<Mutex<ZoneCache>>,
    audit: Option<AuditLog>,
}

impl DnsUpdater {
    /// Create an updater for `settings.zone_id`.
    pub fn new(provider: Arc<dyn DnsProvider>, settings: DnsSettings) -> Self {
        Self {
            provider,
            settings,
            zone: Arc::new(Mutex::new(HashMap::new())),
            audit: None,
        }
    }

    /// Record every upsert in the audit log.
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Record TTL.
    pub fn ttl_seconds(&self) -> u64 {
        self.settings.ttl_seconds
    }

    /// Backoff before retry number `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let initial = self.settings.initial_backoff_ms;
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = initial.saturating_mul(factor).min(self.settings.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Point the SECONDARY record at `change.secondary_endpoint` and then
    /// the PRIMARY record at `change.primary_endpoint`, giving up at `deadline`.
    ///
    /// PRIMARY carries the traffic, so it is written last: a `Failed` result
    /// never leaves traffic on the new target. Records this call already
    /// wrote are restored to their previous endpoint on failure.
    pub async fn apply(&self, change: &DnsChange, deadline: Instant) -> DnsApplyResult {
        let mut cache = self.zone.lock().await;
        let mut attempts = 0;
        let mut written: Vec<(FailoverRecord, Option<String>)> = Vec::new();

        let targets = [
            (RegionRole::Secondary, &change.secondary_endpoint),
            (RegionRole::Primary, &change.primary_endpoint),
        ];
        for (role, endpoint) in targets {
            let key = (self.settings.record_name.clone(), role);
            if cache.get(&key) == Some(endpoint) {
                debug!(record = %self.settings.record_name, %role, %endpoint, "dns record already current");
                continue;
            }

            let record = self.record(role, endpoint);
            match self.upsert_with_retry(&record, deadline, &mut attempts).await {
                Ok(()) => {
                    let previous = cache.insert(key, endpoint.clone());
                    written.push((record, previous));
                }
                Err(e) => {
                    // A failed call may still have landed at the provider
                    cache.remove(&key);
                    self.roll_back(&mut cache, written, deadline, &mut attempts).await;
                    return DnsApplyResult::Failed {
                        permanent: matches!(e, Error::DnsPermanent(_)),
                        error: e.to_string(),
                        attempts,
                    };
                }
            }
        }

        let changed = !written.is_empty();
        info!(
            zone_id = %self.settings.zone_id,
            record = %self.settings.record_name,
            primary = %change.primary_endpoint,
            changed,
            attempts,
            "dns failover applied"
        );
        DnsApplyResult::Applied {
            changed,
            attempts,
            expected_convergence_secs: self.settings.ttl_seconds,
        }
    }

    fn record(&self, role: RegionRole, endpoint: &str) -> FailoverRecord {
        FailoverRecord {
            zone_id: self.settings.zone_id.clone(),
            record_name: self.settings.record_name.clone(),
            target_endpoint: endpoint.to_string(),
            role,
            ttl_seconds: self.settings.ttl_seconds,
        }
    }

    /// Restore records written by a failed apply, newest first. A record
    /// with no known previous endpoint, or whose restore fails, is dropped
    /// from the cache so the next apply rewrites it.
    async fn roll_back(
        &self,
        cache: &mut ZoneCache,
        written: Vec<(FailoverRecord, Option<String>)>,
        deadline: Instant,
        attempts: &mut u32,
    ) {
        for (record, previous) in written.into_iter().rev() {
            let key = (record.record_name.clone(), record.role);
            let Some(previous) = previous else {
                warn!(role = %record.role, target = %record.target_endpoint, "no previous endpoint to restore");
                cache.remove(&key);
                continue;
            };
            let restore = self.record(record.role, &previous);
            match self.upsert_with_retry(&restore, deadline, attempts).await {
                Ok(()) => {
                    info!(role = %record.role, endpoint = %previous, "dns record restored");
                    cache.insert(key, previous);
                }
                Err(e) => {
                    warn!(role = %record.role, error = %e, "dns record restore failed");
                    cache.remove(&key);
                }
            }
        }
    }

    async fn upsert_with_retry(
        &self,
        record: &FailoverRecord,
        deadline: Instant,
        attempts: &mut u32,
    ) -> crate::core::Result<()> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            *attempts += 1;
            let result = self.provider.upsert_failover_record(record).await;
            self.audit_upsert(record, attempt, &result);

            let err = match result {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_transient() => {
                    warn!(provider = %self.provider.name(), role = %record.role, error = %e, "permanent dns error");
                    return Err(e);
                }
                Err(e) => e,
            };

            if attempt >= max_attempts {
                warn!(role = %record.role, attempts = attempt, error = %err, "dns retries exhausted");
                return Err(err);
            }
            let backoff = self.backoff(attempt);
            if Instant::now() + backoff > deadline {
                warn!(role = %record.role, attempts = attempt, "dns deadline reached");
                return Err(Error::DnsDeadlineExceeded {
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }
            debug!(role = %record.role, attempt, ?backoff, error = %err, "retrying dns upsert");
            tokio::time::sleep(backoff).await;
        }
    }

    fn audit_upsert(&self, record: &FailoverRecord, attempt: u32, result: &crate::core::Result<()>) {
        let Some(audit) = &self.audit else {
            return;
        };
        let mut entry = AuditEntry::new(
            EntryType::DnsMutation,
            "dns-updater",
            "upsert_failover_record",
            &record.record_name,
        )
        .with_metadata("zone_id", &record.zone_id)
        .with_metadata("role", record.role)
        .with_metadata("target", &record.target_endpoint)
        .with_metadata("ttl_seconds", record.ttl_seconds)
        .with_metadata("attempt", attempt);
        if let Err(e) = result {
            entry = entry
                .failed()
                .with_severity(EntrySeverity::Warning)
                .with_metadata("error", e.to_string());
        }
        audit.record(entry);
    }
}

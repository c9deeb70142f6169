//! Test doubles shared by the module tests.

use crate::alarm::{AlarmStateValue, AlarmTransition};
use crate::core::{now, Error, Result};
use crate::dns::{DnsProvider, FailoverRecord, InMemoryDnsProvider};
use crate::notify::{Notification, NotificationChannel};
use crate::probe::SignalKind;
use crate::region::RegionRole;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Channel that keeps what it was sent, optionally failing first.
pub(crate) struct RecordingChannel {
    name: String,
    failures_left: AtomicU64,
    sent: Mutex<Vec<Notification>>,
    calls: AtomicU64,
}

impl RecordingChannel {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Self::failing(name, 0)
    }

    /// Fail the first `failures` sends.
    pub(crate) fn failing(name: &str, failures: u64) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failures_left: AtomicU64::new(failures),
            sent: Mutex::new(Vec::new()),
            calls: AtomicU64::new(0),
        })
    }

    pub(crate) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Notification) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(Error::NotificationDelivery {
                channel: self.name.clone(),
                reason: "unreachable".to_string(),
            });
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// DNS provider failing the first `failures` calls, then delegating to an
/// in-memory store.
pub(crate) struct FlakyDnsProvider {
    pub(crate) inner: InMemoryDnsProvider,
    failures: AtomicU32,
    permanent: bool,
}

impl FlakyDnsProvider {
    pub(crate) fn new(failures: u32, permanent: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryDnsProvider::new(),
            failures: AtomicU32::new(failures),
            permanent,
        })
    }
}

#[async_trait]
impl DnsProvider for FlakyDnsProvider {
    async fn upsert_failover_record(&self, record: &FailoverRecord) -> Result<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(if self.permanent {
                Error::DnsPermanent("invalid change batch".to_string())
            } else {
                Error::DnsTransient("throttled".to_string())
            });
        }
        self.inner.upsert_failover_record(record).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// DNS provider failing every upsert of one role, delegating the rest.
pub(crate) struct RoleFailingDnsProvider {
    pub(crate) inner: InMemoryDnsProvider,
    failing: Mutex<Option<RegionRole>>,
}

impl RoleFailingDnsProvider {
    pub(crate) fn new(failing: Option<RegionRole>) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryDnsProvider::new(),
            failing: Mutex::new(failing),
        })
    }

    pub(crate) fn fail_role(&self, role: Option<RegionRole>) {
        *self.failing.lock().unwrap() = role;
    }
}

#[async_trait]
impl DnsProvider for RoleFailingDnsProvider {
    async fn upsert_failover_record(&self, record: &FailoverRecord) -> Result<()> {
        if *self.failing.lock().unwrap() == Some(record.role) {
            return Err(Error::DnsTransient(format!("{} record rejected", record.role)));
        }
        self.inner.upsert_failover_record(record).await
    }

    fn name(&self) -> &str {
        "role-failing"
    }
}

pub(crate) fn transition(
    region: &str,
    kind: SignalKind,
    previous: AlarmStateValue,
    current: AlarmStateValue,
) -> AlarmTransition {
    AlarmTransition {
        region: region.to_string(),
        kind,
        previous,
        current,
        consecutive_breaches: 0,
        at: now(),
    }
}

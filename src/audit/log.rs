//! Audit log writer.
//!
//! Callers hand entries to an `AuditLog` handle and carry on; a single
//! writer task seals each entry into the hash chain and appends it to the
//! backend. A failed append never blocks the caller, but it is always
//! surfaced: the failure counter is bumped, an error is logged and a
//! critical notification goes out of band.

use crate::alarm::{AlarmStateValue, AlarmTransition};
use crate::audit::backend::AuditBackend;
use crate::audit::entry::{AuditEntry, EntrySeverity, EntryType};
use crate::audit::filter::AuditFilter;
use crate::core::{Hash256, Result};
use crate::notify::{Notification, Notifier};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Dedup key of the storage-unavailable alert.
pub const STORAGE_UNAVAILABLE_KEY: &str = "audit:storage_unavailable";

enum AuditMessage {
    Entry(AuditEntry),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to the audit writer task.
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::UnboundedSender<AuditMessage>,
    backend: Arc<dyn AuditBackend>,
    failures: Arc<AtomicU64>,
}

impl AuditLog {
    /// Start the writer task. Write failures are reported through `alerts`
    /// when given.
    pub fn spawn(backend: Arc<dyn AuditBackend>, alerts: Option<Notifier>) -> Self {
        let failures = Arc::new(AtomicU64::new(0));
        let writer = AuditWriter {
            backend: backend.clone(),
            alerts,
            last_hash: None,
            failures: failures.clone(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer.run(rx));
        Self {
            tx,
            backend,
            failures,
        }
    }

    /// Append an entry.
    pub fn record(&self, entry: AuditEntry) {
        if self.tx.send(AuditMessage::Entry(entry)).is_err() {
            error!("audit writer stopped, entry lost");
        }
    }

    /// Wait until every entry recorded before this call has been written
    /// or has failed.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(AuditMessage::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Number of failed appends.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Query the backing store.
    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        self.backend.query(filter).await
    }

    /// Record every alarm transition received.
    pub fn forward_alarms(
        &self,
        mut transitions: mpsc::UnboundedReceiver<AlarmTransition>,
    ) -> JoinHandle<()> {
        let log = self.clone();
        tokio::spawn(async move {
            while let Some(transition) = transitions.recv().await {
                log.record(alarm_entry(&transition));
            }
        })
    }
}

fn alarm_entry(transition: &AlarmTransition) -> AuditEntry {
    let severity = match transition.current {
        AlarmStateValue::Alarm => EntrySeverity::Warning,
        _ => EntrySeverity::Info,
    };
    AuditEntry::new(
        EntryType::AlarmTransition,
        "alarm-evaluator",
        &transition.current.to_string(),
        &format!("{}:{}", transition.region, transition.kind),
    )
    .with_severity(severity)
    .with_metadata("previous", transition.previous.to_string())
    .with_metadata("consecutive_breaches", transition.consecutive_breaches)
    .with_metadata("at", transition.at.to_rfc3339())
}

struct AuditWriter {
    backend: Arc<dyn AuditBackend>,
    alerts: Option<Notifier>,
    /// Hash of the last entry successfully written
    last_hash: Option<Hash256>,
    failures: Arc<AtomicU64>,
}

impl AuditWriter {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<AuditMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                AuditMessage::Entry(entry) => self.write(entry).await,
                AuditMessage::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("audit writer stopped");
    }

    async fn write(&mut self, mut entry: AuditEntry) {
        let hash = entry.seal(self.last_hash.clone());
        let id = entry.id.clone();
        let action = entry.action.clone();
        match self.backend.record(entry).await {
            Ok(_) => self.last_hash = Some(hash),
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                error!(
                    backend = %self.backend.backend_type(),
                    entry_id = %id,
                    action = %action,
                    failures,
                    error = %e,
                    "audit storage unavailable"
                );
                match &self.alerts {
                    Some(alerts) => alerts.publish(Notification::escalation(
                        "Audit storage unavailable",
                        &format!(
                            "Failed to append audit entry {} ({}) to {} backend: {}",
                            id,
                            action,
                            self.backend.backend_type(),
                            e
                        ),
                        STORAGE_UNAVAILABLE_KEY,
                    )),
                    None => warn!("no alert channel for audit failures"),
                }
            }
        }
    }
}

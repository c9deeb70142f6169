//! Notification dispatch.
//!
//! A single dispatcher task de-duplicates published notifications by
//! dedup key within the cool-down window, then hands each survivor to one
//! worker task per channel. Workers retry with exponential backoff and
//! abandon after the configured number of attempts; an abandoned delivery
//! raises a single-attempt meta-alert on every other channel.
//!
//! Publishing never blocks, so a slow channel cannot stall the caller.

use crate::alarm::AlarmTransition;
use crate::config::NotificationSettings;
use crate::notify::channel::NotificationChannel;
use crate::notify::message::Notification;
use crate::notify::record::NotificationRecord;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Delivery records kept for `Notifier::records`.
pub const RECORD_LIMIT: usize = 1024;

type SharedRecords = Arc<RwLock<RecordLog>>;

/// Delivery records in creation order, capped at `RECORD_LIMIT`.
///
/// Ids increase monotonically, so lookups are a binary search.
#[derive(Default)]
struct RecordLog {
    next_id: u64,
    entries: VecDeque<(u64, NotificationRecord)>,
}

impl RecordLog {
    fn push(&mut self, record: NotificationRecord) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back((id, record));
        if self.entries.len() > RECORD_LIMIT {
            // Oldest closed record first; pending ones only if nothing is closed
            let victim = self
                .entries
                .iter()
                .position(|(_, r)| r.is_closed())
                .unwrap_or(0);
            self.entries.remove(victim);
        }
        id
    }

    fn get_mut(&mut self, id: u64) -> Option<&mut NotificationRecord> {
        let index = self.entries.binary_search_by_key(&id, |(id, _)| *id).ok()?;
        self.entries.get_mut(index).map(|(_, r)| r)
    }

    fn to_vec(&self) -> Vec<NotificationRecord> {
        self.entries.iter().map(|(_, r)| r.clone()).collect()
    }
}

enum DispatchMessage {
    Publish(Notification),
    Flush(oneshot::Sender<()>),
}

enum WorkerMessage {
    Deliver { notification: Notification, record: u64 },
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle for publishing notifications.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<DispatchMessage>,
    records: SharedRecords,
    suppressed: Arc<AtomicU64>,
}

impl Notifier {
    /// Queue a notification for delivery.
    pub fn publish(&self, notification: Notification) {
        if self.tx.send(DispatchMessage::Publish(notification)).is_err() {
            warn!("notification dispatcher stopped, dropping notification");
        }
    }

    /// Wait until everything published before this call has been delivered
    /// or abandoned.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(DispatchMessage::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Snapshot of the most recent delivery records, oldest first.
    pub async fn records(&self) -> Vec<NotificationRecord> {
        self.records.read().await.to_vec()
    }

    /// Notifications dropped by de-duplication.
    pub fn suppressed_count(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    /// Publish a notification for every alarm transition received.
    pub fn forward_alarms(
        &self,
        mut transitions: mpsc::UnboundedReceiver<AlarmTransition>,
    ) -> JoinHandle<()> {
        let notifier = self.clone();
        tokio::spawn(async move {
            while let Some(transition) = transitions.recv().await {
                notifier.publish(Notification::alarm(&transition));
            }
        })
    }
}

/// Dispatcher task state.
pub struct NotificationDispatcher {
    workers: Vec<mpsc::UnboundedSender<WorkerMessage>>,
    channel_names: Vec<String>,
    cooldown: Duration,
    /// Last delivery time per dedup key
    last_sent: HashMap<String, Instant>,
    records: SharedRecords,
    suppressed: Arc<AtomicU64>,
}

impl NotificationDispatcher {
    /// Start the dispatcher and one worker per channel.
    pub fn spawn(
        channels: Vec<Arc<dyn NotificationChannel>>,
        settings: &NotificationSettings,
    ) -> Notifier {
        let records: SharedRecords = Arc::new(RwLock::new(RecordLog::default()));
        let suppressed = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::with_capacity(channels.len());
        let mut channel_names = Vec::with_capacity(channels.len());
        for (i, channel) in channels.iter().enumerate() {
            let others = channels
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, c)| c.clone())
                .collect();
            let worker = ChannelWorker {
                channel: channel.clone(),
                others,
                records: records.clone(),
                max_attempts: settings.max_attempts.max(1),
                backoff: settings.retry_backoff(),
            };
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(worker.run(rx));
            workers.push(tx);
            channel_names.push(channel.name().to_string());
        }

        let dispatcher = Self {
            workers,
            channel_names,
            cooldown: settings.cooldown(),
            last_sent: HashMap::new(),
            records: records.clone(),
            suppressed: suppressed.clone(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatcher.run(rx));

        Notifier {
            tx,
            records,
            suppressed,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DispatchMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                DispatchMessage::Publish(notification) => self.dispatch(notification).await,
                DispatchMessage::Flush(done) => {
                    self.flush_workers().await;
                    let _ = done.send(());
                }
            }
        }
        debug!("notification dispatcher stopped");
    }

    async fn dispatch(&mut self, notification: Notification) {
        let now = Instant::now();
        if let Some(last) = self.last_sent.get(&notification.dedup_key) {
            if now.duration_since(*last) < self.cooldown {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                debug!(dedup_key = %notification.dedup_key, "notification suppressed");
                return;
            }
        }
        let cooldown = self.cooldown;
        self.last_sent
            .retain(|_, last| now.duration_since(*last) < cooldown);
        self.last_sent.insert(notification.dedup_key.clone(), now);

        for (worker, name) in self.workers.iter().zip(&self.channel_names) {
            let record = self.records.write().await.push(NotificationRecord::pending(
                &notification.event_id,
                name,
                &notification.dedup_key,
            ));
            let message = WorkerMessage::Deliver {
                notification: notification.clone(),
                record,
            };
            if worker.send(message).is_err() {
                error!(channel = %name, "notification worker stopped");
            }
        }
    }

    async fn flush_workers(&self) {
        let mut waits = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let (done, wait) = oneshot::channel();
            if worker.send(WorkerMessage::Flush(done)).is_ok() {
                waits.push(wait);
            }
        }
        futures::future::join_all(waits).await;
    }
}

struct ChannelWorker {
    channel: Arc<dyn NotificationChannel>,
    /// Targets for meta-alerts
    others: Vec<Arc<dyn NotificationChannel>>,
    records: SharedRecords,
    max_attempts: u32,
    backoff: Duration,
}

impl ChannelWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<WorkerMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                WorkerMessage::Deliver {
                    notification,
                    record,
                } => self.deliver(&notification, record).await,
                WorkerMessage::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    }

    async fn update(&self, record: u64, apply: impl FnOnce(&mut NotificationRecord)) {
        if let Some(entry) = self.records.write().await.get_mut(record) {
            apply(entry);
        }
    }

    async fn deliver(&self, notification: &Notification, record: u64) {
        let mut backoff = self.backoff;
        for attempt in 1..=self.max_attempts {
            let result = self.channel.send(notification).await;
            match result {
                Ok(()) => {
                    self.update(record, |entry| {
                        entry.attempts = attempt;
                        entry.delivered();
                    })
                    .await;
                    debug!(
                        channel = %self.channel.name(),
                        dedup_key = %notification.dedup_key,
                        attempt,
                        "notification delivered"
                    );
                    return;
                }
                Err(e) => {
                    self.update(record, |entry| entry.attempts = attempt).await;
                    warn!(
                        channel = %self.channel.name(),
                        dedup_key = %notification.dedup_key,
                        attempt,
                        error = %e,
                        "notification delivery failed"
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }

        self.update(record, |entry| entry.abandoned()).await;
        error!(
            channel = %self.channel.name(),
            event_id = %notification.event_id,
            dedup_key = %notification.dedup_key,
            attempts = self.max_attempts,
            "notification abandoned"
        );
        self.raise_meta_alert(notification).await;
    }

    /// One attempt per other channel, never retried.
    async fn raise_meta_alert(&self, failed: &Notification) {
        let meta = Notification::escalation(
            &format!("Notification delivery to {} abandoned", self.channel.name()),
            &format!(
                "Gave up delivering \"{}\" ({}) to {} after {} attempts",
                failed.title,
                failed.event_id,
                self.channel.name(),
                self.max_attempts
            ),
            &format!("meta:{}:{}", self.channel.name(), failed.dedup_key),
        );
        for other in &self.others {
            let mut record = NotificationRecord::pending(&meta.event_id, other.name(), &meta.dedup_key);
            record.meta_alert = true;
            record.attempts = 1;
            match other.send(&meta).await {
                Ok(()) => record.delivered(),
                Err(e) => {
                    record.abandoned();
                    error!(channel = %other.name(), error = %e, "meta-alert delivery failed");
                }
            }
            self.records.write().await.push(record);
        }
    }
}

//! Delivery records.

use crate::core::{now, Timestamp};
use serde::{Deserialize, Serialize};

/// Delivery status of one (notification, channel) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Queued, not yet delivered
    Pending,
    /// Channel accepted the message
    Delivered,
    /// Gave up after the maximum number of attempts
    Abandoned,
}

/// Tracks delivery of one notification to one channel.
///
/// Created when the notification is queued for the channel and closed
/// when it is delivered or abandoned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Event this notification reports
    pub event_id: String,
    /// Channel name
    pub channel: String,
    /// Dedup key
    pub dedup_key: String,
    /// Set once delivered
    pub delivered_at: Option<Timestamp>,
    /// Send attempts so far
    pub attempts: u32,
    /// Current status
    pub status: DeliveryStatus,
    /// Whether this is a meta-alert about another abandoned delivery
    pub meta_alert: bool,
}

impl NotificationRecord {
    /// Open a pending record.
    pub fn pending(event_id: &str, channel: &str, dedup_key: &str) -> Self {
        Self {
            event_id: event_id.to_string(),
            channel: channel.to_string(),
            dedup_key: dedup_key.to_string(),
            delivered_at: None,
            attempts: 0,
            status: DeliveryStatus::Pending,
            meta_alert: false,
        }
    }

    pub fn delivered(&mut self) {
        self.status = DeliveryStatus::Delivered;
        self.delivered_at = Some(now());
    }

    pub fn abandoned(&mut self) {
        self.status = DeliveryStatus::Abandoned;
    }

    /// Whether the record is closed.
    pub fn is_closed(&self) -> bool {
        self.status != DeliveryStatus::Pending
    }
}

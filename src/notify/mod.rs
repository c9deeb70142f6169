//! Notifications.
//!
//! Alarm transitions, failover events and escalations are published to a
//! de-duplicating dispatcher that fans out to the configured channels.

pub mod channel;
pub mod dispatcher;
pub mod message;
pub mod record;

pub use channel::{channels_from_config, LogChannel, NotificationChannel, WebhookChannel};
pub use dispatcher::{NotificationDispatcher, Notifier};
pub use message::{Notification, Severity};
pub use record::{DeliveryStatus, NotificationRecord};

//! Notification messages.

use crate::alarm::{AlarmStateValue, AlarmTransition};
use crate::probe::SignalKind;
use crate::region::failover::{FailoverEvent, FailoverKind};
use serde::{Deserialize, Serialize};

/// Notification severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Critical; a human is expected to act
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A message handed to every notification channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// ID of the event this notification reports
    pub event_id: String,
    /// Short title
    pub title: String,
    /// Body text
    pub body: String,
    /// Severity
    pub severity: Severity,
    /// Notifications sharing a key collapse within the cool-down window
    pub dedup_key: String,
}

impl Notification {
    /// Create a notification with a fresh event ID.
    pub fn new(title: &str, body: &str, severity: Severity, dedup_key: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            body: body.to_string(),
            severity,
            dedup_key: dedup_key.to_string(),
        }
    }

    /// Report an alarm edge.
    pub fn alarm(transition: &AlarmTransition) -> Self {
        let severity = match (transition.kind, transition.current) {
            (SignalKind::Health, AlarmStateValue::Alarm) => Severity::Critical,
            (_, AlarmStateValue::Alarm) | (_, AlarmStateValue::InsufficientData) => Severity::Warning,
            (_, AlarmStateValue::Ok) => Severity::Info,
        };
        Self::new(
            &format!(
                "{} {} is {}",
                transition.region, transition.kind, transition.current
            ),
            &format!(
                "{} {} moved from {} to {} at {} ({} consecutive breaches)",
                transition.region,
                transition.kind,
                transition.previous,
                transition.current,
                transition.at.to_rfc3339(),
                transition.consecutive_breaches
            ),
            severity,
            &transition.dedup_key(),
        )
    }

    /// Report a finalized failover or failback attempt.
    pub fn failover(event: &FailoverEvent) -> Self {
        let (severity, outcome) = if event.succeeded() {
            (Severity::Warning, "completed")
        } else {
            (Severity::Critical, "failed")
        };
        let verb = match event.kind {
            FailoverKind::Failover => "Failover",
            FailoverKind::Failback => "Failback",
        };
        let mut notification = Self::new(
            &format!("{} {} -> {} {}", verb, event.from_region, event.to_region, outcome),
            &format!(
                "{} {} (attempt {}) from {} to {}: {}. Result: {}",
                verb,
                event.failover_id,
                event.attempt,
                event.from_region,
                event.to_region,
                event.reason,
                event.dns_apply_result
            ),
            severity,
            &format!("failover:{}:{}:{}", event.failover_id, event.attempt, outcome),
        );
        notification.event_id = event.id.clone();
        notification
    }

    /// Escalation requiring human intervention.
    pub fn escalation(title: &str, body: &str, dedup_key: &str) -> Self {
        Self::new(title, body, Severity::Critical, dedup_key)
    }
}

//! Failover attempts and their finalized events.

use crate::core::{now, Timestamp};
use crate::dns::DnsApplyResult;
use serde::{Deserialize, Serialize};

/// Direction of a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailoverKind {
    /// Configured primary to secondary
    Failover,
    /// Back to the configured primary
    Failback,
}

impl std::fmt::Display for FailoverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailoverKind::Failover => write!(f, "FAILOVER"),
            FailoverKind::Failback => write!(f, "FAILBACK"),
        }
    }
}

/// What started a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerSource {
    /// Grace timer expired on a primary health alarm
    Automatic,
    /// Operator command
    Operator,
}

/// A transition whose DNS update has not finished yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailoverAttempt {
    /// Event ID
    pub id: String,
    /// Shared by every attempt of one degraded episode
    pub failover_id: String,
    /// 1-based attempt number within the episode
    pub attempt: u32,
    /// Direction
    pub kind: FailoverKind,
    /// Trigger
    pub trigger: TriggerSource,
    /// Region giving up PRIMARY
    pub from_region: String,
    /// Region taking PRIMARY
    pub to_region: String,
    /// Why the transition started
    pub reason: String,
    /// When the transition started
    pub triggered_at: Timestamp,
}

impl FailoverAttempt {
    /// Start a new attempt.
    pub fn new(
        failover_id: &str,
        attempt: u32,
        kind: FailoverKind,
        trigger: TriggerSource,
        from_region: &str,
        to_region: &str,
        reason: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            failover_id: failover_id.to_string(),
            attempt,
            kind,
            trigger,
            from_region: from_region.to_string(),
            to_region: to_region.to_string(),
            reason: reason.to_string(),
            triggered_at: now(),
        }
    }

    /// Close the attempt with its terminal DNS result.
    pub fn finalize(self, dns_apply_result: DnsApplyResult) -> FailoverEvent {
        FailoverEvent {
            id: self.id,
            failover_id: self.failover_id,
            attempt: self.attempt,
            kind: self.kind,
            trigger: self.trigger,
            from_region: self.from_region,
            to_region: self.to_region,
            reason: self.reason,
            triggered_at: self.triggered_at,
            completed_at: now(),
            dns_apply_result,
        }
    }
}

/// Immutable record of a finished transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub id: String,
    pub failover_id: String,
    pub attempt: u32,
    pub kind: FailoverKind,
    pub trigger: TriggerSource,
    pub from_region: String,
    pub to_region: String,
    pub reason: String,
    pub triggered_at: Timestamp,
    pub completed_at: Timestamp,
    /// Terminal result of the DNS update
    pub dns_apply_result: DnsApplyResult,
}

impl FailoverEvent {
    /// Whether DNS now points at `to_region`.
    pub fn succeeded(&self) -> bool {
        self.dns_apply_result.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_keeps_identity() {
        let attempt = FailoverAttempt::new(
            "fo-1",
            2,
            FailoverKind::Failover,
            TriggerSource::Automatic,
            "us-east-1",
            "us-west-2",
            "primary health ALARM",
        );
        let id = attempt.id.clone();
        let event = attempt.finalize(DnsApplyResult::Applied {
            changed: true,
            attempts: 2,
            expected_convergence_secs: 60,
        });

        assert_eq!(event.id, id);
        assert_eq!(event.failover_id, "fo-1");
        assert_eq!(event.attempt, 2);
        assert!(event.succeeded());
        assert!(event.completed_at >= event.triggered_at);
    }

    #[test]
    fn test_failed_event() {
        let event = FailoverAttempt::new(
            "fo-1",
            1,
            FailoverKind::Failback,
            TriggerSource::Operator,
            "us-west-2",
            "us-east-1",
            "operator",
        )
        .finalize(DnsApplyResult::Failed {
            error: "throttled".to_string(),
            attempts: 5,
            permanent: false,
        });
        assert!(!event.succeeded());
        assert_eq!(event.kind.to_string(), "FAILBACK");
    }
}

//! Alarm states and the transitions emitted between them.

use crate::core::Timestamp;
use crate::probe::sample::SignalKind;
use serde::{Deserialize, Serialize};

/// Debounced state of one signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmStateValue {
    Ok,
    Alarm,
    InsufficientData,
}

impl std::fmt::Display for AlarmStateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmStateValue::Ok => write!(f, "OK"),
            AlarmStateValue::Alarm => write!(f, "ALARM"),
            AlarmStateValue::InsufficientData => write!(f, "INSUFFICIENT_DATA"),
        }
    }
}

/// Current alarm state for a `(region, kind)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlarmState {
    /// Region
    pub region: String,
    /// Signal kind
    pub kind: SignalKind,
    /// State value
    pub state: AlarmStateValue,
    /// Trailing run of breaching samples
    pub consecutive_breaches: usize,
    /// When the current state was entered
    pub since: Timestamp,
}

/// Edge emitted when an alarm changes state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlarmTransition {
    /// Region
    pub region: String,
    /// Signal kind
    pub kind: SignalKind,
    /// State before the edge
    pub previous: AlarmStateValue,
    /// State after the edge
    pub current: AlarmStateValue,
    /// Trailing run of breaching samples at the edge
    pub consecutive_breaches: usize,
    /// Timestamp of the sample that caused the edge
    pub at: Timestamp,
}

impl AlarmTransition {
    /// Key used to collapse repeated equivalent notifications.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}:{}", self.region, self.kind, self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::now;

    #[test]
    fn test_dedup_key() {
        let t = AlarmTransition {
            region: "us-east-1".to_string(),
            kind: SignalKind::Health,
            previous: AlarmStateValue::Ok,
            current: AlarmStateValue::Alarm,
            consecutive_breaches: 2,
            at: now(),
        };
        assert_eq!(t.dedup_key(), "us-east-1:HEALTH:ALARM");
    }
}

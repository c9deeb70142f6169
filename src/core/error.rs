//! Error types for ARFC.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for ARFC operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ARFC operations.
#[derive(Error, Debug)]
pub enum Error {
    // Startup errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid probe configuration: {0}")]
    ProbeConfiguration(String),

    // Probe errors
    #[error("Probe failed transiently: {0}")]
    ProbeTransient(String),

    // DNS errors
    #[error("Transient DNS error: {0}")]
    DnsTransient(String),

    #[error("Permanent DNS error: {0}")]
    DnsPermanent(String),

    #[error("DNS update deadline exceeded after {attempts} attempts: {last_error}")]
    DnsDeadlineExceeded { attempts: u32, last_error: String },

    // Notification errors
    #[error("Notification delivery to {channel} failed: {reason}")]
    NotificationDelivery { channel: String, reason: String },

    // Audit errors
    #[error("Audit write failed: {0}")]
    AuditWrite(String),

    // Controller errors
    #[error("Failback rejected: {0}")]
    FailbackRejected(FailbackRejection),

    #[error("Failover rejected: {0}")]
    FailoverRejected(String),

    #[error("Controller is not running")]
    ControllerUnavailable,

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a DNS error may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::DnsTransient(_) | Error::ProbeTransient(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// The gating condition that caused a failback command to be refused.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailbackRejection {
    /// Controller is not in STEADY_SECONDARY
    NotSteadySecondary { phase: String },
    /// A failover or failback is already in flight
    TransitionInFlight { failover_id: String },
    /// The requested pair does not match the configured regions
    UnknownRegionPair { primary: String, secondary: String },
    /// Home primary health has not been OK for the full evaluation window
    PrimaryHealthNotOk {
        region: String,
        state: String,
        /// Consecutive healthy samples the alarm needs to return to OK
        periods: usize,
    },
    /// Home primary replica is not caught up
    ReplicationLagNotOk { region: String, state: String },
}

impl std::fmt::Display for FailbackRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailbackRejection::NotSteadySecondary { phase } => {
                write!(f, "controller is in {} (requires STEADY_SECONDARY)", phase)
            }
            FailbackRejection::TransitionInFlight { failover_id } => {
                write!(f, "transition {} is still in flight", failover_id)
            }
            FailbackRejection::UnknownRegionPair { primary, secondary } => {
                write!(f, "unknown region pair {}/{}", primary, secondary)
            }
            FailbackRejection::PrimaryHealthNotOk {
                region,
                state,
                periods,
            } => write!(
                f,
                "health of {} is {} (requires OK for {} consecutive periods)",
                region, state, periods
            ),
            FailbackRejection::ReplicationLagNotOk { region, state } => {
                write!(f, "replication lag of {} is {} (requires OK)", region, state)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_names_unmet_condition() {
        let err = Error::FailbackRejected(FailbackRejection::PrimaryHealthNotOk {
            region: "us-east-1".to_string(),
            state: "ALARM".to_string(),
            periods: 2,
        });
        let msg = err.to_string();
        assert!(msg.contains("us-east-1"));
        assert!(msg.contains("ALARM"));
        assert!(msg.contains("2 consecutive periods"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::DnsTransient("throttled".into()).is_transient());
        assert!(!Error::DnsPermanent("bad record".into()).is_transient());
    }

    #[test]
    fn test_from_serde_json() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}

//! Handle for talking to a running controller.

use crate::core::{Error, Result};
use crate::dns::DnsApplyResult;
use crate::region::controller::ControllerSnapshot;
use crate::region::failover::FailoverAttempt;
use crate::region::manager::RegionPair;
use tokio::sync::{mpsc, oneshot, watch};

/// Operator commands.
#[derive(Clone, Debug, PartialEq)]
pub enum ControllerCommand {
    /// Return traffic to the configured primary
    TriggerFailback(RegionPair),
    /// Fail over now, skipping the grace timer
    TriggerFailover { reason: String },
}

/// Controller mailbox message.
pub(crate) enum ControllerMessage {
    Command {
        command: ControllerCommand,
        reply: oneshot::Sender<Result<FailoverAttempt>>,
    },
    DnsOutcome {
        attempt: FailoverAttempt,
        result: DnsApplyResult,
    },
}

/// Cloneable handle to a `FailoverController`.
#[derive(Clone)]
pub struct ControllerHandle {
    pub(crate) mailbox: mpsc::UnboundedSender<ControllerMessage>,
    pub(crate) snapshot: watch::Receiver<ControllerSnapshot>,
}

impl ControllerHandle {
    /// Ask for a failback to `pair.primary`.
    ///
    /// Rejected with `Error::FailbackRejected` naming the unmet condition
    /// unless the controller is in STEADY_SECONDARY, nothing is in flight,
    /// and the configured primary's health and replication lag are both OK.
    pub async fn trigger_failback(&self, pair: RegionPair) -> Result<FailoverAttempt> {
        self.command(ControllerCommand::TriggerFailback(pair)).await
    }

    /// Fail over immediately. Replication-lag and target-health gates
    /// still apply.
    pub async fn trigger_failover(&self, reason: &str) -> Result<FailoverAttempt> {
        self.command(ControllerCommand::TriggerFailover {
            reason: reason.to_string(),
        })
        .await
    }

    async fn command(&self, command: ControllerCommand) -> Result<FailoverAttempt> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(ControllerMessage::Command { command, reply })
            .map_err(|_| Error::ControllerUnavailable)?;
        response.await.map_err(|_| Error::ControllerUnavailable)?
    }

    /// Latest published state.
    pub fn snapshot(&self) -> ControllerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every published state.
    pub fn subscribe(&self) -> watch::Receiver<ControllerSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&ControllerSnapshot) -> bool,
    ) -> Result<ControllerSnapshot> {
        let mut rx = self.subscribe();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| Error::ControllerUnavailable)?;
        Ok(snapshot.clone())
    }
}

//! Failover controller.
//!
//! Single-writer state machine over the region pair. It consumes alarm
//! transitions, operator commands, DNS outcomes and its own ticker from
//! one task, so transitions are applied strictly in arrival order.
//!
//! ```text
//! STEADY_PRIMARY --health ALARM--> PRIMARY_DEGRADED --grace elapsed, gates pass--> FAILOVER_IN_PROGRESS
//! PRIMARY_DEGRADED --health OK--> STEADY_PRIMARY
//! FAILOVER_IN_PROGRESS --dns ok--> STEADY_SECONDARY
//! FAILOVER_IN_PROGRESS --dns failed--> PRIMARY_DEGRADED (escalate)
//! STEADY_SECONDARY --operator failback, gates pass--> FAILBACK_IN_PROGRESS --dns ok--> STEADY_PRIMARY
//! ```
//!
//! The DNS update runs in a spawned task that reports back through the
//! mailbox, so commands arriving while a transition is in flight are
//! answered (and rejected) immediately.

use crate::alarm::{AlarmKey, AlarmStateValue, AlarmTransition};
use crate::audit::{AuditEntry, AuditLog, EntrySeverity, EntryType};
use crate::config::{ArfcConfig, ControllerSettings};
use crate::core::{now, Error, FailbackRejection, Result, Timestamp};
use crate::dns::{DnsApplyResult, DnsChange, DnsUpdater};
use crate::notify::{Notification, Notifier};
use crate::probe::SignalKind;
use crate::region::failover::{FailoverAttempt, FailoverEvent, FailoverKind, TriggerSource};
use crate::region::handle::{ControllerCommand, ControllerHandle, ControllerMessage};
use crate::region::manager::{Region, RegionPair, RegionSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const ACTOR: &str = "failover-controller";

/// Finalized events kept for the snapshot; older ones live in the audit log.
pub const HISTORY_LIMIT: usize = 64;

/// Controller state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerPhase {
    /// Configured primary serving, healthy
    SteadyPrimary,
    /// Primary health in ALARM, grace timer running or failover blocked
    PrimaryDegraded { failover_id: String, since: Timestamp },
    /// DNS moving traffic to the secondary
    FailoverInProgress { failover_id: String, attempt: u32 },
    /// Secondary serving
    SteadySecondary,
    /// DNS moving traffic back to the configured primary
    FailbackInProgress { failover_id: String, attempt: u32 },
}

impl ControllerPhase {
    pub fn name(&self) -> &'static str {
        match self {
            ControllerPhase::SteadyPrimary => "STEADY_PRIMARY",
            ControllerPhase::PrimaryDegraded { .. } => "PRIMARY_DEGRADED",
            ControllerPhase::FailoverInProgress { .. } => "FAILOVER_IN_PROGRESS",
            ControllerPhase::SteadySecondary => "STEADY_SECONDARY",
            ControllerPhase::FailbackInProgress { .. } => "FAILBACK_IN_PROGRESS",
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            ControllerPhase::FailoverInProgress { .. } | ControllerPhase::FailbackInProgress { .. }
        )
    }
}

impl std::fmt::Display for ControllerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Published view of the controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    /// Current phase
    pub phase: ControllerPhase,
    /// Region holding PRIMARY
    pub current_primary: String,
    /// Both regions
    pub regions: Vec<Region>,
    /// Transition awaiting its DNS result
    pub in_flight: Option<FailoverAttempt>,
    /// Most recent finalized transitions, oldest first
    pub history: Vec<FailoverEvent>,
    /// Latest alarm state per "region:KIND"
    pub alarms: BTreeMap<String, AlarmStateValue>,
    /// Escalations raised so far
    pub escalations: u64,
}

/// The failover state machine.
pub struct FailoverController {
    regions: RegionSet,
    alarms: HashMap<AlarmKey, AlarmStateValue>,
    phase: ControllerPhase,
    /// Set while the grace timer runs
    grace_deadline: Option<Instant>,
    /// A blocked failover has already been escalated this episode
    blocked_escalated: bool,
    /// Attempts made in the current degraded episode
    episode_attempts: u32,
    in_flight: Option<FailoverAttempt>,
    history: VecDeque<FailoverEvent>,
    escalations: u64,
    /// Health evaluation periods of the home primary, for rejection text
    home_health_periods: usize,
    settings: ControllerSettings,
    dns: DnsUpdater,
    notifier: Notifier,
    audit: AuditLog,
    mailbox_tx: mpsc::UnboundedSender<ControllerMessage>,
    mailbox: Option<mpsc::UnboundedReceiver<ControllerMessage>>,
    snapshot_tx: watch::Sender<ControllerSnapshot>,
}

impl FailoverController {
    /// Create a controller with the configured primary serving traffic.
    pub fn new(
        config: &ArfcConfig,
        dns: DnsUpdater,
        notifier: Notifier,
        audit: AuditLog,
    ) -> (Self, ControllerHandle) {
        let (mailbox_tx, mailbox) = mpsc::unbounded_channel();
        let regions = RegionSet::from_config(&config.regions);
        let initial = ControllerSnapshot {
            phase: ControllerPhase::SteadyPrimary,
            current_primary: regions.primary().name.clone(),
            regions: regions.regions().to_vec(),
            in_flight: None,
            history: Vec::new(),
            alarms: BTreeMap::new(),
            escalations: 0,
        };
        let (snapshot_tx, snapshot) = watch::channel(initial);

        let controller = Self {
            regions,
            alarms: HashMap::new(),
            phase: ControllerPhase::SteadyPrimary,
            grace_deadline: None,
            blocked_escalated: false,
            episode_attempts: 0,
            in_flight: None,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            escalations: 0,
            home_health_periods: config
                .evaluation_periods(&config.regions.primary.name, SignalKind::Health),
            settings: config.controller.clone(),
            dns,
            notifier,
            audit,
            mailbox_tx: mailbox_tx.clone(),
            mailbox: Some(mailbox),
            snapshot_tx,
        };
        let handle = ControllerHandle {
            mailbox: mailbox_tx,
            snapshot,
        };
        (controller, handle)
    }

    /// Process events until `shutdown` changes or its sender is dropped.
    pub async fn run(
        mut self,
        mut alarms: mpsc::UnboundedReceiver<AlarmTransition>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let Some(mut mailbox) = self.mailbox.take() else {
            error!("failover controller started twice");
            return;
        };
        let mut ticker = tokio::time::interval(self.settings.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(primary = %self.regions.primary().name, "failover controller started");
        self.publish();

        loop {
            let acted = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(transition) = alarms.recv() => {
                    self.on_alarm(transition);
                    true
                }
                Some(message) = mailbox.recv() => {
                    self.on_message(message);
                    true
                }
                tick = ticker.tick() => self.on_tick(tick),
            };
            // Idle ticks change nothing
            if acted {
                self.publish();
            }
        }

        if let Some(attempt) = &self.in_flight {
            warn!(failover_id = %attempt.failover_id, "stopping with transition in flight");
        }
        info!("failover controller stopped");
    }

    fn alarm_state(&self, region: &str, kind: SignalKind) -> AlarmStateValue {
        self.alarms
            .get(&(region.to_string(), kind))
            .copied()
            .unwrap_or(AlarmStateValue::InsufficientData)
    }

    fn on_alarm(&mut self, transition: AlarmTransition) {
        self.alarms
            .insert((transition.region.clone(), transition.kind), transition.current);
        if transition.kind == SignalKind::Health {
            self.regions
                .record_health(&transition.region, transition.current, transition.at);
        }

        // Lag alarms and standby health only gate transitions
        if transition.kind != SignalKind::Health || transition.region != self.regions.primary().name {
            return;
        }

        match (self.phase.clone(), transition.current) {
            (ControllerPhase::SteadyPrimary, AlarmStateValue::Alarm) => {
                self.episode_attempts = 0;
                self.set_phase(
                    ControllerPhase::PrimaryDegraded {
                        failover_id: uuid::Uuid::new_v4().to_string(),
                        since: transition.at,
                    },
                    "primary health ALARM",
                );
                self.arm_grace();
            }
            (ControllerPhase::PrimaryDegraded { .. }, AlarmStateValue::Alarm) => {
                info!(region = %transition.region, "primary health ALARM again, grace timer re-armed");
                self.arm_grace();
            }
            (ControllerPhase::PrimaryDegraded { .. }, AlarmStateValue::Ok) => {
                self.grace_deadline = None;
                self.set_phase(ControllerPhase::SteadyPrimary, "primary health recovered");
            }
            (ControllerPhase::SteadySecondary, AlarmStateValue::Alarm) => {
                let region = transition.region.clone();
                self.escalate(
                    &format!("Active region {} unhealthy", region),
                    &format!(
                        "{} is serving traffic after a failover and its health is ALARM. \
                         No automatic action is taken from STEADY_SECONDARY.",
                        region
                    ),
                    &format!("escalation:{}:active_unhealthy", region),
                );
            }
            (phase, state) => {
                debug!(%phase, %state, region = %transition.region, "health transition needs no action");
            }
        }
    }

    fn arm_grace(&mut self) {
        self.grace_deadline = Some(Instant::now() + self.settings.grace_period());
        self.blocked_escalated = false;
    }

    /// Returns whether the tick acted.
    fn on_tick(&mut self, tick: Instant) -> bool {
        let ControllerPhase::PrimaryDegraded { failover_id, .. } = &self.phase else {
            return false;
        };
        let Some(deadline) = self.grace_deadline else {
            return false;
        };
        if tick < deadline {
            return false;
        }
        let failover_id = failover_id.clone();
        let primary = self.regions.primary().name.clone();
        if self.alarm_state(&primary, SignalKind::Health) != AlarmStateValue::Alarm {
            return false;
        }

        match self.failover_gate() {
            Ok(()) => {
                self.grace_deadline = None;
                let reason = format!(
                    "{} health ALARM for longer than the {}s grace period",
                    primary, self.settings.grace_period_secs
                );
                self.start_transition(
                    FailoverKind::Failover,
                    TriggerSource::Automatic,
                    &failover_id,
                    &reason,
                );
                true
            }
            Err(blocked) => {
                if self.blocked_escalated {
                    return false;
                }
                self.blocked_escalated = true;
                warn!(failover_id = %failover_id, reason = %blocked, "failover blocked");
                self.audit.record(
                    AuditEntry::new(EntryType::StateTransition, ACTOR, "failover_blocked", &primary)
                        .failed()
                        .with_severity(EntrySeverity::Warning)
                        .with_metadata("failover_id", &failover_id)
                        .with_metadata("reason", &blocked),
                );
                self.escalate(
                    &format!("Failover from {} blocked", primary),
                    &format!(
                        "Grace period elapsed but failover is blocked: {}. Staying in PRIMARY_DEGRADED.",
                        blocked
                    ),
                    &format!("escalation:{}:blocked", failover_id),
                );
                true
            }
        }
    }

    /// Target health must be OK and its replica must not be in lag ALARM.
    fn failover_gate(&self) -> std::result::Result<(), String> {
        let target = &self.regions.secondary().name;
        let health = self.alarm_state(target, SignalKind::Health);
        if health != AlarmStateValue::Ok {
            return Err(format!("target {} health is {}", target, health));
        }
        let lag = self.alarm_state(target, SignalKind::ReplicationLag);
        if lag == AlarmStateValue::Alarm {
            return Err(format!("replication lag of {} is ALARM", target));
        }
        Ok(())
    }

    fn start_transition(
        &mut self,
        kind: FailoverKind,
        trigger: TriggerSource,
        failover_id: &str,
        reason: &str,
    ) -> FailoverAttempt {
        self.episode_attempts += 1;
        let from = self.regions.primary().clone();
        let to = self.regions.secondary().clone();
        let attempt = FailoverAttempt::new(
            failover_id,
            self.episode_attempts,
            kind,
            trigger,
            &from.name,
            &to.name,
            reason,
        );

        let phase = match kind {
            FailoverKind::Failover => ControllerPhase::FailoverInProgress {
                failover_id: failover_id.to_string(),
                attempt: attempt.attempt,
            },
            FailoverKind::Failback => ControllerPhase::FailbackInProgress {
                failover_id: failover_id.to_string(),
                attempt: attempt.attempt,
            },
        };
        self.in_flight = Some(attempt.clone());
        self.set_phase(phase, reason);

        let change = DnsChange {
            primary_endpoint: to.endpoint,
            secondary_endpoint: from.endpoint,
        };
        let deadline = Instant::now() + self.settings.rto_deadline();
        let dns = self.dns.clone();
        let mailbox = self.mailbox_tx.clone();
        let pending = attempt.clone();
        tokio::spawn(async move {
            let result = dns.apply(&change, deadline).await;
            let _ = mailbox.send(ControllerMessage::DnsOutcome {
                attempt: pending,
                result,
            });
        });
        attempt
    }

    fn on_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::Command { command, reply } => {
                let result = self.on_command(command.clone());
                self.audit_command(&command, &result);
                let _ = reply.send(result);
            }
            ControllerMessage::DnsOutcome { attempt, result } => self.on_dns_outcome(attempt, result),
        }
    }

    fn on_command(&mut self, command: ControllerCommand) -> Result<FailoverAttempt> {
        match command {
            ControllerCommand::TriggerFailback(pair) => self.try_failback(&pair),
            ControllerCommand::TriggerFailover { reason } => self.try_failover(&reason),
        }
    }

    fn try_failback(&mut self, pair: &RegionPair) -> Result<FailoverAttempt> {
        let rejection = |r: FailbackRejection| -> Result<FailoverAttempt> {
            warn!(%pair, reason = %r, "failback rejected");
            Err(Error::FailbackRejected(r))
        };

        if let Some(attempt) = &self.in_flight {
            return rejection(FailbackRejection::TransitionInFlight {
                failover_id: attempt.failover_id.clone(),
            });
        }
        if self.phase != ControllerPhase::SteadySecondary {
            return rejection(FailbackRejection::NotSteadySecondary {
                phase: self.phase.name().to_string(),
            });
        }
        if pair != self.regions.home() {
            return rejection(FailbackRejection::UnknownRegionPair {
                primary: pair.primary.clone(),
                secondary: pair.secondary.clone(),
            });
        }
        let health = self.alarm_state(&pair.primary, SignalKind::Health);
        if health != AlarmStateValue::Ok {
            return rejection(FailbackRejection::PrimaryHealthNotOk {
                region: pair.primary.clone(),
                state: health.to_string(),
                periods: self.home_health_periods,
            });
        }
        let lag = self.alarm_state(&pair.primary, SignalKind::ReplicationLag);
        if lag != AlarmStateValue::Ok {
            return rejection(FailbackRejection::ReplicationLagNotOk {
                region: pair.primary.clone(),
                state: lag.to_string(),
            });
        }

        self.episode_attempts = 0;
        let failover_id = uuid::Uuid::new_v4().to_string();
        Ok(self.start_transition(
            FailoverKind::Failback,
            TriggerSource::Operator,
            &failover_id,
            &format!("operator failback to {}", pair.primary),
        ))
    }

    fn try_failover(&mut self, reason: &str) -> Result<FailoverAttempt> {
        if let Some(attempt) = &self.in_flight {
            return Err(Error::FailoverRejected(format!(
                "transition {} is still in flight",
                attempt.failover_id
            )));
        }
        let failover_id = match self.phase.clone() {
            ControllerPhase::PrimaryDegraded { failover_id, .. } => failover_id,
            ControllerPhase::SteadyPrimary => {
                self.episode_attempts = 0;
                uuid::Uuid::new_v4().to_string()
            }
            phase => {
                return Err(Error::FailoverRejected(format!(
                    "controller is in {} (requires STEADY_PRIMARY or PRIMARY_DEGRADED)",
                    phase
                )))
            }
        };
        self.failover_gate().map_err(Error::FailoverRejected)?;

        self.grace_deadline = None;
        Ok(self.start_transition(
            FailoverKind::Failover,
            TriggerSource::Operator,
            &failover_id,
            &format!("operator failover: {}", reason),
        ))
    }

    fn on_dns_outcome(&mut self, attempt: FailoverAttempt, result: DnsApplyResult) {
        if self.in_flight.as_ref().map(|a| &a.id) != Some(&attempt.id) {
            warn!(event_id = %attempt.id, "dns outcome for unknown attempt ignored");
            return;
        }
        self.in_flight = None;

        let event = attempt.finalize(result);
        self.audit.record(
            AuditEntry::new(EntryType::FailoverAttempt, ACTOR, &event.kind.to_string(), &event.to_region)
                .with_severity(if event.succeeded() {
                    EntrySeverity::Warning
                } else {
                    EntrySeverity::Critical
                })
                .with_metadata("event", &event),
        );
        if event.succeeded() {
            info!(
                failover_id = %event.failover_id,
                kind = %event.kind,
                from = %event.from_region,
                to = %event.to_region,
                "transition completed"
            );
        } else {
            self.escalations += 1;
            error!(
                failover_id = %event.failover_id,
                kind = %event.kind,
                attempt = event.attempt,
                result = %event.dns_apply_result,
                "transition failed, human intervention required"
            );
        }
        // A failed attempt's notification is critical and serves as the escalation
        self.notifier.publish(Notification::failover(&event));

        let (next, reason) = match (event.kind, event.succeeded()) {
            (FailoverKind::Failover, true) => {
                self.regions.swap_roles();
                (ControllerPhase::SteadySecondary, "failover dns applied")
            }
            (FailoverKind::Failback, true) => {
                self.regions.swap_roles();
                (ControllerPhase::SteadyPrimary, "failback dns applied")
            }
            (FailoverKind::Failover, false) => {
                let primary = self.regions.primary().name.clone();
                if self.alarm_state(&primary, SignalKind::Health) == AlarmStateValue::Ok {
                    (ControllerPhase::SteadyPrimary, "failover failed, primary recovered")
                } else {
                    // Retried on the next health ALARM edge or by operator command
                    self.grace_deadline = None;
                    (
                        ControllerPhase::PrimaryDegraded {
                            failover_id: event.failover_id.clone(),
                            since: now(),
                        },
                        "failover dns failed",
                    )
                }
            }
            (FailoverKind::Failback, false) => (ControllerPhase::SteadySecondary, "failback dns failed"),
        };
        self.remember(event);
        self.set_phase(next, reason);
    }

    fn remember(&mut self, event: FailoverEvent) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }

    fn set_phase(&mut self, next: ControllerPhase, reason: &str) {
        if next == self.phase {
            return;
        }
        let previous = std::mem::replace(&mut self.phase, next);
        info!(from = %previous, to = %self.phase, reason, "controller transition");
        self.audit.record(
            AuditEntry::new(
                EntryType::StateTransition,
                ACTOR,
                &format!("{} -> {}", previous, self.phase),
                &self.regions.primary().name,
            )
            .with_metadata("reason", reason)
            .with_metadata("phase", &self.phase),
        );
    }

    fn escalate(&mut self, title: &str, body: &str, dedup_key: &str) {
        self.escalations += 1;
        error!(dedup_key, "{}", body);
        self.notifier
            .publish(Notification::escalation(title, body, dedup_key));
    }

    fn audit_command(&self, command: &ControllerCommand, result: &Result<FailoverAttempt>) {
        let (action, target) = match command {
            ControllerCommand::TriggerFailback(pair) => ("trigger_failback", pair.to_string()),
            ControllerCommand::TriggerFailover { .. } => {
                ("trigger_failover", self.regions.secondary().name.clone())
            }
        };
        let mut entry = AuditEntry::new(EntryType::OperatorCommand, "operator", action, &target);
        entry = match result {
            Ok(attempt) => entry.with_metadata("failover_id", &attempt.failover_id),
            Err(e) => entry
                .failed()
                .with_severity(EntrySeverity::Warning)
                .with_metadata("rejection", e.to_string()),
        };
        self.audit.record(entry);
    }

    fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            phase: self.phase.clone(),
            current_primary: self.regions.primary().name.clone(),
            regions: self.regions.regions().to_vec(),
            in_flight: self.in_flight.clone(),
            history: self.history.iter().cloned().collect(),
            alarms: self
                .alarms
                .iter()
                .map(|((region, kind), state)| (format!("{}:{}", region, kind), *state))
                .collect(),
            escalations: self.escalations,
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::backends::MemoryBackend;
    use crate::audit::AuditFilter;
    use crate::config::test_config;
    use crate::dns::{DnsProvider, InMemoryDnsProvider};
    use crate::notify::{NotificationDispatcher, Severity};
    use crate::region::manager::RegionRole;
    use crate::testing::{transition, FlakyDnsProvider, RecordingChannel, RoleFailingDnsProvider};
    use std::sync::Arc;
    use std::time::Duration;
    use crate::alarm::AlarmStateValue::{Alarm, InsufficientData, Ok as AlarmOk};
    use crate::probe::SignalKind::{Health, ReplicationLag};

    const PRIMARY: &str = "us-east-1";
    const SECONDARY: &str = "us-west-2";

    struct Harness {
        handle: ControllerHandle,
        alarms: mpsc::UnboundedSender<AlarmTransition>,
        notifier: Notifier,
        channel: Arc<RecordingChannel>,
        audit: AuditLog,
        _shutdown: watch::Sender<bool>,
    }

    impl Harness {
        fn start(provider: Arc<dyn DnsProvider>) -> Self {
            let config = test_config();
            let channel = RecordingChannel::new("log");
            let notifier =
                NotificationDispatcher::spawn(vec![channel.clone()], &config.notifications);
            let audit = AuditLog::spawn(Arc::new(MemoryBackend::new()), Some(notifier.clone()));
            let dns = DnsUpdater::new(provider, config.dns.clone()).with_audit(audit.clone());
            let (controller, handle) =
                FailoverController::new(&config, dns, notifier.clone(), audit.clone());
            let (alarms, alarm_rx) = mpsc::unbounded_channel();
            let (shutdown, shutdown_rx) = watch::channel(false);
            tokio::spawn(controller.run(alarm_rx, shutdown_rx));
            Self {
                handle,
                alarms,
                notifier,
                channel,
                audit,
                _shutdown: shutdown,
            }
        }

        /// Send a transition and wait until the controller has applied it.
        async fn alarm(&self, region: &str, kind: SignalKind, current: AlarmStateValue) {
            self.alarms
                .send(transition(region, kind, InsufficientData, current))
                .unwrap();
            let key = format!("{}:{}", region, kind);
            self.handle
                .wait_for(|s| s.alarms.get(&key) == Some(&current))
                .await
                .unwrap();
        }

        /// Both regions healthy, both replicas caught up.
        async fn all_ok(&self) {
            for region in [PRIMARY, SECONDARY] {
                self.alarm(region, Health, AlarmOk).await;
                self.alarm(region, ReplicationLag, AlarmOk).await;
            }
        }

        async fn wait_phase(&self, name: &str) -> ControllerSnapshot {
            tokio::time::timeout(
                Duration::from_secs(3600),
                self.handle.wait_for(|s| s.phase.name() == name),
            )
            .await
            .expect("timed out waiting for phase")
            .unwrap()
        }

        async fn fail_over(&self) -> ControllerSnapshot {
            self.all_ok().await;
            self.alarm(PRIMARY, Health, Alarm).await;
            self.wait_phase("STEADY_SECONDARY").await
        }

        async fn escalations_sent(&self) -> Vec<Notification> {
            self.notifier.flush().await;
            self.channel
                .sent()
                .into_iter()
                .filter(|n| n.severity == Severity::Critical)
                .collect()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_primary_produces_no_events() {
        let h = Harness::start(Arc::new(InMemoryDnsProvider::new()));
        h.all_ok().await;
        tokio::time::sleep(Duration::from_secs(600)).await;

        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.phase, ControllerPhase::SteadyPrimary);
        assert!(snapshot.history.is_empty());
        assert_eq!(snapshot.current_primary, PRIMARY);
        assert!(h.escalations_sent().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_after_grace_period() {
        let provider = Arc::new(InMemoryDnsProvider::new());
        let h = Harness::start(provider.clone());
        h.all_ok().await;
        h.alarm(PRIMARY, Health, Alarm).await;

        let degraded = h.wait_phase("PRIMARY_DEGRADED").await;
        assert_eq!(degraded.current_primary, PRIMARY);
        let started = Instant::now();

        let snapshot = h.wait_phase("STEADY_SECONDARY").await;
        assert!(started.elapsed() >= Duration::from_secs(120));
        assert_eq!(snapshot.current_primary, SECONDARY);
        assert_eq!(snapshot.history.len(), 1);
        let event = &snapshot.history[0];
        assert!(event.succeeded());
        assert_eq!(event.attempt, 1);
        assert_eq!(event.trigger, TriggerSource::Automatic);
        assert_eq!((event.from_region.as_str(), event.to_region.as_str()), (PRIMARY, SECONDARY));
        assert!(snapshot.in_flight.is_none());
        assert_eq!(
            snapshot.regions.iter().filter(|r| r.role == RegionRole::Primary).count(),
            1
        );
        assert_eq!(
            provider.primary_target("Z123", "app.example.com").await.as_deref(),
            Some("https://usw2.example.com")
        );

        h.audit.flush().await;
        let transitions = h
            .audit
            .query(&AuditFilter::new().by_type(EntryType::StateTransition))
            .await
            .unwrap();
        let actions: Vec<&str> = transitions.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(
            actions,
            vec![
                "STEADY_PRIMARY -> PRIMARY_DEGRADED",
                "PRIMARY_DEGRADED -> FAILOVER_IN_PROGRESS",
                "FAILOVER_IN_PROGRESS -> STEADY_SECONDARY",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_within_grace_cancels_failover() {
        let h = Harness::start(Arc::new(InMemoryDnsProvider::new()));
        h.all_ok().await;
        h.alarm(PRIMARY, Health, Alarm).await;
        h.wait_phase("PRIMARY_DEGRADED").await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        h.alarm(PRIMARY, Health, AlarmOk).await;
        h.wait_phase("STEADY_PRIMARY").await;

        tokio::time::sleep(Duration::from_secs(600)).await;
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.phase, ControllerPhase::SteadyPrimary);
        assert!(snapshot.history.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dns_failure_returns_to_degraded() {
        let provider = FlakyDnsProvider::new(5, false);
        let h = Harness::start(provider.clone());
        h.all_ok().await;
        h.alarm(PRIMARY, Health, Alarm).await;

        let snapshot = h
            .handle
            .wait_for(|s| s.history.len() == 1)
            .await
            .unwrap();
        assert_eq!(snapshot.phase.name(), "PRIMARY_DEGRADED");
        assert_eq!(snapshot.current_primary, PRIMARY);
        assert!(!snapshot.history[0].succeeded());
        assert_eq!(provider.inner.mutation_count(), 0);

        let escalations = h.escalations_sent().await;
        assert_eq!(escalations.len(), 1);
        assert!(escalations[0].dedup_key.starts_with("failover:"));

        // No automatic retry without a new alarm edge
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.handle.snapshot().history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_dns_failure_keeps_traffic_on_primary() {
        let provider = RoleFailingDnsProvider::new(Some(RegionRole::Secondary));
        let h = Harness::start(provider.clone());
        h.all_ok().await;
        h.alarm(PRIMARY, Health, Alarm).await;

        let snapshot = h
            .handle
            .wait_for(|s| s.history.len() == 1)
            .await
            .unwrap();
        assert_eq!(snapshot.phase.name(), "PRIMARY_DEGRADED");
        assert_eq!(snapshot.current_primary, PRIMARY);
        assert!(!snapshot.history[0].succeeded());
        // Routing agrees with the controller: traffic never moved
        assert_ne!(
            provider.inner.primary_target("Z123", "app.example.com").await.as_deref(),
            Some("https://usw2.example.com")
        );
        assert_eq!(provider.inner.mutation_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_shares_failover_id() {
        let provider = FlakyDnsProvider::new(5, false);
        let h = Harness::start(provider.clone());
        h.all_ok().await;
        h.alarm(PRIMARY, Health, Alarm).await;
        h.handle.wait_for(|s| s.history.len() == 1).await.unwrap();

        let attempt = h.handle.trigger_failover("dns recovered").await.unwrap();
        assert_eq!(attempt.attempt, 2);
        let snapshot = h.wait_phase("STEADY_SECONDARY").await;
        assert_eq!(snapshot.history.len(), 2);
        assert_eq!(snapshot.history[0].failover_id, snapshot.history[1].failover_id);
        assert_eq!(snapshot.history[1].trigger, TriggerSource::Operator);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lag_alarm_blocks_failover() {
        let provider = Arc::new(InMemoryDnsProvider::new());
        let h = Harness::start(provider.clone());
        h.all_ok().await;
        h.alarm(SECONDARY, ReplicationLag, Alarm).await;
        h.alarm(PRIMARY, Health, Alarm).await;

        tokio::time::sleep(Duration::from_secs(600)).await;
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.phase.name(), "PRIMARY_DEGRADED");
        assert!(snapshot.history.is_empty());
        assert_eq!(snapshot.escalations, 1);
        assert_eq!(provider.call_count(), 0);

        let escalations = h.escalations_sent().await;
        assert!(escalations.iter().any(|n| n.dedup_key.ends_with(":blocked")));

        // Replica catches up: the blocked failover proceeds
        h.alarm(SECONDARY, ReplicationLag, AlarmOk).await;
        let snapshot = h.wait_phase("STEADY_SECONDARY").await;
        assert_eq!(snapshot.current_primary, SECONDARY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_target_blocks_failover() {
        let h = Harness::start(Arc::new(InMemoryDnsProvider::new()));
        h.all_ok().await;
        h.alarm(SECONDARY, Health, Alarm).await;
        h.alarm(PRIMARY, Health, Alarm).await;

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.handle.snapshot().phase.name(), "PRIMARY_DEGRADED");

        let err = h.handle.trigger_failover("manual").await.unwrap_err();
        assert!(matches!(err, Error::FailoverRejected(ref r) if r.contains(SECONDARY)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_transition_in_flight() {
        // Three transient failures keep the DNS update busy for 7s
        let provider = FlakyDnsProvider::new(3, false);
        let h = Harness::start(provider);
        h.all_ok().await;

        let attempt = h.handle.trigger_failover("drill").await.unwrap();
        assert_eq!(h.handle.snapshot().phase.name(), "FAILOVER_IN_PROGRESS");

        let err = h.handle.trigger_failover("again").await.unwrap_err();
        assert!(matches!(err, Error::FailoverRejected(_)));
        let err = h
            .handle
            .trigger_failback(RegionPair::new(PRIMARY, SECONDARY))
            .await
            .unwrap_err();
        match err {
            Error::FailbackRejected(FailbackRejection::TransitionInFlight { failover_id }) => {
                assert_eq!(failover_id, attempt.failover_id)
            }
            other => panic!("unexpected error: {}", other),
        }

        let snapshot = h.wait_phase("STEADY_SECONDARY").await;
        assert_eq!(snapshot.history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failback_rejected_while_primary_unhealthy() {
        let h = Harness::start(Arc::new(InMemoryDnsProvider::new()));
        let before = h.fail_over().await;

        let err = h
            .handle
            .trigger_failback(RegionPair::new(PRIMARY, SECONDARY))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::FailbackRejected(FailbackRejection::PrimaryHealthNotOk { ref region, ref state, periods })
                if region == PRIMARY && state == "ALARM" && periods == 2
        ));
        assert_eq!(h.handle.snapshot(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failback_rejected_while_replica_behind() {
        let h = Harness::start(Arc::new(InMemoryDnsProvider::new()));
        h.fail_over().await;
        h.alarm(PRIMARY, Health, AlarmOk).await;
        h.alarm(PRIMARY, ReplicationLag, Alarm).await;

        let err = h
            .handle
            .trigger_failback(RegionPair::new(PRIMARY, SECONDARY))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::FailbackRejected(FailbackRejection::ReplicationLagNotOk { .. })
        ));
        assert_eq!(h.handle.snapshot().phase, ControllerPhase::SteadySecondary);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failback_restores_primary() {
        let provider = Arc::new(InMemoryDnsProvider::new());
        let h = Harness::start(provider.clone());
        h.fail_over().await;
        h.alarm(PRIMARY, Health, AlarmOk).await;

        let attempt = h
            .handle
            .trigger_failback(RegionPair::new(PRIMARY, SECONDARY))
            .await
            .unwrap();
        assert_eq!(attempt.kind, FailoverKind::Failback);
        assert_eq!(attempt.to_region, PRIMARY);

        let snapshot = h.wait_phase("STEADY_PRIMARY").await;
        assert_eq!(snapshot.current_primary, PRIMARY);
        assert_eq!(snapshot.history.len(), 2);
        assert_eq!(
            provider.primary_target("Z123", "app.example.com").await.as_deref(),
            Some("https://use1.example.com")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failback_requires_steady_secondary() {
        let h = Harness::start(Arc::new(InMemoryDnsProvider::new()));
        h.all_ok().await;
        let err = h
            .handle
            .trigger_failback(RegionPair::new(PRIMARY, SECONDARY))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::FailbackRejected(FailbackRejection::NotSteadySecondary { .. })
        ));

        h.audit.flush().await;
        let commands = h
            .audit
            .query(&AuditFilter::new().by_type(EntryType::OperatorCommand))
            .await
            .unwrap();
        assert_eq!(commands.len(), 1);
        assert!(!commands[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failback_rejects_unknown_pair() {
        let h = Harness::start(Arc::new(InMemoryDnsProvider::new()));
        h.fail_over().await;
        h.alarm(PRIMARY, Health, AlarmOk).await;

        let err = h
            .handle
            .trigger_failback(RegionPair::new(SECONDARY, PRIMARY))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::FailbackRejected(FailbackRejection::UnknownRegionPair { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_region_alarm_in_steady_secondary_escalates() {
        let h = Harness::start(Arc::new(InMemoryDnsProvider::new()));
        h.fail_over().await;
        h.alarm(SECONDARY, Health, Alarm).await;

        let snapshot = h.handle.wait_for(|s| s.escalations == 1).await.unwrap();
        assert_eq!(snapshot.phase, ControllerPhase::SteadySecondary);
        assert_eq!(snapshot.current_primary, SECONDARY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_reports_stopped_controller() {
        let h = Harness::start(Arc::new(InMemoryDnsProvider::new()));
        let Harness {
            handle, _shutdown, ..
        } = h;
        _shutdown.send(true).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let err = handle.trigger_failover("late").await.unwrap_err();
        assert!(matches!(err, Error::ControllerUnavailable));
    }

    #[tokio::test]
    async fn test_history_keeps_most_recent_events() {
        let config = test_config();
        let notifier = NotificationDispatcher::spawn(Vec::new(), &config.notifications);
        let audit = AuditLog::spawn(Arc::new(MemoryBackend::new()), None);
        let dns = DnsUpdater::new(Arc::new(InMemoryDnsProvider::new()), config.dns.clone());
        let (mut controller, _handle) = FailoverController::new(&config, dns, notifier, audit);

        for attempt in 1..=(HISTORY_LIMIT as u32 + 10) {
            let event = FailoverAttempt::new(
                "episode",
                attempt,
                FailoverKind::Failover,
                TriggerSource::Operator,
                PRIMARY,
                SECONDARY,
                "drill",
            )
            .finalize(DnsApplyResult::Failed {
                error: "throttled".to_string(),
                attempts: 1,
                permanent: false,
            });
            controller.remember(event);
        }

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.history.len(), HISTORY_LIMIT);
        assert_eq!(snapshot.history[0].attempt, 11);
        assert_eq!(
            snapshot.history[HISTORY_LIMIT - 1].attempt,
            HISTORY_LIMIT as u32 + 10
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_ticks_do_not_republish() {
        let h = Harness::start(Arc::new(InMemoryDnsProvider::new()));
        h.all_ok().await;
        let mut updates = h.handle.subscribe();
        updates.borrow_and_update();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!updates.has_changed().unwrap());
    }
}

//! Service assembly.
//!
//! Wires probes, the alarm evaluator, the failover controller, the
//! notification dispatcher and the audit log into one running pipeline:
//!
//! ```text
//! probes --samples--> evaluator --transitions--> controller --> dns
//!                                     |                 \--> notifications, audit
//!                                     +--> notifications
//!                                     +--> audit
//! ```

use crate::alarm::{AlarmEvaluator, AlarmState};
use crate::audit::{create_audit_backend, AuditBackend, AuditLog};
use crate::config::ArfcConfig;
use crate::core::Result;
use crate::dns::{DnsProvider, DnsUpdater};
use crate::notify::{channels_from_config, NotificationChannel, NotificationDispatcher, Notifier};
use crate::probe::{
    HealthCheck, HealthProbe, HttpHealthCheck, LagMetricSource, ProbeScheduler, ReplicationLagGauge,
};
use crate::region::{ControllerHandle, ControllerSnapshot, FailoverAttempt, FailoverController, RegionPair};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Bound on samples waiting for the evaluator.
const SAMPLE_QUEUE_CAPACITY: usize = 1024;

/// External collaborators of the service.
pub struct ServiceDeps {
    pub health_check: Arc<dyn HealthCheck>,
    pub lag_source: Arc<dyn LagMetricSource>,
    pub dns_provider: Arc<dyn DnsProvider>,
    pub channels: Vec<Arc<dyn NotificationChannel>>,
    pub audit_backend: Arc<dyn AuditBackend>,
}

impl ServiceDeps {
    /// HTTP health checks, configured channels and audit backend, with
    /// the given lag feed and DNS provider.
    pub fn from_config(
        config: &ArfcConfig,
        lag_source: Arc<dyn LagMetricSource>,
        dns_provider: Arc<dyn DnsProvider>,
    ) -> Result<Self> {
        Ok(Self {
            health_check: Arc::new(HttpHealthCheck::new()?),
            lag_source,
            dns_provider,
            channels: channels_from_config(&config.notifications.channels)?,
            audit_backend: create_audit_backend(&config.audit),
        })
    }
}

/// A running failover pipeline.
pub struct FailoverService {
    controller: ControllerHandle,
    notifier: Notifier,
    audit: AuditLog,
    alarm_states: watch::Receiver<Vec<AlarmState>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl FailoverService {
    /// Validate the configuration and start every task.
    pub fn start(config: Arc<ArfcConfig>, deps: ServiceDeps) -> Result<Self> {
        config.validate()?;

        let notifier = NotificationDispatcher::spawn(deps.channels, &config.notifications);
        let audit = AuditLog::spawn(deps.audit_backend, Some(notifier.clone()));
        let dns = DnsUpdater::new(deps.dns_provider, config.dns.clone()).with_audit(audit.clone());
        let (controller, handle) =
            FailoverController::new(&config, dns, notifier.clone(), audit.clone());

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_QUEUE_CAPACITY);
        let (states_tx, alarm_states) = watch::channel(Vec::new());
        let (controller_tx, controller_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (audit_tx, audit_rx) = mpsc::unbounded_channel();

        let mut tasks = vec![
            notifier.forward_alarms(notify_rx),
            audit.forward_alarms(audit_rx),
            tokio::spawn(AlarmEvaluator::new(config.alarm_rules()).run(
                sample_rx,
                vec![controller_tx, notify_tx, audit_tx],
                states_tx,
            )),
            tokio::spawn(controller.run(controller_rx, shutdown_rx.clone())),
        ];

        let scheduler = build_scheduler(&config, &deps.health_check, &deps.lag_source);
        let probes = scheduler.len();
        tasks.extend(scheduler.spawn(sample_tx, shutdown_rx));

        info!(
            primary = %config.regions.primary.name,
            secondary = %config.regions.secondary.name,
            probes,
            "failover service started"
        );
        Ok(Self {
            controller: handle,
            notifier,
            audit,
            alarm_states,
            shutdown,
            tasks,
        })
    }

    /// Controller handle.
    pub fn controller(&self) -> &ControllerHandle {
        &self.controller
    }

    /// Operator failback command.
    pub async fn trigger_failback(&self, pair: RegionPair) -> Result<FailoverAttempt> {
        self.controller.trigger_failback(pair).await
    }

    /// Operator failover command.
    pub async fn trigger_failover(&self, reason: &str) -> Result<FailoverAttempt> {
        self.controller.trigger_failover(reason).await
    }

    /// Latest controller state.
    pub fn snapshot(&self) -> ControllerSnapshot {
        self.controller.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerSnapshot> {
        self.controller.subscribe()
    }

    /// Latest state of every alarm.
    pub fn alarm_states(&self) -> Vec<AlarmState> {
        self.alarm_states.borrow().clone()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Stop probes and the controller, then drain notifications and audit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "service task ended abnormally");
            }
        }
        self.audit.flush().await;
        self.notifier.flush().await;
        info!("failover service stopped");
    }
}

fn build_scheduler(
    config: &ArfcConfig,
    health_check: &Arc<dyn HealthCheck>,
    lag_source: &Arc<dyn LagMetricSource>,
) -> ProbeScheduler {
    let p = &config.probes;
    let mut scheduler = ProbeScheduler::new();
    for region in config.region_configs() {
        scheduler.add(Arc::new(HealthProbe::new(
            &region.name,
            &region.endpoint,
            health_check.clone(),
            p.health_interval(),
            p.health_timeout(),
        )));
        scheduler.add(Arc::new(
            ReplicationLagGauge::new(
                &region.name,
                &region.lag_metric_id,
                lag_source.clone(),
                p.lag_interval(),
                p.lag_timeout(),
            )
            .with_max_staleness(p.lag_max_staleness()),
        ));
    }
    scheduler
}

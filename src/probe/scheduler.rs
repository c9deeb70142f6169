//! Probe scheduling.
//!
//! One task per probe, each on its own interval, all feeding a single
//! ordered sample queue.

use crate::probe::sample::Sample;
use crate::probe::Probe;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Runs probes on independent timers.
#[derive(Default)]
pub struct ProbeScheduler {
    probes: Vec<Arc<dyn Probe>>,
}

impl ProbeScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a probe.
    pub fn add(&mut self, probe: Arc<dyn Probe>) {
        self.probes.push(probe);
    }

    /// Number of probes.
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    /// Whether no probes are registered.
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Spawn one polling task per probe.
    ///
    /// Tasks exit when `shutdown` flips (or its sender is dropped) or when
    /// the sample queue closes.
    pub fn spawn(
        self,
        samples: mpsc::Sender<Sample>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        self.probes
            .into_iter()
            .map(|probe| tokio::spawn(run_probe(probe, samples.clone(), shutdown.clone())))
            .collect()
    }
}

async fn run_probe(
    probe: Arc<dyn Probe>,
    samples: mpsc::Sender<Sample>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(probe.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let sample = match tokio::time::timeout(probe.deadline(), probe.poll()).await {
            Ok(sample) => sample,
            Err(_) => {
                warn!(
                    region = %probe.region(),
                    kind = %probe.kind(),
                    deadline_ms = probe.deadline().as_millis() as u64,
                    "poll exceeded its deadline"
                );
                Sample::missing(probe.region(), probe.kind())
            }
        };

        if samples.send(sample).await.is_err() {
            break;
        }
    }
    debug!(region = %probe.region(), kind = %probe.kind(), "probe stopped");
}

//! Alarm evaluator.
//!
//! Turns the raw sample stream into debounced, edge-triggered alarm
//! states. Each `(region, kind)` keeps a ring buffer of the last
//! `evaluation_periods` verdicts:
//! - all breaching moves the alarm to ALARM
//! - all within bounds moves it to OK
//! - all missing moves it to INSUFFICIENT_DATA
//! - anything mixed keeps the previous state
//!
//! Until the buffer first fills the state is INSUFFICIENT_DATA.

use crate::alarm::rule::{AlarmRule, Verdict};
use crate::alarm::state::{AlarmState, AlarmStateValue, AlarmTransition};
use crate::core::{now, Timestamp};
use crate::probe::sample::{Sample, SignalKind};
use std::collections::{HashMap, VecDeque};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Key identifying one alarm.
pub type AlarmKey = (String, SignalKind);

struct AlarmSlot {
    rule: AlarmRule,
    window: VecDeque<Verdict>,
    state: AlarmStateValue,
    since: Timestamp,
}

impl AlarmSlot {
    fn new(rule: AlarmRule) -> Self {
        let capacity = rule.evaluation_periods;
        Self {
            rule,
            window: VecDeque::with_capacity(capacity),
            state: AlarmStateValue::InsufficientData,
            since: now(),
        }
    }

    fn push(&mut self, verdict: Verdict) {
        if self.window.len() == self.rule.evaluation_periods {
            self.window.pop_front();
        }
        self.window.push_back(verdict);
    }

    fn computed_state(&self) -> AlarmStateValue {
        if self.window.len() < self.rule.evaluation_periods {
            return self.state;
        }
        let all = |v: Verdict| self.window.iter().all(|w| *w == v);
        if all(Verdict::Breach) {
            AlarmStateValue::Alarm
        } else if all(Verdict::Ok) {
            AlarmStateValue::Ok
        } else if all(Verdict::Missing) {
            AlarmStateValue::InsufficientData
        } else {
            self.state
        }
    }

    fn consecutive_breaches(&self) -> usize {
        self.window
            .iter()
            .rev()
            .take_while(|v| **v == Verdict::Breach)
            .count()
    }
}

/// Converts samples into alarm transitions.
pub struct AlarmEvaluator {
    slots: HashMap<AlarmKey, AlarmSlot>,
}

impl AlarmEvaluator {
    /// Create an evaluator for the given rules.
    pub fn new(rules: HashMap<AlarmKey, AlarmRule>) -> Self {
        let slots = rules
            .into_iter()
            .map(|(key, rule)| (key, AlarmSlot::new(rule)))
            .collect();
        Self { slots }
    }

    /// Evaluate a sample; returns a transition only when the state changes.
    pub fn evaluate(&mut self, sample: &Sample) -> Option<AlarmTransition> {
        let key = (sample.region.clone(), sample.kind);
        let Some(slot) = self.slots.get_mut(&key) else {
            warn!(region = %sample.region, kind = %sample.kind, "sample for unconfigured alarm dropped");
            return None;
        };

        let verdict = slot.rule.classify(sample.value);
        slot.push(verdict);

        let next = slot.computed_state();
        if next == slot.state {
            debug!(
                region = %sample.region,
                kind = %sample.kind,
                state = %slot.state,
                ?verdict,
                "alarm unchanged"
            );
            return None;
        }

        let transition = AlarmTransition {
            region: sample.region.clone(),
            kind: sample.kind,
            previous: slot.state,
            current: next,
            consecutive_breaches: slot.consecutive_breaches(),
            at: sample.timestamp,
        };
        slot.state = next;
        slot.since = sample.timestamp;

        info!(
            region = %transition.region,
            kind = %transition.kind,
            from = %transition.previous,
            to = %transition.current,
            "alarm transition"
        );
        Some(transition)
    }

    /// Get the state of one alarm.
    pub fn state(&self, region: &str, kind: SignalKind) -> Option<AlarmState> {
        self.slots
            .get(&(region.to_string(), kind))
            .map(|slot| Self::view(region, kind, slot))
    }

    /// Snapshot of every alarm, sorted by region then kind.
    pub fn states(&self) -> Vec<AlarmState> {
        let mut states: Vec<AlarmState> = self
            .slots
            .iter()
            .map(|((region, kind), slot)| Self::view(region, *kind, slot))
            .collect();
        states.sort_by(|a, b| (&a.region, a.kind).cmp(&(&b.region, b.kind)));
        states
    }

    fn view(region: &str, kind: SignalKind, slot: &AlarmSlot) -> AlarmState {
        AlarmState {
            region: region.to_string(),
            kind,
            state: slot.state,
            consecutive_breaches: slot.consecutive_breaches(),
            since: slot.since,
        }
    }

    /// Drain the sample queue until every sender is dropped.
    ///
    /// Transitions go to every subscriber in order; a closed subscriber is
    /// skipped. The current states are published on `states`.
    pub async fn run(
        mut self,
        mut samples: mpsc::Receiver<Sample>,
        subscribers: Vec<mpsc::UnboundedSender<AlarmTransition>>,
        states: watch::Sender<Vec<AlarmState>>,
    ) {
        states.send_replace(self.states());
        while let Some(sample) = samples.recv().await {
            if let Some(transition) = self.evaluate(&sample) {
                for subscriber in &subscribers {
                    if subscriber.send(transition.clone()).is_err() {
                        debug!("alarm subscriber closed");
                    }
                }
                states.send_replace(self.states());
            }
        }
        debug!("sample queue closed, evaluator stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::rule::{Comparison, TreatMissingData};
    use crate::probe::sample::{HEALTHY, UNHEALTHY};

    const REGION: &str = "us-east-1";

    fn evaluator(rule: AlarmRule) -> AlarmEvaluator {
        let mut rules = HashMap::new();
        rules.insert((REGION.to_string(), SignalKind::Health), rule);
        AlarmEvaluator::new(rules)
    }

    fn health(value: f64) -> Sample {
        Sample::measured(REGION, SignalKind::Health, value)
    }

    fn feed(eval: &mut AlarmEvaluator, values: &[f64]) -> Vec<AlarmTransition> {
        values
            .iter()
            .filter_map(|v| eval.evaluate(&health(*v)))
            .collect()
    }

    #[test]
    fn test_insufficient_until_window_fills() {
        let mut eval = evaluator(AlarmRule::new(1.0, Comparison::Lt, 3));
        assert!(feed(&mut eval, &[HEALTHY, HEALTHY]).is_empty());
        assert_eq!(
            eval.state(REGION, SignalKind::Health).unwrap().state,
            AlarmStateValue::InsufficientData
        );

        let t = feed(&mut eval, &[HEALTHY]);
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].previous, AlarmStateValue::InsufficientData);
        assert_eq!(t[0].current, AlarmStateValue::Ok);
    }

    #[test]
    fn test_alarm_requires_exactly_n_breaches() {
        let mut eval = evaluator(AlarmRule::new(1.0, Comparison::Lt, 3));
        feed(&mut eval, &[HEALTHY, HEALTHY, HEALTHY]);

        assert!(feed(&mut eval, &[UNHEALTHY, UNHEALTHY]).is_empty());
        let t = feed(&mut eval, &[UNHEALTHY]);
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].current, AlarmStateValue::Alarm);
        assert_eq!(t[0].consecutive_breaches, 3);
    }

    #[test]
    fn test_interrupted_streak_does_not_alarm() {
        let mut eval = evaluator(AlarmRule::new(1.0, Comparison::Lt, 3));
        feed(&mut eval, &[HEALTHY, HEALTHY, HEALTHY]);

        let t = feed(
            &mut eval,
            &[UNHEALTHY, UNHEALTHY, HEALTHY, UNHEALTHY, UNHEALTHY],
        );
        assert!(t.is_empty());
        assert_eq!(
            eval.state(REGION, SignalKind::Health).unwrap().state,
            AlarmStateValue::Ok
        );
    }

    #[test]
    fn test_isolated_good_sample_does_not_clear_alarm() {
        let mut eval = evaluator(AlarmRule::new(1.0, Comparison::Lt, 2));
        feed(&mut eval, &[UNHEALTHY, UNHEALTHY]);
        assert_eq!(
            eval.state(REGION, SignalKind::Health).unwrap().state,
            AlarmStateValue::Alarm
        );

        assert!(feed(&mut eval, &[HEALTHY, UNHEALTHY, HEALTHY]).is_empty());
        let t = feed(&mut eval, &[HEALTHY]);
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].current, AlarmStateValue::Ok);
    }

    #[test]
    fn test_edge_triggered_only() {
        let mut eval = evaluator(AlarmRule::new(1.0, Comparison::Lt, 2));
        let t = feed(&mut eval, &[UNHEALTHY; 10]);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_missing_treated_as_breaching() {
        let mut eval = evaluator(AlarmRule::default_health());
        let missing = Sample::missing(REGION, SignalKind::Health);
        assert!(eval.evaluate(&missing).is_none());
        let t = eval.evaluate(&missing).unwrap();
        assert_eq!(t.current, AlarmStateValue::Alarm);
    }

    #[test]
    fn test_missing_window_is_insufficient_data() {
        let rule = AlarmRule::new(1.0, Comparison::Lt, 2).with_missing(TreatMissingData::Missing);
        let mut eval = evaluator(rule);
        feed(&mut eval, &[HEALTHY, HEALTHY]);

        let missing = Sample::missing(REGION, SignalKind::Health);
        assert!(eval.evaluate(&missing).is_none());
        let t = eval.evaluate(&missing).unwrap();
        assert_eq!(t.previous, AlarmStateValue::Ok);
        assert_eq!(t.current, AlarmStateValue::InsufficientData);
    }

    #[test]
    fn test_unknown_alarm_is_ignored() {
        let mut eval = evaluator(AlarmRule::default_health());
        let sample = Sample::measured("eu-west-1", SignalKind::ReplicationLag, 10.0);
        assert!(eval.evaluate(&sample).is_none());
        assert_eq!(eval.states().len(), 1);
    }

    #[tokio::test]
    async fn test_run_fans_out_transitions() {
        let eval = evaluator(AlarmRule::new(1.0, Comparison::Lt, 2));
        let (sample_tx, sample_rx) = mpsc::channel(16);
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let (states_tx, states_rx) = watch::channel(Vec::new());

        let task = tokio::spawn(eval.run(sample_rx, vec![a_tx, b_tx], states_tx));
        for _ in 0..2 {
            sample_tx.send(health(UNHEALTHY)).await.unwrap();
        }
        drop(sample_tx);
        task.await.unwrap();

        assert_eq!(a_rx.recv().await.unwrap().current, AlarmStateValue::Alarm);
        assert_eq!(b_rx.recv().await.unwrap().current, AlarmStateValue::Alarm);
        assert_eq!(states_rx.borrow()[0].state, AlarmStateValue::Alarm);
    }
}

//! Alarm Module
//!
//! Debounces raw probe samples into alarm states:
//! - Threshold rules with missing-data treatment
//! - Ring-buffer hysteresis per `(region, kind)`
//! - Edge-triggered transitions to subscribers

pub mod evaluator;
pub mod rule;
pub mod state;

pub use evaluator::{AlarmEvaluator, AlarmKey};
pub use rule::{AlarmRule, Comparison, TreatMissingData, Verdict};
pub use state::{AlarmState, AlarmStateValue, AlarmTransition};

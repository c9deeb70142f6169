//! Alarm rules: threshold, comparison and debounce settings.

use crate::core::{Error, Result};
use crate::probe::sample::SampleValue;
use serde::{Deserialize, Serialize};

/// Comparison operators applied as `value <op> threshold`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Comparison {
    Gt,
    Lt,
    Gte,
    Lte,
}

/// How samples without an observation count towards the window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TreatMissingData {
    /// Missing counts as a breach
    Breaching,
    /// Missing counts as within bounds
    NotBreaching,
    /// Missing stays missing; an all-missing window is INSUFFICIENT_DATA
    Missing,
}

/// Classification of one sample against a rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Breach,
    Ok,
    Missing,
}

/// An alarm rule for one `(region, kind)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlarmRule {
    /// Threshold value
    pub threshold: f64,
    /// Comparison operator
    pub comparison: Comparison,
    /// Consecutive samples required to change state
    pub evaluation_periods: usize,
    /// Missing data treatment
    pub treat_missing_data: TreatMissingData,
}

impl AlarmRule {
    /// Create a new alarm rule.
    pub fn new(threshold: f64, comparison: Comparison, evaluation_periods: usize) -> Self {
        Self {
            threshold,
            comparison,
            evaluation_periods,
            treat_missing_data: TreatMissingData::Missing,
        }
    }

    /// Set missing data treatment.
    pub fn with_missing(mut self, treat: TreatMissingData) -> Self {
        self.treat_missing_data = treat;
        self
    }

    /// Default health rule: unhealthy below 1.0 for two periods, missing breaches.
    pub fn default_health() -> Self {
        Self::new(1.0, Comparison::Lt, 2).with_missing(TreatMissingData::Breaching)
    }

    /// Default lag rule: more than 30s behind for two periods.
    pub fn default_replication_lag() -> Self {
        Self::new(30_000.0, Comparison::Gt, 2).with_missing(TreatMissingData::NotBreaching)
    }

    /// Check if a value breaches this rule.
    pub fn breaches(&self, value: f64) -> bool {
        match self.comparison {
            Comparison::Gt => value > self.threshold,
            Comparison::Lt => value < self.threshold,
            Comparison::Gte => value >= self.threshold,
            Comparison::Lte => value <= self.threshold,
        }
    }

    /// Classify a sample value, applying missing data treatment.
    pub fn classify(&self, value: SampleValue) -> Verdict {
        match value {
            SampleValue::Measured(v) if v.is_nan() => self.classify(SampleValue::Missing),
            SampleValue::Measured(v) => {
                if self.breaches(v) {
                    Verdict::Breach
                } else {
                    Verdict::Ok
                }
            }
            SampleValue::Missing => match self.treat_missing_data {
                TreatMissingData::Breaching => Verdict::Breach,
                TreatMissingData::NotBreaching => Verdict::Ok,
                TreatMissingData::Missing => Verdict::Missing,
            },
        }
    }

    /// Reject rules whose behavior would be undefined.
    pub fn validate(&self, label: &str) -> Result<()> {
        if !self.threshold.is_finite() {
            return Err(Error::Config(format!(
                "{}: threshold must be finite, got {}",
                label, self.threshold
            )));
        }
        if self.evaluation_periods == 0 {
            return Err(Error::Config(format!(
                "{}: evaluation_periods must be at least 1",
                label
            )));
        }
        Ok(())
    }
}

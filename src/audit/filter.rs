//! Query filters for audit entries.

use crate::audit::entry::{AuditEntry, EntrySeverity, EntryType};
use crate::core::Timestamp;
use serde::{Deserialize, Serialize};

/// Audit query. Unset criteria match everything.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    pub entry_type: Option<EntryType>,
    pub actor: Option<String>,
    /// Matches targets starting with this, e.g. `us-east-1:` for every alarm of a region
    pub target_prefix: Option<String>,
    /// Minimum severity
    pub min_severity: Option<EntrySeverity>,
    pub success: Option<bool>,
    /// Inclusive time window
    pub window: Option<(Timestamp, Timestamp)>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = Some(entry_type);
        self
    }

    pub fn by_actor(mut self, actor: &str) -> Self {
        self.actor = Some(actor.to_string());
        self
    }

    /// Entries whose target starts with `prefix`.
    pub fn by_target(mut self, prefix: &str) -> Self {
        self.target_prefix = Some(prefix.to_string());
        self
    }

    pub fn by_severity(mut self, severity: EntrySeverity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn between(mut self, from: Timestamp, to: Timestamp) -> Self {
        self.window = Some((from, to));
        self
    }

    pub fn failed_only(mut self) -> Self {
        self.success = Some(false);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.entry_type.as_ref().map_or(true, |t| &entry.entry_type == t)
            && self.actor.as_deref().map_or(true, |a| entry.actor == a)
            && self
                .target_prefix
                .as_deref()
                .map_or(true, |p| entry.target.starts_with(p))
            && self.min_severity.as_ref().map_or(true, |min| &entry.severity >= min)
            && self.success.map_or(true, |s| entry.success == s)
            && self
                .window
                .map_or(true, |(from, to)| entry.timestamp >= from && entry.timestamp <= to)
    }

    /// Matching entries in the order given, up to the limit.
    pub fn apply<'a>(&self, entries: impl IntoIterator<Item = &'a AuditEntry>) -> Vec<AuditEntry> {
        entries
            .into_iter()
            .filter(|e| self.matches(e))
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

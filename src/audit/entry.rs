//! Audit entry structure.
//!
//! Entries are hash-chained: each one commits to its own content and to
//! the hash of the entry written before it.

use crate::core::{now, Hash256, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique entry identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub String);

impl EntryId {
    /// Generate a unique ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the ID string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entry type/category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Alarm changed state
    AlarmTransition,
    /// Controller changed phase
    StateTransition,
    /// DNS record upsert
    DnsMutation,
    /// Finalized failover or failback attempt
    FailoverAttempt,
    /// Operator command accepted or rejected
    OperatorCommand,
}

/// Audit entry severity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntrySeverity {
    Info,
    Warning,
    Critical,
}

/// An audit entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID
    pub id: EntryId,
    /// Entry type
    pub entry_type: EntryType,
    /// Timestamp
    pub timestamp: Timestamp,
    /// Component or operator that acted
    pub actor: String,
    /// Action performed
    pub action: String,
    /// Region, record or alarm affected
    pub target: String,
    /// Outcome
    pub success: bool,
    /// Severity level
    pub severity: EntrySeverity,
    /// Additional metadata
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Hash of the previous entry in the log
    pub prev_hash: Option<Hash256>,
    /// Hash over this entry and `prev_hash`
    pub hash: Option<Hash256>,
}

impl AuditEntry {
    /// Create a new audit entry.
    pub fn new(entry_type: EntryType, actor: &str, action: &str, target: &str) -> Self {
        Self {
            id: EntryId::generate(),
            entry_type,
            timestamp: now(),
            actor: actor.to_string(),
            action: action.to_string(),
            target: target.to_string(),
            success: true,
            severity: EntrySeverity::Info,
            metadata: BTreeMap::new(),
            prev_hash: None,
            hash: None,
        }
    }

    /// Mark as failure.
    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }

    /// Set severity.
    pub fn with_severity(mut self, severity: EntrySeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.metadata.insert(key.to_string(), v);
        }
        self
    }

    fn content_hash(&self) -> Hash256 {
        let prev = self.prev_hash.clone().unwrap_or_default();
        let metadata = serde_json::to_string(&self.metadata).unwrap_or_default();
        let data = format!(
            "{}:{:?}:{}:{}:{}:{}:{}:{:?}:{}",
            self.id,
            self.entry_type,
            self.timestamp.to_rfc3339(),
            self.actor,
            self.action,
            self.target,
            self.success,
            self.severity,
            metadata
        );
        Hash256::digest(&[&prev.as_bytes()[..], data.as_bytes()])
    }

    /// Link to the previous entry and compute this entry's hash.
    pub fn seal(&mut self, prev_hash: Option<Hash256>) -> Hash256 {
        self.prev_hash = prev_hash;
        let hash = self.content_hash();
        self.hash = Some(hash.clone());
        hash
    }

    /// Verify the entry's own hash.
    pub fn verify_hash(&self) -> bool {
        match &self.hash {
            Some(stored) => *stored == self.content_hash(),
            None => false,
        }
    }
}

/// Check hashes and links of an ordered run of entries.
///
/// Returns the index of the first entry that fails verification.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<(), usize> {
    let mut prev: Option<&Hash256> = None;
    for (i, entry) in entries.iter().enumerate() {
        if !entry.verify_hash() {
            return Err(i);
        }
        if i > 0 && entry.prev_hash.as_ref() != prev {
            return Err(i);
        }
        prev = entry.hash.as_ref();
    }
    Ok(())
}

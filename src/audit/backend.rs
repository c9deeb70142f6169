//! Storage seam for the audit log.

use crate::audit::entry::{AuditEntry, EntryId};
use crate::audit::filter::AuditFilter;
use crate::core::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendType {
    /// In-process vector
    Memory,
    /// Append-only JSON lines file
    File,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::Memory => write!(f, "memory"),
            BackendType::File => write!(f, "file"),
        }
    }
}

/// Append-only entry storage.
///
/// Entries are never updated or deleted. A failing
/// `record` must return `Error::AuditWrite`.
#[async_trait]
pub trait AuditBackend: Send + Sync {
    /// Append a sealed entry.
    async fn record(&self, entry: AuditEntry) -> Result<EntryId>;

    /// Query entries matching a filter, in append order.
    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>>;

    fn backend_type(&self) -> BackendType;

    /// Whether writes are currently expected to succeed.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.query(&AuditFilter::new()).await?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_display() {
        assert_eq!(BackendType::Memory.to_string(), "memory");
        assert_eq!(BackendType::File.to_string(), "file");
    }
}

//! In-memory backend implementation.
//!
//! Append-only vector; entries are lost on restart.

use crate::audit::backend::{AuditBackend, BackendType};
use crate::audit::entry::{AuditEntry, EntryId};
use crate::audit::filter::AuditFilter;
use crate::core::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// In-memory audit storage.
pub struct MemoryBackend {
    /// Entries in append order
    entries: RwLock<Vec<AuditEntry>>,
    /// Available flag
    available: AtomicBool,
}

impl MemoryBackend {
    /// Create a new in-memory backend.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Mark storage available or unavailable; writes fail while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Copy of every entry in append order.
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditBackend for MemoryBackend {
    async fn record(&self, entry: AuditEntry) -> Result<EntryId> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::AuditWrite("memory backend unavailable".to_string()));
        }
        let id = entry.id.clone();
        self.entries.write().await.push(entry);
        Ok(id)
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(filter.apply(entries.iter()))
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.entries.read().await.len() as u64)
    }
}

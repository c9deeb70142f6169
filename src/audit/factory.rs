//! Backend factory.
//!
//! Creates audit backends based on configuration.

use crate::audit::backend::AuditBackend;
use crate::audit::backends::{FileBackend, MemoryBackend};
use crate::config::AuditSettings;
use std::sync::Arc;

/// Create an audit backend from configuration.
///
/// Returns an Arc-wrapped backend for shared ownership.
pub fn create_audit_backend(settings: &AuditSettings) -> Arc<dyn AuditBackend> {
    match settings {
        AuditSettings::Memory => Arc::new(MemoryBackend::new()),
        AuditSettings::File { path } => Arc::new(FileBackend::new(path)),
    }
}

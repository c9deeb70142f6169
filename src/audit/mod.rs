//! Audit trail.
//!
//! Append-only, hash-chained record of alarm transitions, controller
//! state changes, DNS mutations and operator commands.
//! - In-memory backend (default)
//! - JSON-lines file backend

pub mod backend;
pub mod backends;
pub mod entry;
pub mod factory;
pub mod filter;
pub mod log;

pub use backend::{AuditBackend, BackendType};
pub use entry::{verify_chain, AuditEntry, EntryId, EntrySeverity, EntryType};
pub use factory::create_audit_backend;
pub use filter::AuditFilter;
pub use log::AuditLog;

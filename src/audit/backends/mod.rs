//! Audit backend implementations.
//!
//! Two append-only backends:
//! - Memory
//! - JSON-lines file

pub mod file;
pub mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

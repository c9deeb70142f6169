//! Core utilities and common types for ARFC.

pub mod error;
pub mod types;

pub use error::{Error, FailbackRejection, Result};
pub use types::*;

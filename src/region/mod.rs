//! Region Module
//!
//! Active/passive failover between two regions:
//! - Region roles and the region pair
//! - Failover attempts and finalized events
//! - The single-writer failover controller and its handle

pub mod controller;
pub mod failover;
pub mod handle;
pub mod manager;

pub use controller::{ControllerPhase, ControllerSnapshot, FailoverController};
pub use failover::{FailoverAttempt, FailoverEvent, FailoverKind, TriggerSource};
pub use handle::{ControllerCommand, ControllerHandle};
pub use manager::{Region, RegionPair, RegionRole, RegionSet};

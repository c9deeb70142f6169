//! Configuration Module
//!
//! Immutable startup configuration, validated before anything runs.

pub mod settings;

pub use settings::{
    AlarmOverride, AlarmSettings, ArfcConfig, AuditSettings, ChannelConfig, ControllerSettings,
    DnsSettings, NotificationSettings, ProbeSettings, RegionConfig, RegionPairConfig,
};

#[cfg(test)]
pub(crate) use settings::test_config;

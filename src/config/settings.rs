//! Startup configuration.
//!
//! Loaded once from JSON, validated, then shared read-only.

use crate::alarm::{AlarmKey, AlarmRule};
use crate::core::{Error, Result};
use crate::probe::sample::SignalKind;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArfcConfig {
    /// The active/passive region pair
    pub regions: RegionPairConfig,
    /// Probe and gauge polling
    #[serde(default)]
    pub probes: ProbeSettings,
    /// Alarm rules
    #[serde(default)]
    pub alarms: AlarmSettings,
    /// Controller timing
    #[serde(default)]
    pub controller: ControllerSettings,
    /// DNS record and retry policy
    pub dns: DnsSettings,
    /// Notification fan-out
    #[serde(default)]
    pub notifications: NotificationSettings,
    /// Audit storage
    #[serde(default)]
    pub audit: AuditSettings,
}

/// Configured primary and secondary region.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionPairConfig {
    /// Region serving traffic at startup
    pub primary: RegionConfig,
    /// Standby region
    pub secondary: RegionConfig,
}

/// One region.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Region name (e.g. "us-east-1")
    pub name: String,
    /// Base URL; the probe hits `<endpoint>/health`
    pub endpoint: String,
    /// Replication lag metric for this region's replica
    pub lag_metric_id: String,
}

/// Probe intervals and timeouts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub health_interval_secs: u64,
    pub health_timeout_secs: u64,
    pub lag_interval_secs: u64,
    pub lag_timeout_secs: u64,
    /// Lag datapoints older than this count as missing
    pub lag_max_staleness_secs: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            health_interval_secs: 30,
            health_timeout_secs: 5,
            lag_interval_secs: 60,
            lag_timeout_secs: 10,
            lag_max_staleness_secs: 180,
        }
    }
}

impl ProbeSettings {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn lag_interval(&self) -> Duration {
        Duration::from_secs(self.lag_interval_secs)
    }

    pub fn lag_timeout(&self) -> Duration {
        Duration::from_secs(self.lag_timeout_secs)
    }

    pub fn lag_max_staleness(&self) -> Duration {
        Duration::from_secs(self.lag_max_staleness_secs)
    }
}

/// Alarm rules per signal kind, with per-region overrides.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmSettings {
    pub health: AlarmRule,
    pub replication_lag: AlarmRule,
    pub overrides: Vec<AlarmOverride>,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            health: AlarmRule::default_health(),
            replication_lag: AlarmRule::default_replication_lag(),
            overrides: Vec::new(),
        }
    }
}

/// Rule replacing the default for one `(region, kind)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlarmOverride {
    pub region: String,
    pub kind: SignalKind,
    pub rule: AlarmRule,
}

/// Controller timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// How long the primary must stay in ALARM before failover commits
    pub grace_period_secs: u64,
    /// Overall budget for a DNS transition, including retries
    pub rto_deadline_secs: u64,
    /// How often the grace timer is checked
    pub tick_interval_ms: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            grace_period_secs: 120,
            rto_deadline_secs: 900,
            tick_interval_ms: 1000,
        }
    }
}

impl ControllerSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn rto_deadline(&self) -> Duration {
        Duration::from_secs(self.rto_deadline_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// DNS failover record and retry policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsSettings {
    pub zone_id: String,
    pub record_name: String,
    pub ttl_seconds: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            zone_id: String::new(),
            record_name: String::new(),
            ttl_seconds: 60,
            max_attempts: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 16_000,
        }
    }
}

/// Notification fan-out policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Window in which notifications with the same dedup key collapse
    pub cooldown_secs: u64,
    /// Delivery attempts per channel before a record is abandoned
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub channels: Vec<ChannelConfig>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: 300,
            max_attempts: 3,
            retry_backoff_ms: 500,
            channels: vec![ChannelConfig::Log {
                name: "log".to_string(),
            }],
        }
    }
}

impl NotificationSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// A notification channel endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// JSON POST to a URL
    Webhook { name: String, url: String },
    /// Structured log line
    Log { name: String },
}

impl ChannelConfig {
    /// Channel name.
    pub fn name(&self) -> &str {
        match self {
            ChannelConfig::Webhook { name, .. } | ChannelConfig::Log { name } => name,
        }
    }
}

/// Audit storage selection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum AuditSettings {
    /// Keep entries in memory
    #[default]
    Memory,
    /// Append JSON lines to a file
    File { path: PathBuf },
}

impl ArfcConfig {
    /// Minimal config with defaults for everything but the regions and DNS record.
    pub fn new(primary: RegionConfig, secondary: RegionConfig, zone_id: &str, record_name: &str) -> Self {
        Self {
            regions: RegionPairConfig { primary, secondary },
            probes: ProbeSettings::default(),
            alarms: AlarmSettings::default(),
            controller: ControllerSettings::default(),
            dns: DnsSettings {
                zone_id: zone_id.to_string(),
                record_name: record_name.to_string(),
                ..Default::default()
            },
            notifications: NotificationSettings::default(),
            audit: AuditSettings::default(),
        }
    }

    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| Error::Config(format!("malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Both regions, primary first.
    pub fn region_configs(&self) -> [&RegionConfig; 2] {
        [&self.regions.primary, &self.regions.secondary]
    }

    /// Effective rule for every `(region, kind)`.
    pub fn alarm_rules(&self) -> HashMap<AlarmKey, AlarmRule> {
        let mut rules = HashMap::new();
        for region in self.region_configs() {
            rules.insert(
                (region.name.clone(), SignalKind::Health),
                self.alarms.health.clone(),
            );
            rules.insert(
                (region.name.clone(), SignalKind::ReplicationLag),
                self.alarms.replication_lag.clone(),
            );
        }
        for o in &self.alarms.overrides {
            rules.insert((o.region.clone(), o.kind), o.rule.clone());
        }
        rules
    }

    /// Evaluation periods for a `(region, kind)`.
    pub fn evaluation_periods(&self, region: &str, kind: SignalKind) -> usize {
        self.alarm_rules()
            .get(&(region.to_string(), kind))
            .map(|r| r.evaluation_periods)
            .unwrap_or(0)
    }

    /// Refuse configurations with undefined behavior.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for region in self.region_configs() {
            if region.name.trim().is_empty() {
                return Err(Error::Config("region name must not be empty".to_string()));
            }
            if !names.insert(region.name.as_str()) {
                return Err(Error::Config(format!("duplicate region name {}", region.name)));
            }
            validate_url(&region.endpoint).map_err(|reason| {
                Error::ProbeConfiguration(format!(
                    "region {} endpoint {:?}: {}",
                    region.name, region.endpoint, reason
                ))
            })?;
            if region.lag_metric_id.trim().is_empty() {
                return Err(Error::Config(format!(
                    "region {} has no lag_metric_id",
                    region.name
                )));
            }
        }

        let p = &self.probes;
        if p.health_interval_secs == 0 || p.lag_interval_secs == 0 {
            return Err(Error::ProbeConfiguration("probe intervals must be non-zero".to_string()));
        }
        if p.health_timeout_secs == 0 || p.health_timeout_secs >= p.health_interval_secs {
            return Err(Error::ProbeConfiguration(
                "health timeout must be non-zero and shorter than the health interval".to_string(),
            ));
        }
        if p.lag_timeout_secs == 0 || p.lag_timeout_secs >= p.lag_interval_secs {
            return Err(Error::ProbeConfiguration(
                "lag timeout must be non-zero and shorter than the lag interval".to_string(),
            ));
        }

        self.alarms.health.validate("alarms.health")?;
        self.alarms.replication_lag.validate("alarms.replication_lag")?;
        for o in &self.alarms.overrides {
            if !names.contains(o.region.as_str()) {
                return Err(Error::Config(format!(
                    "alarm override names unknown region {}",
                    o.region
                )));
            }
            o.rule.validate(&format!("alarms.overrides[{}/{}]", o.region, o.kind))?;
        }

        let c = &self.controller;
        if c.tick_interval_ms == 0 {
            return Err(Error::Config("controller.tick_interval_ms must be non-zero".to_string()));
        }
        if c.rto_deadline_secs == 0 {
            return Err(Error::Config("controller.rto_deadline_secs must be non-zero".to_string()));
        }

        let d = &self.dns;
        if d.zone_id.trim().is_empty() || d.record_name.trim().is_empty() {
            return Err(Error::Config("dns.zone_id and dns.record_name are required".to_string()));
        }
        if d.ttl_seconds == 0 {
            return Err(Error::Config("dns.ttl_seconds must be non-zero".to_string()));
        }
        if d.max_attempts == 0 {
            return Err(Error::Config("dns.max_attempts must be at least 1".to_string()));
        }
        if d.initial_backoff_ms > d.max_backoff_ms {
            return Err(Error::Config(
                "dns.initial_backoff_ms must not exceed dns.max_backoff_ms".to_string(),
            ));
        }

        let n = &self.notifications;
        if n.max_attempts == 0 {
            return Err(Error::Config("notifications.max_attempts must be at least 1".to_string()));
        }
        let mut channel_names = HashSet::new();
        for channel in &n.channels {
            if !channel_names.insert(channel.name()) {
                return Err(Error::Config(format!("duplicate channel name {}", channel.name())));
            }
            if let ChannelConfig::Webhook { name, url } = channel {
                validate_url(url).map_err(|reason| {
                    Error::Config(format!("channel {} url {:?}: {}", name, url, reason))
                })?;
            }
        }

        Ok(())
    }
}

fn validate_url(raw: &str) -> std::result::Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(format!("unsupported scheme {}", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(url)
}

#[cfg(test)]
pub(crate) fn test_config() -> ArfcConfig {
    ArfcConfig::new(
        RegionConfig {
            name: "us-east-1".to_string(),
            endpoint: "https://use1.example.com".to_string(),
            lag_metric_id: "lag-use1".to_string(),
        },
        RegionConfig {
            name: "us-west-2".to_string(),
            endpoint: "https://usw2.example.com".to_string(),
            lag_metric_id: "lag-usw2".to_string(),
        },
        "Z123",
        "app.example.com",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::Comparison;

    const SAMPLE: &str = r#"{
        "regions": {
            "primary": { "name": "us-east-1", "endpoint": "https://use1.example.com", "lag_metric_id": "lag-use1" },
            "secondary": { "name": "us-west-2", "endpoint": "https://usw2.example.com", "lag_metric_id": "lag-usw2" }
        },
        "dns": { "zone_id": "Z123", "record_name": "app.example.com" },
        "notifications": {
            "channels": [
                { "type": "webhook", "name": "oncall", "url": "https://hooks.example.com/oncall" },
                { "type": "log", "name": "log" }
            ]
        },
        "audit": { "backend": "file", "path": "/var/lib/arfc/audit.jsonl" }
    }"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = ArfcConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.probes.health_interval_secs, 30);
        assert_eq!(config.probes.lag_interval_secs, 60);
        assert_eq!(config.controller.grace_period_secs, 120);
        assert_eq!(config.dns.max_attempts, 5);
        assert_eq!(config.notifications.cooldown_secs, 300);
        assert_eq!(config.notifications.channels.len(), 2);
        assert_eq!(
            config.audit,
            AuditSettings::File {
                path: PathBuf::from("/var/lib/arfc/audit.jsonl")
            }
        );
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_rejects_malformed_endpoint() {
        let mut config = test_config();
        config.regions.secondary.endpoint = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(Error::ProbeConfiguration(_))
        ));

        config.regions.secondary.endpoint = "ftp://usw2.example.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(Error::ProbeConfiguration(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_regions() {
        let mut config = test_config();
        config.regions.secondary.name = "us-east-1".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let mut config = test_config();
        config.alarms.replication_lag.threshold = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.alarms.health.evaluation_periods = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_timeout_not_shorter_than_interval() {
        let mut config = test_config();
        config.probes.health_timeout_secs = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_missing_dns_record() {
        let mut config = test_config();
        config.dns.zone_id = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unparseable_json() {
        assert!(matches!(
            ArfcConfig::from_json_str("{ \"regions\": 1 }"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = test_config();
        config.alarms.overrides.push(AlarmOverride {
            region: "us-west-2".to_string(),
            kind: SignalKind::Health,
            rule: AlarmRule::new(1.0, Comparison::Lt, 4),
        });
        assert!(config.validate().is_ok());
        assert_eq!(config.evaluation_periods("us-west-2", SignalKind::Health), 4);
        assert_eq!(config.evaluation_periods("us-east-1", SignalKind::Health), 2);
        assert_eq!(config.alarm_rules().len(), 4);

        config.alarms.overrides[0].region = "ap-south-1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_webhook() {
        let mut config = test_config();
        config.notifications.channels.push(ChannelConfig::Webhook {
            name: "hook".to_string(),
            url: "nowhere".to_string(),
        });
        assert!(config.validate().is_err());
    }
}

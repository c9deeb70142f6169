//! Regions and their failover roles.
//!
//! The controller owns a `RegionSet` and is the only writer of roles.

use crate::alarm::AlarmStateValue;
use crate::config::RegionPairConfig;
use crate::core::{now, Timestamp};
use serde::{Deserialize, Serialize};

/// Failover role of a region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegionRole {
    /// Serving traffic
    Primary,
    /// Standby
    Secondary,
}

impl std::fmt::Display for RegionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegionRole::Primary => write!(f, "PRIMARY"),
            RegionRole::Secondary => write!(f, "SECONDARY"),
        }
    }
}

/// A region taking part in failover.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Region name
    pub name: String,
    /// Current role
    pub role: RegionRole,
    /// Base URL
    pub endpoint: String,
    /// Last known health alarm state
    pub last_health_state: AlarmStateValue,
    /// When `role` or `last_health_state` last changed
    pub last_transition_time: Timestamp,
}

impl Region {
    /// Create a region with no health data yet.
    pub fn new(name: &str, role: RegionRole, endpoint: &str) -> Self {
        Self {
            name: name.to_string(),
            role,
            endpoint: endpoint.to_string(),
            last_health_state: AlarmStateValue::InsufficientData,
            last_transition_time: now(),
        }
    }

    /// Check if region currently serves traffic.
    pub fn is_primary(&self) -> bool {
        self.role == RegionRole::Primary
    }
}

/// Operator-facing name of a region pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionPair {
    /// Region that should hold PRIMARY
    pub primary: String,
    /// Region that should hold SECONDARY
    pub secondary: String,
}

impl RegionPair {
    pub fn new(primary: &str, secondary: &str) -> Self {
        Self {
            primary: primary.to_string(),
            secondary: secondary.to_string(),
        }
    }
}

impl std::fmt::Display for RegionPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.primary, self.secondary)
    }
}

/// The two regions of an active/passive pair.
///
/// Exactly one region holds `RegionRole::Primary` at any time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionSet {
    regions: [Region; 2],
    /// Pair as configured at startup
    home: RegionPair,
}

impl RegionSet {
    /// Build the pair from configuration; the configured primary starts as PRIMARY.
    pub fn from_config(config: &RegionPairConfig) -> Self {
        Self {
            regions: [
                Region::new(&config.primary.name, RegionRole::Primary, &config.primary.endpoint),
                Region::new(
                    &config.secondary.name,
                    RegionRole::Secondary,
                    &config.secondary.endpoint,
                ),
            ],
            home: RegionPair::new(&config.primary.name, &config.secondary.name),
        }
    }

    /// Region currently holding PRIMARY.
    pub fn primary(&self) -> &Region {
        if self.regions[0].is_primary() {
            &self.regions[0]
        } else {
            &self.regions[1]
        }
    }

    /// Region currently holding SECONDARY.
    pub fn secondary(&self) -> &Region {
        if self.regions[0].is_primary() {
            &self.regions[1]
        } else {
            &self.regions[0]
        }
    }

    /// Pair as configured at startup.
    pub fn home(&self) -> &RegionPair {
        &self.home
    }

    /// Whether the configured primary is serving traffic.
    pub fn is_home(&self) -> bool {
        self.primary().name == self.home.primary
    }

    /// Get a region by name.
    pub fn get(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Record a health alarm state change.
    pub fn record_health(&mut self, name: &str, state: AlarmStateValue, at: Timestamp) {
        if let Some(region) = self.regions.iter_mut().find(|r| r.name == name) {
            if region.last_health_state != state {
                region.last_health_state = state;
                region.last_transition_time = at;
            }
        }
    }

    /// Exchange PRIMARY and SECONDARY.
    pub fn swap_roles(&mut self) {
        let at = now();
        for region in self.regions.iter_mut() {
            region.role = match region.role {
                RegionRole::Primary => RegionRole::Secondary,
                RegionRole::Secondary => RegionRole::Primary,
            };
            region.last_transition_time = at;
        }
    }

    /// Both regions, configured primary first.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    #[test]
    fn test_initial_roles() {
        let set = RegionSet::from_config(&test_config().regions);
        assert_eq!(set.primary().name, "us-east-1");
        assert_eq!(set.secondary().name, "us-west-2");
        assert!(set.is_home());
        assert_eq!(
            set.regions().iter().filter(|r| r.is_primary()).count(),
            1
        );
    }

    #[test]
    fn test_swap_roles() {
        let mut set = RegionSet::from_config(&test_config().regions);
        set.swap_roles();
        assert_eq!(set.primary().name, "us-west-2");
        assert_eq!(set.secondary().name, "us-east-1");
        assert!(!set.is_home());
        assert_eq!(set.home().primary, "us-east-1");
        assert_eq!(
            set.regions().iter().filter(|r| r.is_primary()).count(),
            1
        );

        set.swap_roles();
        assert!(set.is_home());
    }

    #[test]
    fn test_record_health() {
        let mut set = RegionSet::from_config(&test_config().regions);
        let at = now();
        set.record_health("us-east-1", AlarmStateValue::Alarm, at);
        assert_eq!(set.get("us-east-1").unwrap().last_health_state, AlarmStateValue::Alarm);
        assert_eq!(set.get("us-east-1").unwrap().last_transition_time, at);
        assert_eq!(
            set.get("us-west-2").unwrap().last_health_state,
            AlarmStateValue::InsufficientData
        );

        // Unknown regions are ignored
        set.record_health("eu-west-1", AlarmStateValue::Ok, at);
        assert!(set.get("eu-west-1").is_none());
    }

    #[test]
    fn test_region_pair_display() {
        assert_eq!(RegionPair::new("a", "b").to_string(), "a/b");
    }
}

//! Known beacon table: fixed positions plus liveness
//!
//! Beacons are created from configuration at startup and never removed.
//! Heartbeats only touch battery and last-seen, so the position table handed
//! to the estimator is effectively immutable.

use crate::domain::error::EngineError;
use crate::domain::types::{Beacon, Position};
use crate::infra::config::{Config, FixedBeacon, UnknownBeaconPolicy};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Beacon id to fixed position, as consumed by the estimator
pub type BeaconPositions = FxHashMap<String, Position>;

/// Read-only beacon state for the query boundary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeaconView {
    pub position: Position,
    pub battery: f64,
    pub last_seen: u64,
}

impl From<&Beacon> for BeaconView {
    fn from(beacon: &Beacon) -> Self {
        Self { position: beacon.position, battery: beacon.battery, last_seen: beacon.last_seen }
    }
}

pub struct BeaconRegistry {
    beacons: FxHashMap<String, Beacon>,
    configured: Vec<FixedBeacon>,
    policy: UnknownBeaconPolicy,
}

impl BeaconRegistry {
    pub fn new(fixed: &[FixedBeacon], policy: UnknownBeaconPolicy, now: u64) -> Self {
        let mut registry =
            Self { beacons: FxHashMap::default(), configured: fixed.to_vec(), policy };
        registry.reset(now);
        registry
    }

    pub fn from_config(config: &Config, now: u64) -> Self {
        Self::new(config.beacons(), config.unknown_beacon_policy(), now)
    }

    /// Restore the configured beacon table (cold start)
    pub fn reset(&mut self, now: u64) {
        self.beacons = self
            .configured
            .iter()
            .map(|b| (b.id.clone(), Beacon::new(b.id.clone(), b.position(), now)))
            .collect();
    }

    /// Make sure `beacon_id` is known, registering it at the origin when the
    /// policy allows.
    pub fn admit(&mut self, beacon_id: &str, now: u64) -> Result<(), EngineError> {
        if self.beacons.contains_key(beacon_id) {
            return Ok(());
        }
        match self.policy {
            UnknownBeaconPolicy::Reject => Err(EngineError::UnknownBeacon(beacon_id.to_string())),
            UnknownBeaconPolicy::Register => {
                info!(beacon_id = %beacon_id, "beacon_registered_at_origin");
                self.beacons
                    .insert(beacon_id.to_string(), Beacon::new(beacon_id, Position::ORIGIN, now));
                Ok(())
            }
        }
    }

    /// Record a beacon heartbeat. Battery is clamped to 0-100; a non-finite
    /// battery value leaves the previous level in place.
    pub fn heartbeat(&mut self, beacon_id: &str, battery: f64, now: u64) -> Result<(), EngineError> {
        self.admit(beacon_id, now)?;
        if let Some(beacon) = self.beacons.get_mut(beacon_id) {
            if battery.is_finite() {
                beacon.battery = battery.clamp(0.0, 100.0);
            }
            beacon.last_seen = beacon.last_seen.max(now);
            debug!(beacon_id = %beacon_id, battery = %beacon.battery, "beacon_heartbeat");
        }
        Ok(())
    }

    /// Fixed position table used by the estimator
    pub fn positions(&self) -> BeaconPositions {
        self.beacons.iter().map(|(id, b)| (id.clone(), b.position)).collect()
    }

    pub fn get(&self, beacon_id: &str) -> Option<&Beacon> {
        self.beacons.get(beacon_id)
    }

    pub fn contains(&self, beacon_id: &str) -> bool {
        self.beacons.contains_key(beacon_id)
    }

    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    pub fn policy(&self) -> UnknownBeaconPolicy {
        self.policy
    }

    /// Copy of all beacon state, ordered by id
    pub fn snapshot(&self) -> BTreeMap<String, BeaconView> {
        self.beacons.iter().map(|(id, b)| (id.clone(), BeaconView::from(b))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(policy: UnknownBeaconPolicy) -> BeaconRegistry {
        BeaconRegistry::from_config(&Config::default().with_unknown_beacon_policy(policy), 1_000)
    }

    #[test]
    fn test_configured_beacons_loaded() {
        let registry = registry(UnknownBeaconPolicy::Reject);
        assert_eq!(registry.len(), 3);
        let beacon = registry.get("ESP32_3").unwrap();
        assert_eq!(beacon.position, Position::new(1.0, 2.0));
        assert_eq!(beacon.battery, 100.0);
        assert_eq!(beacon.last_seen, 1_000);
    }

    #[test]
    fn test_heartbeat_updates_known_beacon() {
        let mut registry = registry(UnknownBeaconPolicy::Reject);
        registry.heartbeat("ESP32_1", 42.0, 5_000).unwrap();
        let beacon = registry.get("ESP32_1").unwrap();
        assert_eq!(beacon.battery, 42.0);
        assert_eq!(beacon.last_seen, 5_000);
        assert_eq!(beacon.position, Position::ORIGIN);
    }

    #[test]
    fn test_heartbeat_clamps_battery() {
        let mut registry = registry(UnknownBeaconPolicy::Reject);
        registry.heartbeat("ESP32_1", 180.0, 2_000).unwrap();
        assert_eq!(registry.get("ESP32_1").unwrap().battery, 100.0);
        registry.heartbeat("ESP32_1", -3.0, 2_000).unwrap();
        assert_eq!(registry.get("ESP32_1").unwrap().battery, 0.0);
        registry.heartbeat("ESP32_1", f64::NAN, 2_000).unwrap();
        assert_eq!(registry.get("ESP32_1").unwrap().battery, 0.0);
    }

    #[test]
    fn test_unknown_beacon_rejected() {
        let mut registry = registry(UnknownBeaconPolicy::Reject);
        assert_eq!(
            registry.heartbeat("ROGUE", 90.0, 2_000),
            Err(EngineError::UnknownBeacon("ROGUE".to_string()))
        );
        assert!(!registry.contains("ROGUE"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_unknown_beacon_registered_at_origin() {
        let mut registry = registry(UnknownBeaconPolicy::Register);
        registry.heartbeat("NEW", 77.0, 2_000).unwrap();
        let beacon = registry.get("NEW").unwrap();
        assert_eq!(beacon.position, Position::ORIGIN);
        assert_eq!(beacon.battery, 77.0);
        assert_eq!(registry.positions().len(), 4);
    }

    #[test]
    fn test_positions_table() {
        let registry = registry(UnknownBeaconPolicy::Reject);
        let positions = registry.positions();
        assert_eq!(positions.get("ESP32_2"), Some(&Position::new(3.0, 0.0)));
        assert!(positions.get("ESP32_9").is_none());
    }

    #[test]
    fn test_reset_restores_configured_table() {
        let mut registry = registry(UnknownBeaconPolicy::Register);
        registry.heartbeat("NEW", 50.0, 2_000).unwrap();
        registry.heartbeat("ESP32_1", 10.0, 2_000).unwrap();
        registry.reset(3_000);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("ESP32_1").unwrap().battery, 100.0);
        assert_eq!(registry.get("ESP32_1").unwrap().last_seen, 3_000);
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let registry = registry(UnknownBeaconPolicy::Reject);
        let ids: Vec<String> = registry.snapshot().into_keys().collect();
        assert_eq!(ids, vec!["ESP32_1", "ESP32_2", "ESP32_3"]);
    }
}

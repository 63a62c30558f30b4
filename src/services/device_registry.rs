//! Tracked device state
//!
//! The registry exclusively owns every device record and its per-beacon
//! reading windows. Each accepted reading:
//! 1. lands in the (device, beacon) window
//! 2. re-estimates the position once enough beacons have data
//! 3. refreshes contacts with nearby devices
//! 4. triggers the inactivity sweep
//!
//! Eviction is driven by the `now` passed to each update, not by a timer.

use crate::domain::distance::DistanceModel;
use crate::domain::error::EngineError;
use crate::domain::estimator::{Estimate, PositionEstimator};
use crate::domain::types::{Contact, Position};
use crate::domain::window::ReadingWindow;
use crate::infra::config::Config;
use crate::services::beacon_registry::BeaconPositions;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Tracked mobile device
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    /// Reading window per beacon id
    pub readings: FxHashMap<String, ReadingWindow>,
    /// Last accepted reading (epoch ms)
    pub last_seen: u64,
    /// Current estimate, `Position::ORIGIN` until first located
    pub position: Position,
    /// Whether `position` holds a real estimate
    pub located: bool,
    pub device_type: String,
    pub contacts: Vec<Contact>,
}

impl Device {
    fn new(id: &str, device_type: &str, now: u64) -> Self {
        Self {
            id: id.to_string(),
            readings: FxHashMap::default(),
            last_seen: now,
            position: Position::ORIGIN,
            located: false,
            device_type: device_type.to_string(),
            contacts: Vec::new(),
        }
    }

    /// Number of beacons with at least one reading
    pub fn beacons_with_data(&self) -> usize {
        self.readings.values().filter(|w| !w.is_empty()).count()
    }
}

/// Read-only device state for the query boundary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceView {
    pub position: Position,
    pub last_seen: u64,
    pub device_type: String,
    /// Average RSSI per beacon
    pub rssi_readings: BTreeMap<String, Option<f64>>,
    pub contacts: Vec<Contact>,
}

impl From<&Device> for DeviceView {
    fn from(device: &Device) -> Self {
        Self {
            position: device.position,
            last_seen: device.last_seen,
            device_type: device.device_type.clone(),
            rssi_readings: device
                .readings
                .iter()
                .map(|(beacon_id, window)| (beacon_id.clone(), window.average()))
                .collect(),
            contacts: device.contacts.clone(),
        }
    }
}

/// Result of one accepted reading
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    /// Devices tracked after the update and sweep
    pub device_count: usize,
    /// Set when the device's position was re-estimated
    pub estimate: Option<Estimate>,
    pub created: bool,
    pub evicted: Vec<String>,
    pub contacts_closed: usize,
}

/// Unordered device pair, stored smaller id first
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PairKey(String, String);

impl PairKey {
    fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_string(), b.to_string())
        } else {
            Self(b.to_string(), a.to_string())
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.0 == id || self.1 == id
    }

    fn other(&self, id: &str) -> &str {
        if self.0 == id {
            &self.1
        } else {
            &self.0
        }
    }
}

pub struct DeviceRegistry {
    devices: FxHashMap<String, Device>,
    /// Open contacts by pair, value is the start time
    open_contacts: FxHashMap<PairKey, u64>,
    distance_model: DistanceModel,
    estimator: PositionEstimator,
    window_capacity: usize,
    inactivity_threshold_ms: u64,
    rssi_min: f64,
    rssi_max: f64,
    min_beacons: usize,
    contact_radius_m: f64,
}

impl DeviceRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            devices: FxHashMap::default(),
            open_contacts: FxHashMap::default(),
            distance_model: config.distance_model(),
            estimator: PositionEstimator::new(config.estimation()),
            window_capacity: config.window_capacity(),
            inactivity_threshold_ms: config.inactivity_threshold_ms(),
            rssi_min: config.rssi_min(),
            rssi_max: config.rssi_max(),
            min_beacons: config.min_beacons(),
            contact_radius_m: config.contact_radius_m(),
        }
    }

    /// Apply one RSSI reading of `device_id` heard by `beacon_id`.
    ///
    /// Out-of-range readings fail with `InvalidReading` and leave all state
    /// untouched, including the sweep.
    pub fn update(
        &mut self,
        device_id: &str,
        beacon_id: &str,
        rssi: f64,
        device_type: &str,
        now: u64,
        beacon_positions: &BeaconPositions,
    ) -> Result<UpdateOutcome, EngineError> {
        if !self.is_valid_rssi(rssi) {
            debug!(device_id = %device_id, beacon_id = %beacon_id, rssi = %rssi, "reading_dropped");
            return Err(EngineError::InvalidReading { rssi });
        }

        let created = !self.devices.contains_key(device_id);
        if created {
            info!(device_id = %device_id, beacon_id = %beacon_id, "device_created");
        }
        let window_capacity = self.window_capacity;
        let device = self
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| Device::new(device_id, device_type, now));

        device
            .readings
            .entry(beacon_id.to_string())
            .or_insert_with(|| ReadingWindow::new(window_capacity))
            .push(rssi);
        device.last_seen = device.last_seen.max(now);
        if device.device_type != device_type {
            device.device_type = device_type.to_string();
        }
        debug!(device_id = %device_id, beacon_id = %beacon_id, rssi = %rssi, "reading_applied");

        let mut estimate = None;
        if device.beacons_with_data() >= self.min_beacons {
            let distances = smoothed_distances(device, &self.distance_model);
            match self.estimator.locate(&distances, beacon_positions) {
                Ok(result) => {
                    device.position = result.position;
                    device.located = true;
                    debug!(
                        device_id = %device_id,
                        x = %result.position.x,
                        y = %result.position.y,
                        beacons = %result.beacons_used,
                        "position_updated"
                    );
                    estimate = Some(result);
                }
                Err(e) => {
                    debug!(device_id = %device_id, reason = %e, "position_unchanged");
                }
            }
        }

        let mut contacts_closed = 0;
        if estimate.is_some() {
            contacts_closed += self.refresh_contacts(device_id, now);
        }

        let (evicted, swept_contacts) = self.sweep(now);
        contacts_closed += swept_contacts;

        Ok(UpdateOutcome {
            device_count: self.devices.len(),
            estimate,
            created,
            evicted,
            contacts_closed,
        })
    }

    /// Remove devices idle for longer than the inactivity threshold.
    /// Returns evicted ids and the number of contacts closed by eviction.
    pub fn sweep(&mut self, now: u64) -> (Vec<String>, usize) {
        let threshold = self.inactivity_threshold_ms;
        let mut stale: Vec<String> = self
            .devices
            .values()
            .filter(|d| now.saturating_sub(d.last_seen) > threshold)
            .map(|d| d.id.clone())
            .collect();
        stale.sort();

        let mut contacts_closed = 0;
        for device_id in &stale {
            if let Some(device) = self.devices.remove(device_id) {
                info!(
                    device_id = %device_id,
                    idle_ms = %now.saturating_sub(device.last_seen),
                    "device_evicted"
                );
                contacts_closed += self.close_contacts_of(device_id, device.last_seen);
            }
        }
        (stale, contacts_closed)
    }

    /// Open or close contacts between `device_id` and every other located device
    fn refresh_contacts(&mut self, device_id: &str, now: u64) -> usize {
        if self.contact_radius_m <= 0.0 {
            return 0;
        }
        let Some(position) = self.devices.get(device_id).map(|d| d.position) else {
            return 0;
        };

        let neighbours: Vec<(String, bool)> = self
            .devices
            .values()
            .filter(|other| other.located && other.id != device_id)
            .map(|other| {
                (other.id.clone(), position.distance_to(&other.position) <= self.contact_radius_m)
            })
            .collect();

        let mut closed = 0;
        for (other_id, near) in neighbours {
            let key = PairKey::new(device_id, &other_id);
            if near {
                if !self.open_contacts.contains_key(&key) {
                    info!(device_a = %key.0, device_b = %key.1, "contact_opened");
                    self.open_contacts.insert(key, now);
                }
            } else if let Some(start) = self.open_contacts.remove(&key) {
                self.record_contact(&key, start, now);
                closed += 1;
            }
        }
        closed
    }

    /// Close every open contact involving an evicted device
    fn close_contacts_of(&mut self, device_id: &str, end: u64) -> usize {
        let keys: Vec<PairKey> =
            self.open_contacts.keys().filter(|k| k.contains(device_id)).cloned().collect();
        for key in &keys {
            if let Some(start) = self.open_contacts.remove(key) {
                self.record_contact(key, start, end);
            }
        }
        keys.len()
    }

    /// Append the closed contact to whichever side of the pair is still tracked
    fn record_contact(&mut self, key: &PairKey, start: u64, end: u64) {
        let duration_ms = end.saturating_sub(start);
        info!(device_a = %key.0, device_b = %key.1, duration_ms = %duration_ms, "contact_closed");
        for id in [&key.0, &key.1] {
            if let Some(device) = self.devices.get_mut(id.as_str()) {
                device.contacts.push(Contact {
                    device_id: key.other(id).to_string(),
                    start_time: start,
                    duration_ms,
                });
            }
        }
    }

    /// Whether `rssi` falls inside the configured plausible band
    pub fn is_valid_rssi(&self, rssi: f64) -> bool {
        (self.rssi_min..=self.rssi_max).contains(&rssi)
    }

    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Number of contacts currently open
    pub fn open_contact_count(&self) -> usize {
        self.open_contacts.len()
    }

    /// Drop all devices (cold start)
    pub fn clear(&mut self) {
        self.devices.clear();
        self.open_contacts.clear();
    }

    /// Copy of all device state, ordered by id
    pub fn snapshot(&self) -> BTreeMap<String, DeviceView> {
        self.devices.iter().map(|(id, d)| (id.clone(), DeviceView::from(d))).collect()
    }
}

/// Window averages converted through the path-loss model
fn smoothed_distances(device: &Device, model: &DistanceModel) -> BTreeMap<String, f64> {
    device
        .readings
        .iter()
        .filter_map(|(beacon_id, window)| {
            window.average().map(|avg| (beacon_id.clone(), model.distance(avg)))
        })
        .collect()
}

//! Proximity tracking orchestration
//!
//! The tracker is the entry point for beacon reports. It coordinates:
//! - Beacon admission and heartbeats (beacon registry)
//! - Per-device reading windows and position estimates (device registry)
//! - Position records to the persistence sink
//! - Metrics for every report
//!
//! Both registries sit behind their own lock. A report takes the beacon lock,
//! copies the position table, releases it, then takes the device lock; the two
//! locks are never held together.


use crate::domain::distance::DistanceModel;
use crate::domain::error::EngineError;
use crate::domain::estimator::{Estimate, Method};
use crate::domain::types::{BeaconReport, IngestOutcome, PositionRecord};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::position_channel::PositionSender;
use crate::services::beacon_registry::{BeaconRegistry, BeaconView};
use crate::services::device_registry::{DeviceRegistry, DeviceView, UpdateOutcome};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Full state copy for the query boundary
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub beacons: BTreeMap<String, BeaconView>,
    pub devices: BTreeMap<String, DeviceView>,
}

/// Central report processor shared across request handlers
pub struct ProximityTracker {
    devices: RwLock<DeviceRegistry>,
    beacons: RwLock<BeaconRegistry>,
    /// Model used for ad-hoc proximity queries
    distance_model: DistanceModel,
    metrics: Arc<Metrics>,
    /// Persistence sink (optional)
    sink: Option<PositionSender>,
}

impl ProximityTracker {
    pub fn new(
        config: &Config,
        metrics: Arc<Metrics>,
        sink: Option<PositionSender>,
        now: u64,
    ) -> Self {
        let beacons = BeaconRegistry::from_config(config, now);
        info!(
            beacons = %beacons.len(),
            policy = ?beacons.policy(),
            estimation = %config.estimation().as_str(),
            sink = %sink.is_some(),
            "tracker_initialized"
        );
        Self {
            devices: RwLock::new(DeviceRegistry::new(config)),
            beacons: RwLock::new(beacons),
            distance_model: config.distance_model(),
            metrics,
            sink,
        }
    }

    /// Apply one beacon report: heartbeat, then every sighting in order.
    ///
    /// Individual sightings can be dropped (out-of-range RSSI); the report as a
    /// whole is never rejected. A report from a beacon the registry refuses
    /// drops all of its sightings.
    pub fn ingest(&self, report: &BeaconReport, now: u64) -> IngestOutcome {
        let start = Instant::now();
        if let Some(ts) = report.timestamp {
            let lag_ms = (now as i64).saturating_sub(ts as i64);
            debug!(
                beacon_id = %report.beacon,
                lag_ms = %lag_ms,
                sightings = %report.devices.len(),
                "report_received"
            );
        }

        let positions = {
            let mut beacons = self.beacons.write();
            match beacons.heartbeat(&report.beacon, report.battery, now) {
                Ok(()) => Some(beacons.positions()),
                Err(e) => {
                    warn!(beacon_id = %report.beacon, error = %e, "report_rejected");
                    None
                }
            }
        };

        let mut applied = 0;
        let mut dropped = 0;
        let mut records = Vec::new();
        let device_count = {
            let mut devices = self.devices.write();
            match positions {
                Some(positions) => {
                    for sighting in &report.devices {
                        match devices.update(
                            &sighting.id,
                            &report.beacon,
                            sighting.rssi,
                            &sighting.device_type,
                            now,
                            &positions,
                        ) {
                            Ok(outcome) => {
                                applied += 1;
                                self.metrics.record_reading_applied();
                                self.observe(&sighting.id, &outcome, now, &mut records);
                            }
                            Err(_) => {
                                dropped += 1;
                                self.metrics.record_reading_dropped();
                            }
                        }
                    }
                }
                None => {
                    self.metrics.record_unknown_beacon();
                    for _ in &report.devices {
                        dropped += 1;
                        self.metrics.record_reading_dropped();
                    }
                }
            }
            if applied == 0 {
                let (evicted, contacts_closed) = devices.sweep(now);
                self.metrics.record_evictions(evicted.len() as u64);
                self.metrics.record_contacts_closed(contacts_closed as u64);
            }
            devices.len()
        };

        self.publish(records);
        self.metrics.set_tracked_devices(device_count);
        self.metrics.record_report(start.elapsed().as_micros() as u64);

        debug!(
            beacon_id = %report.beacon,
            applied = %applied,
            dropped = %dropped,
            device_count = %device_count,
            "report_applied"
        );
        IngestOutcome { device_count, applied, dropped }
    }

    /// Apply a single reading. Returns the number of tracked devices.
    pub fn update(
        &self,
        device_id: &str,
        beacon_id: &str,
        rssi: f64,
        device_type: &str,
        now: u64,
    ) -> Result<usize, EngineError> {
        // Reject before admission so a bad reading never registers a beacon
        if !self.devices.read().is_valid_rssi(rssi) {
            debug!(device_id = %device_id, beacon_id = %beacon_id, rssi = %rssi, "reading_dropped");
            self.metrics.record_reading_dropped();
            return Err(EngineError::InvalidReading { rssi });
        }

        let positions = {
            let mut beacons = self.beacons.write();
            beacons.admit(beacon_id, now)?;
            beacons.positions()
        };

        let mut records = Vec::new();
        let result = {
            let mut devices = self.devices.write();
            devices.update(device_id, beacon_id, rssi, device_type, now, &positions)
        };
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.record_reading_dropped();
                return Err(e);
            }
        };

        self.metrics.record_reading_applied();
        self.observe(device_id, &outcome, now, &mut records);
        self.publish(records);
        self.metrics.set_tracked_devices(outcome.device_count);
        Ok(outcome.device_count)
    }

    /// Record a beacon heartbeat without readings
    pub fn heartbeat(&self, beacon_id: &str, battery: f64, now: u64) -> Result<(), EngineError> {
        self.beacons.write().heartbeat(beacon_id, battery, now)
    }

    /// Cold start: drop every device and restore the configured beacon table
    pub fn reset(&self, now: u64) {
        self.beacons.write().reset(now);
        self.devices.write().clear();
        self.metrics.set_tracked_devices(0);
        info!("tracker_reset");
    }

    /// Difference between the distances implied by two readings
    pub fn proximity(&self, rssi_a: f64, rssi_b: f64) -> f64 {
        self.distance_model.proximity(rssi_a, rssi_b)
    }

    pub fn snapshot(&self) -> Snapshot {
        let beacons = self.beacons.read().snapshot();
        let devices = self.devices.read().snapshot();
        Snapshot { beacons, devices }
    }

    pub fn device(&self, device_id: &str) -> Result<DeviceView, EngineError> {
        self.devices
            .read()
            .get(device_id)
            .map(DeviceView::from)
            .ok_or_else(|| EngineError::UnknownDevice(device_id.to_string()))
    }

    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }

    pub fn beacon_count(&self) -> usize {
        self.beacons.read().len()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Fold one update outcome into metrics and pending sink records
    fn observe(
        &self,
        device_id: &str,
        outcome: &UpdateOutcome,
        now: u64,
        records: &mut Vec<PositionRecord>,
    ) {
        if let Some(Estimate { position, method, fell_back, .. }) = outcome.estimate {
            self.metrics.record_position(method == Method::Trilateration, fell_back);
            if self.sink.is_some() {
                records.push(PositionRecord {
                    device_id: device_id.to_string(),
                    x: position.x,
                    y: position.y,
                    ts: now,
                });
            }
        }
        self.metrics.record_evictions(outcome.evicted.len() as u64);
        self.metrics.record_contacts_closed(outcome.contacts_closed as u64);
    }

    fn publish(&self, records: Vec<PositionRecord>) {
        if let Some(ref sink) = self.sink {
            for record in records {
                sink.send(record);
            }
        }
    }
}

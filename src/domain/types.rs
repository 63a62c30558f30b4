//! Shared types for the proximity engine

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in epoch milliseconds
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// 2D position in meters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Sentinel for "no usable distance data"
    pub const ORIGIN: Position = Position { x: 0.0, y: 0.0 };

    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl From<(f64, f64)> for Position {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// A fixed receiver with a known position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Beacon {
    pub id: String,
    pub position: Position,
    /// Battery level, 0-100
    pub battery: f64,
    /// Last heartbeat (epoch ms)
    pub last_seen: u64,
}

impl Beacon {
    pub fn new(id: impl Into<String>, position: Position, now: u64) -> Self {
        Self { id: id.into(), position, battery: 100.0, last_seen: now }
    }
}

/// Proximity event between two devices
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contact {
    pub device_id: String,
    pub start_time: u64,
    pub duration_ms: u64,
}

/// Device type tag used when a sighting carries none
pub const DEFAULT_DEVICE_TYPE: &str = "unknown";

fn default_device_type() -> String {
    DEFAULT_DEVICE_TYPE.to_string()
}

fn default_battery() -> f64 {
    100.0
}

/// One device heard by a beacon in a report
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSighting {
    pub id: String,
    pub rssi: f64,
    #[serde(rename = "type", default = "default_device_type")]
    pub device_type: String,
}

/// Beacon report as delivered by the ingestion boundary
#[derive(Debug, Clone, Deserialize)]
pub struct BeaconReport {
    pub beacon: String,
    #[serde(default = "default_battery")]
    pub battery: f64,
    #[serde(default)]
    pub devices: Vec<DeviceSighting>,
    /// Beacon-side timestamp (epoch ms), informational only
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// Outcome of applying one beacon report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub device_count: usize,
    pub applied: usize,
    pub dropped: usize,
}

/// Estimated position handed to the persistence sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRecord {
    pub device_id: String,
    pub x: f64,
    pub y: f64,
    pub ts: u64,
}

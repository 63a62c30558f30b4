//! Domain models - positioning math and core types
//!
//! This module contains the pure, stateless parts of the engine:
//! - `distance` - RSSI to distance path-loss model
//! - `window` - bounded per-(device, beacon) reading history
//! - `estimator` - weighted centroid and linearized trilateration
//! - `error` - recoverable engine error taxonomy
//! - `types` - beacons, positions, contacts and wire payloads

pub mod distance;
pub mod error;
pub mod estimator;
pub mod types;
pub mod window;

pub use distance::DistanceModel;
pub use error::EngineError;
pub use estimator::{EstimationMode, PositionEstimator};
pub use types::{epoch_ms, Position};
pub use window::ReadingWindow;

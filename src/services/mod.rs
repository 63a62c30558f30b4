//! Services - tracking state and orchestration
//!
//! - `beacon_registry` - Fixed beacon table, battery and heartbeat state
//! - `device_registry` - Per-device reading windows, positions, contacts, eviction
//! - `tracker` - Report ingestion across both registries

pub mod beacon_registry;
pub mod device_registry;
pub mod tracker;

// Re-export commonly used types
pub use beacon_registry::{BeaconPositions, BeaconRegistry, BeaconView};
pub use device_registry::{Device, DeviceRegistry, DeviceView};
pub use tracker::{ProximityTracker, Snapshot};

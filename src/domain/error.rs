//! Recoverable engine errors
//!
//! Nothing here is fatal to the process. Callers either absorb the error with
//! a defined fallback or hand it back to the ingestion boundary as a soft error.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("rssi {rssi} outside valid range")]
    InvalidReading { rssi: f64 },
    #[error("insufficient data: {usable} usable beacon distances")]
    InsufficientData { usable: usize },
    #[error("singular beacon geometry")]
    SingularGeometry,
    #[error("unknown beacon {0}")]
    UnknownBeacon(String),
    #[error("unknown device {0}")]
    UnknownDevice(String),
}

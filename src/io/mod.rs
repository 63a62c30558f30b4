//! IO modules - external system interfaces
//!
//! - `http` - Ingestion and query HTTP server
//! - `prometheus` - Prometheus text exposition for `/metrics`
//! - `position_channel` - Bounded channel feeding the persistence sink
//! - `egress` - Position records to file (JSONL format)

pub mod egress;
pub mod http;
pub mod position_channel;
pub mod prometheus;

// Re-export commonly used types
pub use egress::PositionEgress;
pub use http::{start_http_server, AppState};
pub use position_channel::{create_position_channel, PositionSender};

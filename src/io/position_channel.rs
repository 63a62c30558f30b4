//! Typed channel for position records
//!
//! Non-blocking handoff from the tracker to the persistence writer. The
//! channel is bounded; when full, records are dropped and counted.

use crate::domain::types::PositionRecord;
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Sender handle for position records
///
/// Clone this to share across producers.
#[derive(Clone)]
pub struct PositionSender {
    tx: mpsc::Sender<PositionRecord>,
    metrics: Arc<Metrics>,
}

impl PositionSender {
    pub fn new(tx: mpsc::Sender<PositionRecord>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    /// Queue a record without waiting. Returns false if it was dropped.
    pub fn send(&self, record: PositionRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(e) => {
                let record = match &e {
                    mpsc::error::TrySendError::Full(r) | mpsc::error::TrySendError::Closed(r) => r,
                };
                debug!(device_id = %record.device_id, reason = %e, "position_sink_dropped");
                self.metrics.record_sink_dropped();
                false
            }
        }
    }
}

/// Create a position channel pair with the given buffer size
pub fn create_position_channel(
    buffer_size: usize,
    metrics: Arc<Metrics>,
) -> (PositionSender, mpsc::Receiver<PositionRecord>) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    (PositionSender::new(tx, metrics), rx)
}

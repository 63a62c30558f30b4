//! Position egress - appends position records to a file
//!
//! Records are written in JSONL format (one JSON object per line) to the
//! file named in config. The writer task drains the position channel until
//! shutdown or until every sender is gone.

use crate::domain::types::PositionRecord;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

/// Egress writer for position records
pub struct PositionEgress {
    file_path: String,
}

impl PositionEgress {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "egress_initialized");
        Self { file_path: file_path.to_string() }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Write one record to the egress file
    /// Returns true if successful, false otherwise
    pub fn write_record(&self, record: &PositionRecord) -> bool {
        let result = serde_json::to_string(record)
            .map_err(std::io::Error::other)
            .and_then(|json| self.append_line(&json));

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(device_id = %record.device_id, error = %e, "position_egress_failed");
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "egress_written");

        Ok(())
    }

    /// Drain the channel into the file until shutdown or channel close.
    /// Records already queued at shutdown are flushed before returning.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<PositionRecord>,
        mut shutdown: watch::Receiver<bool>,
    ) -> usize {
        let mut written = 0;
        loop {
            tokio::select! {
                record = rx.recv() => {
                    match record {
                        Some(record) => {
                            if self.write_record(&record) {
                                written += 1;
                            }
                        }
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        while let Ok(record) = rx.try_recv() {
                            if self.write_record(&record) {
                                written += 1;
                            }
                        }
                        break;
                    }
                }
            }
        }
        info!(file_path = %self.file_path, written = %written, "egress_stopped");
        written
    }
}

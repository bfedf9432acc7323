//! Persistence sink abstraction for polled telemetry.
//!
//! The poller hands each non-empty [`PollBatch`] to a [`TelemetrySink`] as one
//! atomic upsert keyed by device name. Implementations live elsewhere
//! (PostgreSQL in `robolink-store`); [`MemorySink`] is provided for tests and
//! for running the gateway without a database.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::telemetry::{PollBatch, TelemetryRecord};

/// Errors reported by a telemetry sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The backing store could not be reached.
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the batch; nothing from it was applied.
    #[error("Batch rejected: {0}")]
    Rejected(String),
}

/// Destination for poll batches.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Insert or overwrite one row per record, keyed by `device_name`.
    ///
    /// Returns the number of rows written.
    async fn upsert_telemetry(&self, batch: &PollBatch) -> Result<usize, SinkError>;
}

#[async_trait]
impl<T: TelemetrySink + ?Sized> TelemetrySink for Arc<T> {
    async fn upsert_telemetry(&self, batch: &PollBatch) -> Result<usize, SinkError> {
        (**self).upsert_telemetry(batch).await
    }
}

/// In-memory sink keyed by device name.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Mutex<BTreeMap<String, TelemetryRecord>>,
    batches: AtomicU64,
    reject: AtomicBool,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent upserts fail (or succeed again).
    pub fn reject_batches(&self, reject: bool) {
        self.reject.store(reject, Ordering::Relaxed);
    }

    /// Number of upsert calls that reached the sink, including rejected ones.
    pub fn batch_count(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Number of distinct devices stored.
    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    /// Stored record for a device.
    pub fn get(&self, device_name: &str) -> Option<TelemetryRecord> {
        self.rows.lock().get(device_name).cloned()
    }

    /// Copy of all stored rows, ordered by device name.
    pub fn snapshot(&self) -> Vec<TelemetryRecord> {
        self.rows.lock().values().cloned().collect()
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn upsert_telemetry(&self, batch: &PollBatch) -> Result<usize, SinkError> {
        self.batches.fetch_add(1, Ordering::Relaxed);

        if self.reject.load(Ordering::Relaxed) {
            return Err(SinkError::Rejected("memory sink set to reject".to_string()));
        }

        let mut rows = self.rows.lock();
        for (_, record) in batch {
            rows.insert(record.device_name.clone(), record.clone());
        }
        Ok(batch.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::SlotId;

    fn batch_with(cycles: u32) -> PollBatch {
        let mut batch = PollBatch::new();
        batch.insert(
            SlotId::new(1).unwrap(),
            TelemetryRecord {
                device_name: "101".to_string(),
                is_active: true,
                mode: 0,
                cycles_current: cycles,
                cycles_total: 5000 + cycles,
                oee: 91.0,
            },
        );
        batch
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_device_name() {
        let sink = MemorySink::new();

        sink.upsert_telemetry(&batch_with(1)).await.unwrap();
        sink.upsert_telemetry(&batch_with(2)).await.unwrap();

        assert_eq!(sink.batch_count(), 2);
        assert_eq!(sink.row_count(), 1);
        assert_eq!(sink.get("101").unwrap().cycles_current, 2);
    }

    #[tokio::test]
    async fn test_rejecting_sink_keeps_rows() {
        let sink = MemorySink::new();
        sink.upsert_telemetry(&batch_with(1)).await.unwrap();

        sink.reject_batches(true);
        let result = sink.upsert_telemetry(&batch_with(2)).await;

        assert!(matches!(result, Err(SinkError::Rejected(_))));
        assert_eq!(sink.get("101").unwrap().cycles_current, 1);
    }

    #[tokio::test]
    async fn test_arc_sink_delegates() {
        let sink = Arc::new(MemorySink::new());
        let dyn_sink: Arc<dyn TelemetrySink> = sink.clone();

        let written = dyn_sink.upsert_telemetry(&batch_with(3)).await.unwrap();

        assert_eq!(written, 1);
        assert_eq!(sink.row_count(), 1);
    }
}

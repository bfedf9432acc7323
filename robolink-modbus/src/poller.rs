//! Cyclic controller polling and telemetry persistence.

use std::sync::Arc;
use std::time::Duration;

use robolink_common::{PollBatch, SinkError, SlotId, TelemetrySink};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::fieldbus::{Fieldbus, TcpFieldbus};
use crate::register_map::{RegisterMap, RegisterMapError};

/// Error type for polling operations.
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Read failed for {slot}: {reason}")]
    Read { slot: SlotId, reason: String },
    #[error("Malformed block from {slot}: {source}")]
    Decode {
        slot: SlotId,
        #[source]
        source: RegisterMapError,
    },
    #[error("Persistence failed: {0}")]
    Persistence(#[from] SinkError),
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The sink accepted the batch.
    Persisted { records: usize },
    /// Connected, but no slot produced a record; the sink was not called.
    NoData,
    /// The sink rejected the batch.
    PersistenceFailed,
    /// No connection; no slot was read.
    ConnectionFailed,
}

/// Polls every configured slot once per period and upserts the results.
pub struct TelemetryPoller {
    fieldbus: Box<dyn Fieldbus>,
    sink: Arc<dyn TelemetrySink>,
    register_map: RegisterMap,
    slave_count: u8,
    oee_scale: f64,
    poll_interval: Duration,
    backoff: Duration,
}

impl TelemetryPoller {
    /// Create a poller talking Modbus TCP to the configured gateway.
    pub fn from_config(config: &ControllerConfig, sink: Arc<dyn TelemetrySink>) -> Self {
        let fieldbus = TcpFieldbus::new(config.host.clone(), config.port, config.timeout());
        Self::new(config, fieldbus, sink)
    }

    /// Create a poller over an arbitrary fieldbus.
    pub fn new(
        config: &ControllerConfig,
        fieldbus: impl Fieldbus + 'static,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            fieldbus: Box::new(fieldbus),
            sink,
            register_map: config.register_map.clone(),
            slave_count: config.slave_count,
            oee_scale: config.oee_scale,
            poll_interval: config.poll_interval(),
            backoff: config.backoff(),
        }
    }

    /// Run the polling loop until `shutdown` turns true.
    ///
    /// Cycles start on period boundaries measured from the previous cycle's
    /// start; a cycle that overruns its period skips the missed boundaries.
    /// After a connection failure the next attempt waits the full backoff.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            slaves = self.slave_count,
            block_len = self.register_map.block_len(),
            interval_secs = self.poll_interval.as_secs(),
            "Starting telemetry poller"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let started = Instant::now();
            let next = match self.run_cycle().await {
                CycleOutcome::ConnectionFailed => started + self.backoff,
                _ => next_boundary(started, self.poll_interval, Instant::now()),
            };

            tokio::select! {
                _ = tokio::time::sleep_until(next) => {}
                _ = shutdown.wait_for(|stopping| *stopping) => break,
            }
        }

        info!("Telemetry poller stopped");
    }

    /// Poll once and hand the batch to the sink.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let batch = match self.poll_once().await {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, backoff_secs = self.backoff.as_secs(), "Controller unreachable, skipping cycle");
                return CycleOutcome::ConnectionFailed;
            }
        };

        for name in batch.duplicate_names() {
            warn!(device = name, "Device name reported by more than one slot; highest slot wins");
        }

        if batch.is_empty() {
            info!("No data available from any slot this cycle");
            return CycleOutcome::NoData;
        }

        match self.sink.upsert_telemetry(&batch).await {
            Ok(records) => {
                debug!(records, "Telemetry batch persisted");
                CycleOutcome::Persisted { records }
            }
            Err(e) => {
                error!(error = %PollerError::from(e), records = batch.len(), "Failed to persist telemetry batch");
                CycleOutcome::PersistenceFailed
            }
        }
    }

    /// Read every slot over a single connection.
    ///
    /// Fails only when the connection cannot be opened; a slot whose read or
    /// decode fails is logged and left out of the batch.
    pub async fn poll_once(&self) -> Result<PollBatch, PollerError> {
        let mut session = self.fieldbus.connect().await?;
        let count = self.register_map.block_len();
        let mut batch = PollBatch::new();

        for slot in SlotId::range(self.slave_count) {
            let record = match session.read_holding_block(slot, count).await {
                Ok(words) => self
                    .register_map
                    .decode(&words, self.oee_scale)
                    .map_err(|source| PollerError::Decode { slot, source }),
                Err(e) => Err(e),
            };

            match record {
                Ok(record) => {
                    debug!(%slot, device = %record.device_name, mode = record.mode, "Read device");
                    batch.insert(slot, record);
                }
                Err(e) => warn!(%slot, error = %e, "Skipping device this cycle"),
            }
        }

        session.disconnect().await;
        Ok(batch)
    }
}

/// First boundary `start + k * period` (k >= 1) that lies after `now`.
fn next_boundary(start: Instant, period: Duration, now: Instant) -> Instant {
    let mut next = start + period;
    if next <= now {
        let missed = u32::try_from((now - start).as_nanos() / period.as_nanos()).unwrap_or(u32::MAX);
        warn!(missed, "Poll cycle overran its period");
        next = start + period.saturating_mul(missed) + period;
    }
    next
}

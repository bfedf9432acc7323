//! RoboLink Common Library
//!
//! Shared types and utilities for the RoboLink gateway crates:
//!
//! - [`telemetry`] - Telemetry data model (`TelemetryRecord`, `PollBatch`, `SlotId`)
//! - [`sink`] - Persistence sink trait and an in-memory implementation
//! - [`config`] - Logging settings and secret redaction
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod sink;
pub mod telemetry;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, redact};
pub use error::{Error, Result};
pub use sink::{MemorySink, SinkError, TelemetrySink};
pub use telemetry::{MAX_SLOT_ID, MachineMode, PollBatch, SlotId, TelemetryRecord};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over `config.level` when set.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(false))
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_current_span(false))
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}

//! Modbus TCP telemetry poller for RoboLink machine controllers.
//!
//! Each poll cycle opens one TCP connection to the controller gateway and
//! reads a fixed holding-register block from every device slot:
//!
//! ```text
//! unit id 1..=slave_count, function 0x03, address 0, count N
//! ```
//!
//! The block is decoded through a [`RegisterMap`] into a
//! [`TelemetryRecord`](robolink_common::TelemetryRecord), and the cycle's
//! records go to the [`TelemetrySink`](robolink_common::TelemetrySink) as one
//! batch.

pub mod config;
pub mod fieldbus;
pub mod poller;
pub mod register_map;

pub use config::{ConfigError, ControllerConfig};
pub use fieldbus::{Fieldbus, FieldbusSession, TcpFieldbus};
pub use poller::{CycleOutcome, PollerError, TelemetryPoller};
pub use register_map::{Field, RegisterMap, RegisterMapError, RegisterOffsets};

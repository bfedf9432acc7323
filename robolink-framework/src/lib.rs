//! RoboLink Service Framework
//!
//! Shared plumbing for the long-running RoboLink gateway components.
//!
//! # Overview
//!
//! This framework provides:
//! - [`ServiceConfig`] trait for configuration loading and validation
//! - [`ServiceRunner`] for lifecycle management (startup, shutdown, signal handling)
//! - [`ServiceArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use robolink_framework::{ServiceArgs, ServiceConfig, ServiceRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GatewayConfig::load(&args.service.config)?;
//!     let mut runner = ServiceRunner::new_with_args("robolink", config, Some(&args.service))?;
//!
//!     let shutdown = runner.shutdown_signal();
//!     runner.spawn("poller", poller.run(shutdown));
//!
//!     runner.run().await?;
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod error;
mod runner;

pub use args::ServiceArgs;
pub use config::ServiceConfig;
pub use error::{Result, ServiceError};
pub use runner::ServiceRunner;

pub use robolink_common::{LogFormat, LoggingConfig};

use thiserror::Error;

/// Common error type for RoboLink components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid slot id: {0}")]
    InvalidSlot(String),
}

/// Result type alias using RoboLink's Error.
pub type Result<T> = std::result::Result<T, Error>;

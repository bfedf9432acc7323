//! CLI arguments shared by RoboLink services.

use std::path::PathBuf;

/// Common CLI arguments, flattened into each binary's own parser.
#[derive(clap::Args, Debug, Clone)]
pub struct ServiceArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, default_value = "robolink.json5")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

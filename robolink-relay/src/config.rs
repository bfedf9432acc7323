//! Camera and relay configuration.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use robolink_common::redact;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// ONVIF camera whose stream is relayed.
#[derive(Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Camera address (IP or hostname)
    pub host: String,

    /// ONVIF HTTP port (default: 80)
    #[serde(default = "default_onvif_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Media profile to stream; chosen automatically when unset
    #[serde(default)]
    pub profile_token: Option<String>,

    /// Timeout for each ONVIF request in milliseconds
    #[serde(default = "default_camera_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_onvif_port() -> u16 {
    80
}

fn default_camera_timeout_ms() -> u64 {
    5000
}

impl CameraConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "camera.host must not be empty".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "camera.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if matches!(&self.profile_token, Some(t) if t.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "camera.profile_token must not be empty when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl fmt::Debug for CameraConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("profile_token", &self.profile_token)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Decoder process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfmpegConfig {
    /// Executable name or path
    #[serde(default = "default_ffmpeg_binary")]
    pub binary: String,

    /// RTSP lower transport: "tcp" or "udp"
    #[serde(default = "default_rtsp_transport")]
    pub rtsp_transport: String,

    /// Time allowed for the first frame to arrive, in milliseconds
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
}

fn default_ffmpeg_binary() -> String {
    "ffmpeg".to_string()
}

fn default_rtsp_transport() -> String {
    "tcp".to_string()
}

fn default_open_timeout_ms() -> u64 {
    10_000
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary: default_ffmpeg_binary(),
            rtsp_transport: default_rtsp_transport(),
            open_timeout_ms: default_open_timeout_ms(),
        }
    }
}

/// WebSocket relay server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Listen address (default: 0.0.0.0:8765)
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// WebSocket path (default: "/")
    #[serde(default = "default_path")]
    pub path: String,

    /// Pacing between frames in milliseconds
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// JPEG quality, 1-100
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Encoded frames buffered per viewer before the oldest is dropped;
    /// rounded up to a power of two
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    #[serde(default)]
    pub ffmpeg: FfmpegConfig,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8765))
}

fn default_path() -> String {
    "/".to_string()
}

fn default_frame_interval_ms() -> u64 {
    33
}

fn default_jpeg_quality() -> u8 {
    70
}

fn default_queue_depth() -> usize {
    2
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            frame_interval_ms: default_frame_interval_ms(),
            jpeg_quality: default_jpeg_quality(),
            queue_depth: default_queue_depth(),
            ffmpeg: FfmpegConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "relay.path must start with '/', got '{}'",
                self.path
            )));
        }
        if self.path == "/health" {
            return Err(ConfigError::Validation(
                "relay.path '/health' is reserved".to_string(),
            ));
        }
        if self.frame_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "relay.frame_interval_ms must be greater than 0".to_string(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Validation(format!(
                "relay.jpeg_quality must be 1-100, got {}",
                self.jpeg_quality
            )));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Validation(
                "relay.queue_depth must be at least 1".to_string(),
            ));
        }
        if self.ffmpeg.binary.trim().is_empty() {
            return Err(ConfigError::Validation(
                "relay.ffmpeg.binary must not be empty".to_string(),
            ));
        }
        if !matches!(self.ffmpeg.rtsp_transport.as_str(), "tcp" | "udp") {
            return Err(ConfigError::Validation(format!(
                "relay.ffmpeg.rtsp_transport must be 'tcp' or 'udp', got '{}'",
                self.ffmpeg.rtsp_transport
            )));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

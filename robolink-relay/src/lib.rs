//! Camera stream resolution and WebSocket video relay.
//!
//! A viewer connecting to the relay gets its own session:
//!
//! ```text
//! ONVIF GetCapabilities -> GetProfiles -> GetStreamUri
//!     -> ffmpeg (RTSP -> PPM frames) -> JPEG -> base64 text messages
//! ```
//!
//! Sessions share nothing but the resolver and decoder configuration, so one
//! viewer's stream ending or stalling never affects another.

pub mod config;
pub mod encode;
pub mod endpoint;
pub mod onvif;
pub mod server;
pub mod session;
pub mod soap;
pub mod source;

pub use config::{CameraConfig, ConfigError, FfmpegConfig, RelayConfig};
pub use endpoint::StreamEndpoint;
pub use onvif::{EndpointResolver, MediaProfile, OnvifClient, OnvifResolver, ResolutionError};
pub use server::{RelayError, RelayServer, create_router};
pub use session::{Relay, SessionEnd, SessionReport, SessionSettings, ViewerMessage};
pub use source::{FfmpegOpener, FrameSource, SourceOpener, StreamError};

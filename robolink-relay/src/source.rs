//! Decoded frame sources.
//!
//! Each viewer session opens its own [`FrameSource`]. The production opener
//! runs an `ffmpeg` child that decodes the RTSP stream and writes raw PPM
//! frames to its stdout; the child is killed when the source is dropped.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use crate::config::FfmpegConfig;
use crate::endpoint::StreamEndpoint;

/// Largest frame accepted from the decoder: 8K UHD, about 100 MB of RGB.
const MAX_PIXELS: u64 = 7680 * 4320;

/// Errors from opening or reading a frame source.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Failed to start decoder: {0}")]
    Spawn(String),
    #[error("Stream did not produce a frame: {0}")]
    Open(String),
    #[error("Malformed frame: {0}")]
    Malformed(String),
    #[error("Frame encoding failed: {0}")]
    Encode(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A stream of decoded frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the stream has ended.
    async fn next_frame(&mut self) -> Result<Option<RgbImage>, StreamError>;
}

/// Opens a fresh frame source for an endpoint.
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, endpoint: &StreamEndpoint) -> Result<Box<dyn FrameSource>, StreamError>;
}

/// Opens sources by spawning `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegOpener {
    config: FfmpegConfig,
}

impl FfmpegOpener {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    /// Decoder arguments. The input URI carries credentials.
    fn args(&self, input: &str) -> Vec<String> {
        [
            "-hide_banner",
            "-loglevel",
            "error",
            "-rtsp_transport",
            self.config.rtsp_transport.as_str(),
            "-i",
            input,
            "-an",
            "-f",
            "image2pipe",
            "-vcodec",
            "ppm",
            "-",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

#[async_trait]
impl SourceOpener for FfmpegOpener {
    async fn open(&self, endpoint: &StreamEndpoint) -> Result<Box<dyn FrameSource>, StreamError> {
        let input = endpoint
            .authenticated_uri()
            .map_err(|e| StreamError::Open(e.to_string()))?;

        let mut child = Command::new(&self.config.binary)
            .args(self.args(input.as_str()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StreamError::Spawn(format!("{}: {}", self.config.binary, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StreamError::Spawn("decoder stdout unavailable".to_string()))?;

        let mut source = FfmpegSource {
            _child: child,
            reader: BufReader::new(stdout),
            pending: None,
        };

        // The decoder only reports a dead stream by exiting, so wait for the
        // first frame before calling the source open.
        let timeout = Duration::from_millis(self.config.open_timeout_ms);
        let first = tokio::time::timeout(timeout, read_ppm(&mut source.reader))
            .await
            .map_err(|_| StreamError::Open(format!("no frame within {} ms", self.config.open_timeout_ms)))?
            .map_err(|e| StreamError::Open(e.to_string()))?
            .ok_or_else(|| StreamError::Open("decoder exited before the first frame".to_string()))?;

        debug!(uri = %endpoint, width = first.width(), height = first.height(), "Decoder started");
        source.pending = Some(first);
        Ok(Box::new(source))
    }
}

struct FfmpegSource {
    _child: Child,
    reader: BufReader<ChildStdout>,
    pending: Option<RgbImage>,
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn next_frame(&mut self) -> Result<Option<RgbImage>, StreamError> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        read_ppm(&mut self.reader).await
    }
}

/// Read one binary PPM (`P6`) image.
///
/// Returns `None` on a clean end of stream before the first header byte.
pub async fn read_ppm<R>(reader: &mut R) -> Result<Option<RgbImage>, StreamError>
where
    R: AsyncBufRead + AsyncRead + Unpin,
{
    if reader.fill_buf().await?.is_empty() {
        return Ok(None);
    }

    let magic = read_token(reader).await?;
    if magic != "P6" {
        return Err(StreamError::Malformed(format!("unsupported magic {:?}", magic)));
    }

    let width = parse_number(&read_token(reader).await?, "width")?;
    let height = parse_number(&read_token(reader).await?, "height")?;
    let max_value = parse_number(&read_token(reader).await?, "max value")?;

    if width == 0 || height == 0 || u64::from(width) * u64::from(height) > MAX_PIXELS {
        return Err(StreamError::Malformed(format!("bad dimensions {}x{}", width, height)));
    }
    if max_value != 255 {
        return Err(StreamError::Malformed(format!("unsupported max value {}", max_value)));
    }

    let mut data = vec![0u8; width as usize * height as usize * 3];
    reader.read_exact(&mut data).await?;

    RgbImage::from_raw(width, height, data)
        .map(Some)
        .ok_or_else(|| StreamError::Malformed("pixel buffer size mismatch".to_string()))
}

/// Next whitespace-delimited header token; consumes exactly one trailing
/// whitespace byte and skips `#` comments.
async fn read_token<R>(reader: &mut R) -> Result<String, StreamError>
where
    R: AsyncRead + Unpin,
{
    let mut token = String::new();
    loop {
        let byte = reader.read_u8().await?;
        match byte {
            b'#' if token.is_empty() => {
                while reader.read_u8().await? != b'\n' {}
            }
            b if b.is_ascii_whitespace() => {
                if !token.is_empty() {
                    return Ok(token);
                }
            }
            b if token.len() < 16 => token.push(b as char),
            _ => return Err(StreamError::Malformed("header token too long".to_string())),
        }
    }
}

fn parse_number(token: &str, what: &str) -> Result<u32, StreamError> {
    token
        .parse()
        .map_err(|_| StreamError::Malformed(format!("invalid {} {:?}", what, token)))
}

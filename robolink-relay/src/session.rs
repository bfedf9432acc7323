//! Per-viewer relay sessions.
//!
//! Every session resolves the camera endpoint, opens its own frame source and
//! runs two halves:
//!
//! - a producer task that reads, encodes and queues one frame per interval
//! - the session loop that drains the queue into the viewer connection
//!
//! The queue is a bounded broadcast channel with a single receiver, so when
//! the viewer falls behind the oldest queued frames are overwritten and the
//! producer never waits on the network.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures::{Sink, SinkExt};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::RelayConfig;
use crate::encode::encode_frame_blocking;
use crate::onvif::EndpointResolver;
use crate::source::{FrameSource, SourceOpener, StreamError};

/// Close code for a normal end of stream.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code sent when the server is shutting down.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code for a stream that could not be resolved or opened.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// How long a closing viewer gets to take the close message.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Message pushed to a viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerMessage {
    /// Base64-encoded JPEG frame.
    Frame(String),
    /// Final message before the connection is closed.
    Close { code: u16, reason: String },
}

/// Why a session finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ResolutionFailed,
    OpenFailed,
    StreamEnded,
    DecodeFailed,
    ViewerDisconnected,
    Shutdown,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionEnd::ResolutionFailed => "resolution failed",
            SessionEnd::OpenFailed => "open failed",
            SessionEnd::StreamEnded => "stream ended",
            SessionEnd::DecodeFailed => "decode failed",
            SessionEnd::ViewerDisconnected => "viewer disconnected",
            SessionEnd::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub id: u64,
    pub end: SessionEnd,
    pub frames_sent: u64,
    pub frames_dropped: u64,
}

/// Pacing and encoding parameters shared by all sessions.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub frame_interval: Duration,
    pub jpeg_quality: u8,
    /// Frames buffered per viewer. The queue rounds this up to the next
    /// power of two; zero is treated as one.
    pub queue_depth: usize,
}

impl From<&RelayConfig> for SessionSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            frame_interval: config.frame_interval(),
            jpeg_quality: config.jpeg_quality,
            queue_depth: config.queue_depth,
        }
    }
}

/// Starts isolated viewer sessions against one camera.
pub struct Relay {
    resolver: Arc<dyn EndpointResolver>,
    opener: Arc<dyn SourceOpener>,
    settings: SessionSettings,
    shutdown: watch::Receiver<bool>,
    next_id: AtomicU64,
    active: AtomicUsize,
}

impl Relay {
    pub fn new(
        resolver: Arc<dyn EndpointResolver>,
        opener: Arc<dyn SourceOpener>,
        settings: SessionSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let settings = SessionSettings {
            queue_depth: settings.queue_depth.max(1),
            ..settings
        };
        Self {
            resolver,
            opener,
            settings,
            shutdown,
            next_id: AtomicU64::new(1),
            active: AtomicUsize::new(0),
        }
    }

    /// Sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Stream frames to one viewer until the stream ends, the viewer goes
    /// away (`viewer_gone` completes or a send fails) or the service stops.
    pub async fn run_session<S, G>(&self, viewer: S, viewer_gone: G) -> SessionReport
    where
        S: Sink<ViewerMessage> + Unpin + Send,
        S::Error: fmt::Display,
        G: Future<Output = ()> + Send,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _active = ActiveGuard::enter(&self.active);

        let report = self
            .drive(id, viewer, viewer_gone)
            .instrument(info_span!("session", id))
            .await;

        info!(
            session = id,
            end = %report.end,
            frames_sent = report.frames_sent,
            frames_dropped = report.frames_dropped,
            "Session closed"
        );
        report
    }

    async fn drive<S, G>(&self, id: u64, mut viewer: S, viewer_gone: G) -> SessionReport
    where
        S: Sink<ViewerMessage> + Unpin + Send,
        S::Error: fmt::Display,
        G: Future<Output = ()> + Send,
    {
        let mut report = SessionReport {
            id,
            end: SessionEnd::StreamEnded,
            frames_sent: 0,
            frames_dropped: 0,
        };

        let endpoint = match self.resolver.resolve().await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!(error = %e, "Cannot resolve camera stream");
                close(&mut viewer, CLOSE_INTERNAL_ERROR, "camera stream unavailable").await;
                report.end = SessionEnd::ResolutionFailed;
                return report;
            }
        };

        let source = match self.opener.open(&endpoint).await {
            Ok(source) => source,
            Err(e) => {
                error!(uri = %endpoint, error = %e, "Cannot open camera stream");
                close(&mut viewer, CLOSE_INTERNAL_ERROR, "camera stream unavailable").await;
                report.end = SessionEnd::OpenFailed;
                return report;
            }
        };
        info!(uri = %endpoint, "Streaming to viewer");

        let (tx, mut rx) = broadcast::channel(self.settings.queue_depth);
        let mut producer = Producer(Some(tokio::spawn(
            produce(source, tx, self.settings).in_current_span(),
        )));

        let mut shutdown = self.shutdown.clone();
        let stopping = async move {
            let _ = shutdown.wait_for(|stopping| *stopping).await;
        };
        tokio::pin!(stopping);
        tokio::pin!(viewer_gone);

        report.end = loop {
            tokio::select! {
                _ = &mut stopping => {
                    close(&mut viewer, CLOSE_GOING_AWAY, "server shutting down").await;
                    break SessionEnd::Shutdown;
                }
                _ = &mut viewer_gone => break SessionEnd::ViewerDisconnected,
                frame = rx.recv() => match frame {
                    // A viewer that stops reading must not hold off shutdown.
                    Ok(frame) => tokio::select! {
                        sent = viewer.send(ViewerMessage::Frame(frame)) => {
                            if let Err(e) = sent {
                                debug!(error = %e, "Viewer send failed");
                                break SessionEnd::ViewerDisconnected;
                            }
                            report.frames_sent += 1;
                        }
                        _ = &mut stopping => {
                            close(&mut viewer, CLOSE_GOING_AWAY, "server shutting down").await;
                            break SessionEnd::Shutdown;
                        }
                        _ = &mut viewer_gone => break SessionEnd::ViewerDisconnected,
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        report.frames_dropped += skipped;
                        debug!(skipped, "Viewer behind, dropped oldest frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let end = match producer.finish().await {
                            Some(SourceEnd::Ended) => {
                                info!("Camera stream ended");
                                SessionEnd::StreamEnded
                            }
                            Some(SourceEnd::Failed(e)) => {
                                warn!(error = %e, "Camera stream failed");
                                SessionEnd::DecodeFailed
                            }
                            None => SessionEnd::DecodeFailed,
                        };
                        close(&mut viewer, CLOSE_NORMAL, "stream ended").await;
                        break end;
                    }
                },
            }
        };

        producer.stop().await;
        report
    }
}

/// How the producer stopped.
enum SourceEnd {
    Ended,
    Failed(StreamError),
}

/// Producer task handle; aborting it drops the frame source.
struct Producer(Option<JoinHandle<SourceEnd>>);

impl Producer {
    /// Wait for the producer to return on its own.
    async fn finish(&mut self) -> Option<SourceEnd> {
        self.0.take()?.await.ok()
    }

    /// Abort the producer and wait until its source is released.
    async fn stop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        if let Some(handle) = &self.0 {
            handle.abort();
        }
    }
}

async fn produce(
    mut source: Box<dyn FrameSource>,
    queue: broadcast::Sender<String>,
    settings: SessionSettings,
) -> SourceEnd {
    let mut ticker = tokio::time::interval(settings.frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let frame = match source.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return SourceEnd::Ended,
            Err(e) => return SourceEnd::Failed(e),
        };

        let encoded = match encode_frame_blocking(frame, settings.jpeg_quality).await {
            Ok(encoded) => encoded,
            Err(e) => return SourceEnd::Failed(e),
        };

        if queue.send(encoded).is_err() {
            return SourceEnd::Ended;
        }
    }
}

/// Send the close message and close the sink, giving up on a stalled viewer
/// after [`CLOSE_TIMEOUT`].
async fn close<S>(viewer: &mut S, code: u16, reason: &str)
where
    S: Sink<ViewerMessage> + Unpin,
{
    let closing = async {
        let _ = viewer
            .send(ViewerMessage::Close {
                code,
                reason: reason.to_string(),
            })
            .await;
        let _ = viewer.close().await;
    };
    if tokio::time::timeout(CLOSE_TIMEOUT, closing).await.is_err() {
        debug!(code, "Viewer did not accept the close message");
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

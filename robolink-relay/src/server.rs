//! WebSocket relay server.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::session::{Relay, ViewerMessage};

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Relay server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    relay: Arc<Relay>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    active_sessions: usize,
}

/// Create the HTTP router: the viewer WebSocket at `path` plus `/health`.
pub fn create_router(relay: Arc<Relay>, path: &str) -> Router {
    let state = AppState { relay };

    Router::new()
        .route(path, get(viewer_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the /health endpoint.
async fn health_handler(State(state): State<AppState>) -> Response {
    let body = HealthResponse {
        status: "ok",
        active_sessions: state.relay.active_sessions(),
    };
    (StatusCode::OK, axum::Json(body)).into_response()
}

async fn viewer_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    ws.on_upgrade(move |socket| serve_viewer(socket, state.relay, peer))
}

async fn serve_viewer(socket: WebSocket, relay: Arc<Relay>, peer: Option<SocketAddr>) {
    debug!(peer = ?peer, "Viewer connected");

    let (sender, mut receiver) = socket.split();
    let viewer = sender.with(|message: ViewerMessage| async move {
        Ok::<_, axum::Error>(to_ws_message(message))
    });
    let viewer = Box::pin(viewer);

    // Viewers never send anything meaningful; only watch for the close.
    let viewer_gone = async move {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    };

    let report = relay.run_session(viewer, viewer_gone).await;
    debug!(peer = ?peer, session = report.id, "Viewer connection finished");
}

fn to_ws_message(message: ViewerMessage) -> Message {
    match message {
        ViewerMessage::Frame(frame) => Message::Text(frame),
        ViewerMessage::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: Cow::Owned(reason),
        })),
    }
}

/// The relay's network listener.
pub struct RelayServer {
    relay: Arc<Relay>,
    listen_addr: SocketAddr,
    path: String,
}

impl RelayServer {
    pub fn new(relay: Arc<Relay>, listen_addr: SocketAddr, path: impl Into<String>) -> Self {
        Self {
            relay,
            listen_addr,
            path: path.into(),
        }
    }

    /// Run the server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), RelayError> {
        let router = create_router(self.relay, &self.path);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: self.listen_addr,
                source,
            })?;

        info!(
            addr = %self.listen_addr,
            path = %self.path,
            "Video relay listening"
        );

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopping| *stopping).await;
            info!("Video relay shutting down");
        })
        .await
        .map_err(RelayError::Serve)?;

        info!("Video relay stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_message_mapping() {
        let message = to_ws_message(ViewerMessage::Close {
            code: 1011,
            reason: "camera stream unavailable".to_string(),
        });
        match message {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 1011);
                assert_eq!(frame.reason, "camera stream unavailable");
            }
            other => panic!("unexpected message {:?}", other),
        }

        assert_eq!(
            to_ws_message(ViewerMessage::Frame("abc".to_string())),
            Message::Text("abc".to_string())
        );
    }
}

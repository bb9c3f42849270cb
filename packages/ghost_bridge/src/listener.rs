//! Transport Listener
//!
//! One loopback port serves two things: any plain HTTP request gets the
//! discovery handshake, and a WebSocket upgrade on the same port becomes a
//! duplex channel handed to the caller. At most one port is bound at a time.

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use ghost_session::{ChannelHandle, Handshake};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::BridgeError;

/// How long `stop` waits for open connections before aborting the server.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Origins browser extensions connect from.
const EXTENSION_ORIGINS: [&str; 3] = [
    "chrome-extension://",
    "moz-extension://",
    "safari-web-extension://",
];

/// Receives every accepted channel. The future runs for the channel's life.
pub type ChannelCallback = Arc<dyn Fn(WebSocket, ChannelHandle) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Running { port: u16 },
    Failed { port: u16, reason: String },
}

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::debug_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Clone)]
struct RouteState {
    port: u16,
    check_origin: bool,
    shutdown: CancellationToken,
    on_channel: ChannelCallback,
}

struct Running {
    port: u16,
    requested: u16,
    check_origin: bool,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
}

pub struct TransportListener {
    running: Mutex<Option<Running>>,
    state: watch::Sender<ListenerState>,
    check_origin: AtomicBool,
}

impl Default for TransportListener {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TransportListener {
    pub fn new(check_origin: bool) -> Self {
        let (state, _) = watch::channel(ListenerState::Stopped);
        Self {
            running: Mutex::new(None),
            state,
            check_origin: AtomicBool::new(check_origin),
        }
    }

    /// Takes effect on the next start; see [`origin_check_stale`](Self::origin_check_stale).
    pub fn set_check_origin(&self, check: bool) {
        self.check_origin.store(check, Ordering::Relaxed);
    }

    /// True while running with an origin policy that differs from the one
    /// last set.
    pub async fn origin_check_stale(&self) -> bool {
        let wanted = self.check_origin.load(Ordering::Relaxed);
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| r.check_origin != wanted)
    }

    /// Bind `127.0.0.1:port` and start serving. Port 0 picks a free port;
    /// the port actually bound is returned. Already listening on the same
    /// requested port is a no-op; a different port rebinds.
    pub async fn start(&self, port: u16, on_channel: ChannelCallback) -> Result<u16, BridgeError> {
        let mut slot = self.running.lock().await;
        if let Some(running) = slot.as_ref() {
            if running.requested == port {
                return Ok(running.port);
            }
        }
        self.stop_locked(&mut slot).await;
        self.start_locked(&mut slot, port, on_channel).await
    }

    /// Close the endpoint and every channel accepted through it.
    pub async fn stop(&self) {
        let mut slot = self.running.lock().await;
        self.stop_locked(&mut slot).await;
    }

    /// Stop, then start on `port`. The old port is free before the new bind.
    pub async fn restart(&self, port: u16, on_channel: ChannelCallback) -> Result<u16, BridgeError> {
        let mut slot = self.running.lock().await;
        self.stop_locked(&mut slot).await;
        self.start_locked(&mut slot, port, on_channel).await
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Port actually bound, if running.
    pub async fn port(&self) -> Option<u16> {
        self.running.lock().await.as_ref().map(|r| r.port)
    }

    /// Port that was asked for, if running. Differs from [`port`](Self::port)
    /// only when 0 was requested.
    pub async fn requested_port(&self) -> Option<u16> {
        self.running.lock().await.as_ref().map(|r| r.requested)
    }

    pub fn state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    async fn start_locked(
        &self,
        slot: &mut Option<Running>,
        port: u16,
        on_channel: ChannelCallback,
    ) -> Result<u16, BridgeError> {
        let listener = match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                let err = BridgeError::from_bind(port, e);
                self.state.send_replace(ListenerState::Failed {
                    port,
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };
        let actual = listener
            .local_addr()
            .map_err(|source| BridgeError::Bind { port, source })?
            .port();

        let check_origin = self.check_origin.load(Ordering::Relaxed);
        let shutdown = CancellationToken::new();
        let app = router(RouteState {
            port: actual,
            check_origin,
            shutdown: shutdown.clone(),
            on_channel,
        });

        let token = shutdown.clone();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(port = actual, "listener failed: {}", e);
            }
        });

        *slot = Some(Running {
            port: actual,
            requested: port,
            check_origin,
            shutdown,
            server,
        });
        self.state.send_replace(ListenerState::Running { port: actual });
        info!("GhostText listening on http://127.0.0.1:{}", actual);
        Ok(actual)
    }

    async fn stop_locked(&self, slot: &mut Option<Running>) {
        let Some(running) = slot.take() else {
            return;
        };
        running.shutdown.cancel();

        let mut server = running.server;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
            warn!(port = running.port, "listener did not drain in time; aborting");
            server.abort();
            let _ = server.await;
        }
        self.state.send_replace(ListenerState::Stopped);
        info!(port = running.port, "listener stopped");
    }
}

fn router(state: RouteState) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .with_state(state)
}

async fn handle_request(
    State(state): State<RouteState>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(upgrade) = upgrade else {
        return Json(Handshake::new(state.port)).into_response();
    };

    if state.check_origin && !origin_allowed(&headers) {
        debug!(origin = ?headers.get(header::ORIGIN), "refusing channel from foreign origin");
        return StatusCode::FORBIDDEN.into_response();
    }

    let channel = ChannelHandle::from_token(state.shutdown.child_token());
    let on_channel = state.on_channel.clone();
    upgrade.on_upgrade(move |socket| on_channel(socket, channel))
}

/// No Origin at all is a native client; anything else must be an extension.
fn origin_allowed(headers: &HeaderMap) -> bool {
    match headers.get(header::ORIGIN) {
        None => true,
        Some(origin) => origin
            .to_str()
            .map(|o| EXTENSION_ORIGINS.iter().any(|scheme| o.starts_with(scheme)))
            .unwrap_or(false),
    }
}

use axum::extract::ws::WebSocket;
use futures::FutureExt;
use ghost_session::{ChannelHandle, EditorSurface, EngineContext, SessionRegistry, SettingsProvider};
use std::sync::Arc;
use tracing::{info, warn};

use crate::channel::serve_channel;
use crate::error::BridgeError;
use crate::lifecycle::{self, DISCONNECT_COMMAND, START_SERVER_COMMAND, STOP_SERVER_COMMAND};
use crate::listener::{ChannelCallback, TransportListener};

/// The whole bridge for one process: one registry, one listener, and the
/// context every session engine is spawned with.
pub struct Bridge {
    ctx: EngineContext,
    listener: TransportListener,
}

impl Bridge {
    pub fn new(
        editor: Arc<dyn EditorSurface>,
        settings: Arc<dyn SettingsProvider>,
        check_origin: bool,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        Self {
            ctx: EngineContext::new(editor, registry, settings),
            listener: TransportListener::new(check_origin),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.ctx.registry
    }

    pub fn listener(&self) -> &TransportListener {
        &self.listener
    }

    pub fn settings(&self) -> &Arc<dyn SettingsProvider> {
        &self.ctx.settings
    }

    /// Start listening on the configured port.
    pub async fn start(&self) -> Result<u16, BridgeError> {
        let port = self.ctx.settings.server_port();
        match self.listener.start(port, self.on_channel()).await {
            Ok(port) => Ok(port),
            Err(e) => {
                if e.is_port_in_use() {
                    warn!(
                        "Port {} is in use. Is another GhostText server running? \
                         Change [server] port in config.toml and reload.",
                        port
                    );
                }
                Err(e)
            }
        }
    }

    /// Re-apply settings after a reload. Rebinds if the configured port
    /// differs from the one in use, if the origin policy changed, or if the
    /// listener is not running. Returns the newly bound port, if a rebind
    /// happened.
    pub async fn apply_settings(&self) -> Result<Option<u16>, BridgeError> {
        let wanted = self.ctx.settings.server_port();
        if self.listener.requested_port().await != Some(wanted) {
            info!(port = wanted, "server port changed; restarting listener");
        } else if self.listener.origin_check_stale().await {
            info!(port = wanted, "origin check changed; restarting listener");
        } else {
            return Ok(None);
        }
        let port = self.listener.restart(wanted, self.on_channel()).await?;
        Ok(Some(port))
    }

    /// Remove a session; its channel closes in response.
    pub fn disconnect(&self, id: &str) -> bool {
        lifecycle::disconnect(&self.ctx.registry, id)
    }

    /// Run one of the user-facing commands. Returns whether it did anything.
    pub async fn execute(&self, command: &str, argument: Option<&str>) -> Result<bool, BridgeError> {
        match command {
            START_SERVER_COMMAND => {
                let was_running = self.listener.is_running().await;
                self.start().await?;
                Ok(!was_running)
            }
            STOP_SERVER_COMMAND => {
                let was_running = self.listener.is_running().await;
                self.listener.stop().await;
                Ok(was_running)
            }
            DISCONNECT_COMMAND => Ok(argument.is_some_and(|id| self.disconnect(id))),
            other => {
                warn!(command = other, "unknown command");
                Ok(false)
            }
        }
    }

    /// Stop the listener (closing every channel) and drop every session.
    pub async fn shutdown(&self) {
        self.listener.stop().await;
        self.ctx.registry.clear();
        info!("bridge shut down");
    }

    fn on_channel(&self) -> ChannelCallback {
        let ctx = self.ctx.clone();
        Arc::new(move |socket: WebSocket, channel: ChannelHandle| {
            serve_channel(socket, channel, ctx.clone()).boxed()
        })
    }
}

//! Lifecycle consumers
//!
//! Things that react to sessions coming and going, and to the listener
//! starting or failing. None of them speak the protocol; they only watch the
//! registry and the listener state.

use ghost_session::{RegistryEvent, SessionRegistry};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::listener::ListenerState;

pub const START_SERVER_COMMAND: &str = "ghostText.startServer";
pub const STOP_SERVER_COMMAND: &str = "ghostText.stopServer";
pub const DISCONNECT_COMMAND: &str = "ghostText.disconnect";

/// Remove a session by id. Its engine closes the channel in response.
/// Returns false if no such session was connected.
pub fn disconnect(registry: &SessionRegistry, id: &str) -> bool {
    let removed = registry.remove(id);
    if removed {
        info!(session_id = %id, "disconnected by user");
    }
    removed
}

// =============================================================================
// Status indicator
// =============================================================================

/// What a status bar item would show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    pub text: String,
    /// Command the item triggers when clicked.
    pub command: &'static str,
    /// Rendered with a warning background.
    pub warning: bool,
}

impl StatusView {
    pub fn render(state: &ListenerState, sessions: usize) -> Self {
        match state {
            ListenerState::Running { port } => Self {
                text: match sessions {
                    0 => format!("👻 GhostText :{port}"),
                    n => format!("👻 GhostText :{port} ({n} connected)"),
                },
                command: STOP_SERVER_COMMAND,
                warning: false,
            },
            ListenerState::Stopped => Self {
                text: "👻 GhostText (off)".to_string(),
                command: START_SERVER_COMMAND,
                warning: true,
            },
            ListenerState::Failed { port, .. } => Self {
                text: format!("👻 GhostText (port {port} busy)"),
                command: START_SERVER_COMMAND,
                warning: true,
            },
        }
    }
}

/// Keep a status view current until `cancel` fires, logging each change.
pub async fn run_status_indicator(
    mut state: watch::Receiver<ListenerState>,
    registry: Arc<SessionRegistry>,
    cancel: CancellationToken,
) {
    let mut events = registry.subscribe();
    let mut shown = StatusView::render(&state.borrow_and_update(), registry.len());
    info!(status = %shown.text, "status");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }

        let next = StatusView::render(&state.borrow(), registry.len());
        if next != shown {
            if next.warning {
                warn!(status = %next.text, "status");
            } else {
                info!(status = %next.text, "status");
            }
            shown = next;
        }
    }
}

// =============================================================================
// Connected-buffer badges
// =============================================================================

/// Inline affordance shown at the top of a bridged buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Badge {
    pub title: &'static str,
    pub command: &'static str,
    pub argument: String,
}

/// The set of buffers that currently carry a "connected" badge.
pub struct ConnectedBadges {
    connected: Arc<Mutex<BTreeSet<String>>>,
    registry: Arc<SessionRegistry>,
    listeners: [ghost_session::ListenerId; 2],
}

impl ConnectedBadges {
    pub fn attach(registry: Arc<SessionRegistry>) -> Self {
        let connected: Arc<Mutex<BTreeSet<String>>> =
            Arc::new(Mutex::new(registry.ids().into_iter().collect()));

        let set = connected.clone();
        let added = registry.on_added(move |id| {
            set.lock().insert(id.to_string());
        });
        let set = connected.clone();
        let removed = registry.on_removed(move |id| {
            set.lock().remove(id);
        });

        Self {
            connected,
            registry,
            listeners: [added, removed],
        }
    }

    pub fn badge_for(&self, id: &str) -> Option<Badge> {
        self.connected.lock().contains(id).then(|| Badge {
            title: "👻 🌕 GhostText connected | Disconnect",
            command: DISCONNECT_COMMAND,
            argument: id.to_string(),
        })
    }

    pub fn connected(&self) -> Vec<String> {
        self.connected.lock().iter().cloned().collect()
    }

    /// Run a badge's command.
    pub fn activate(&self, badge: &Badge) -> bool {
        match badge.command {
            DISCONNECT_COMMAND => disconnect(&self.registry, &badge.argument),
            _ => false,
        }
    }
}

impl Drop for ConnectedBadges {
    fn drop(&mut self) {
        for listener in self.listeners {
            self.registry.remove_listener(listener);
        }
    }
}

/// Log every registry change until `cancel` fires.
pub async fn log_registry_events(registry: Arc<SessionRegistry>, cancel: CancellationToken) {
    let mut events = registry.subscribe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(RegistryEvent::Added(id)) => info!(session_id = %id, "field connected"),
                Ok(RegistryEvent::Removed(id)) => info!(session_id = %id, "field disconnected"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Registry broadcast lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghost_session::{BufferHandle, ChannelHandle, Session};

    fn put(registry: &SessionRegistry, id: &str) -> Session {
        let session = Session::new(BufferHandle::new(id), ChannelHandle::new());
        registry.put(id, session.clone());
        session
    }

    #[test]
    fn status_reflects_listener_and_sessions() {
        let view = StatusView::render(&ListenerState::Running { port: 4001 }, 0);
        assert_eq!(view.text, "👻 GhostText :4001");
        assert_eq!(view.command, STOP_SERVER_COMMAND);
        assert!(!view.warning);

        let view = StatusView::render(&ListenerState::Running { port: 4001 }, 2);
        assert_eq!(view.text, "👻 GhostText :4001 (2 connected)");

        let view = StatusView::render(&ListenerState::Stopped, 0);
        assert_eq!(view.command, START_SERVER_COMMAND);
        assert!(view.warning);

        let view = StatusView::render(
            &ListenerState::Failed {
                port: 4001,
                reason: "port 4001 is already in use".into(),
            },
            0,
        );
        assert_eq!(view.text, "👻 GhostText (port 4001 busy)");
        assert!(view.warning);
    }

    #[test]
    fn badges_track_registry() {
        let registry = Arc::new(SessionRegistry::new());
        put(&registry, "untitled:before.txt");
        let badges = ConnectedBadges::attach(registry.clone());

        put(&registry, "untitled:a.txt");
        assert!(badges.badge_for("untitled:before.txt").is_some());
        let badge = badges.badge_for("untitled:a.txt").unwrap();
        assert_eq!(badge.command, DISCONNECT_COMMAND);
        assert_eq!(badge.argument, "untitled:a.txt");

        registry.remove("untitled:a.txt");
        assert!(badges.badge_for("untitled:a.txt").is_none());
        assert_eq!(badges.connected(), vec!["untitled:before.txt".to_string()]);
    }

    #[test]
    fn badge_disconnects_session() {
        let registry = Arc::new(SessionRegistry::new());
        let badges = ConnectedBadges::attach(registry.clone());
        put(&registry, "untitled:a.txt");

        let badge = badges.badge_for("untitled:a.txt").unwrap();
        assert!(badges.activate(&badge));
        assert!(registry.is_empty());
        assert!(badges.badge_for("untitled:a.txt").is_none());
        // second click is harmless
        assert!(!badges.activate(&badge));
    }

    #[test]
    fn dropping_badges_unregisters() {
        let registry = Arc::new(SessionRegistry::new());
        let badges = ConnectedBadges::attach(registry.clone());
        let [added, removed] = badges.listeners;
        drop(badges);
        assert!(!registry.remove_listener(added));
        assert!(!registry.remove_listener(removed));
    }

    #[test]
    fn disconnect_unknown_is_noop() {
        let registry = SessionRegistry::new();
        assert!(!disconnect(&registry, "untitled:nope.txt"));
    }

    #[tokio::test]
    async fn status_indicator_stops_on_cancel() {
        let (tx, rx) = watch::channel(ListenerState::Stopped);
        let registry = Arc::new(SessionRegistry::new());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_status_indicator(rx, registry.clone(), cancel.clone()));

        tx.send_replace(ListenerState::Running { port: 4001 });
        put(&registry, "untitled:a.txt");
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}

//! Session Registry
//!
//! The single source of truth for which buffers are bridged right now.
//! Listeners run synchronously right after a mutation, once the map already
//! reflects it, in registration order. Task-based consumers can use
//! [`SessionRegistry::subscribe`] instead.
//!
//! The registry never closes channels or touches buffers; sessions react to
//! their own removal.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

use crate::session::{Session, SessionId};

/// Broadcast form of registry mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added(SessionId),
    Removed(SessionId),
}

/// Token for unregistering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&str) + Send + Sync>;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Session>>,
    added: Mutex<Vec<(ListenerId, Listener)>>,
    removed: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            sessions: RwLock::new(HashMap::new()),
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            events,
        }
    }

    /// Insert or overwrite, then notify "added".
    pub fn put(&self, id: impl Into<SessionId>, session: Session) {
        let id = id.into();
        self.sessions.write().insert(id.clone(), session);
        debug!(session_id = %id, "session registered");
        Self::notify(&self.added, &id);
        let _ = self.events.send(RegistryEvent::Added(id));
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Remove `id`. Notifies "removed" only if something was there.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id).is_some();
        if removed {
            debug!(session_id = %id, "session unregistered");
            Self::notify(&self.removed, id);
            let _ = self.events.send(RegistryEvent::Removed(id.to_string()));
        }
        removed
    }

    /// Remove every session, notifying "removed" for each.
    pub fn clear(&self) {
        let drained: Vec<SessionId> = self.sessions.write().drain().map(|(id, _)| id).collect();
        for id in drained {
            Self::notify(&self.removed, &id);
            let _ = self.events.send(RegistryEvent::Removed(id));
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn on_added(&self, handler: impl Fn(&str) + Send + Sync + 'static) -> ListenerId {
        self.register(&self.added, Arc::new(handler))
    }

    pub fn on_removed(&self, handler: impl Fn(&str) + Send + Sync + 'static) -> ListenerId {
        self.register(&self.removed, Arc::new(handler))
    }

    /// Returns false if the listener was already gone.
    pub fn remove_listener(&self, listener: ListenerId) -> bool {
        let mut found = false;
        for list in [&self.added, &self.removed] {
            let mut list = list.lock();
            let before = list.len();
            list.retain(|(id, _)| *id != listener);
            found |= list.len() != before;
        }
        found
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn register(&self, list: &Mutex<Vec<(ListenerId, Listener)>>, handler: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        list.lock().push((id, handler));
        id
    }

    fn notify(list: &Mutex<Vec<(ListenerId, Listener)>>, id: &str) {
        // Snapshot so listeners may (un)register or query the registry.
        let listeners: Vec<Listener> = list.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(id);
        }
    }
}

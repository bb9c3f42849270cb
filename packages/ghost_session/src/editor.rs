//! The editor surface capability
//!
//! The engine never renders text or owns documents. It asks an
//! [`EditorSurface`] to create buffers, replace their content, move
//! selections and tell it about local changes.
//!
//! Notification contract: change notifications caused by
//! [`EditorSurface::replace_all`] are delivered to subscribers before the
//! returned future resolves. Echo suppression depends on this.

use async_trait::async_trait;
use std::fmt;

use crate::error::EditorError;
use crate::protocol::Selection;

/// Non-owning reference to an editor buffer, identified by its URI.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(String);

impl BufferHandle {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn uri(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A content-change notification. An empty change set carries no edits
/// (e.g. a dirty-state flip) and never needs to be relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentChange {
    pub changes: usize,
}

impl ContentChange {
    pub fn is_empty(&self) -> bool {
        self.changes == 0
    }
}

pub type ChangeHandler = Box<dyn Fn(&ContentChange) + Send + Sync>;
pub type SelectionHandler = Box<dyn Fn(&[Selection]) + Send + Sync>;
pub type ClosedHandler = Box<dyn Fn(&BufferHandle) + Send + Sync>;

/// Disposer returned by every subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(dispose: impl FnOnce() + Send + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    pub fn dispose(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}

#[async_trait]
pub trait EditorSurface: Send + Sync {
    /// Open a new, empty buffer. `extension` has no leading dot.
    async fn create_buffer(&self, title: &str, extension: &str)
    -> Result<BufferHandle, EditorError>;

    /// Replace the whole content of `buffer`. Fails with
    /// [`EditorError::BufferClosed`] once the buffer is gone.
    async fn replace_all(&self, buffer: &BufferHandle, text: &str) -> Result<(), EditorError>;

    /// Set cursors/selections from UTF-16 offsets into the current text.
    async fn set_selections(
        &self,
        buffer: &BufferHandle,
        selections: &[Selection],
    ) -> Result<(), EditorError>;

    async fn read_text(&self, buffer: &BufferHandle) -> Result<String, EditorError>;

    async fn read_selections(&self, buffer: &BufferHandle) -> Result<Vec<Selection>, EditorError>;

    fn on_local_change(&self, buffer: &BufferHandle, handler: ChangeHandler) -> Subscription;

    fn on_local_selection_change(
        &self,
        buffer: &BufferHandle,
        handler: SelectionHandler,
    ) -> Subscription;

    /// Fires for every buffer that gets closed, not just one.
    fn on_closed(&self, handler: ClosedHandler) -> Subscription;

    /// Bring the editor to the front. Fire and forget.
    fn focus(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscription_disposes_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sub.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_disposes_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let c = count.clone();
            let _sub = Subscription::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_change_set() {
        assert!(ContentChange::default().is_empty());
        assert!(!ContentChange { changes: 1 }.is_empty());
    }
}

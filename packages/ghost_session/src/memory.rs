//! In-process editor surface
//!
//! Keeps buffers in memory and stores selections as line/column positions
//! resolved against the text they were set on, the way a real editor does.
//! Besides the [`EditorSurface`] API it can simulate what a person at the
//! keyboard would do: type, move the cursor and close a tab.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

use crate::editor::{
    BufferHandle, ChangeHandler, ClosedHandler, ContentChange, EditorSurface, SelectionHandler,
    Subscription,
};
use crate::error::EditorError;
use crate::position::{Position, offset_at, position_at};
use crate::protocol::Selection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StoredSelection {
    anchor: Position,
    active: Position,
}

#[derive(Debug)]
struct MemoryBuffer {
    text: String,
    selections: Vec<StoredSelection>,
}

impl MemoryBuffer {
    fn offsets(&self) -> Vec<Selection> {
        self.selections
            .iter()
            .map(|s| Selection::new(offset_at(&self.text, s.anchor), offset_at(&self.text, s.active)))
            .collect()
    }

    fn store(&mut self, selections: &[Selection]) {
        self.selections = selections
            .iter()
            .map(|s| StoredSelection {
                anchor: position_at(&self.text, s.start),
                active: position_at(&self.text, s.end),
            })
            .collect();
    }
}

type Scoped<H> = (u64, BufferHandle, Arc<H>);

#[derive(Default)]
struct Inner {
    buffers: Mutex<BTreeMap<BufferHandle, MemoryBuffer>>,
    change_handlers: Mutex<Vec<Scoped<dyn Fn(&ContentChange) + Send + Sync>>>,
    selection_handlers: Mutex<Vec<Scoped<dyn Fn(&[Selection]) + Send + Sync>>>,
    closed_handlers: Mutex<Vec<(u64, Arc<dyn Fn(&BufferHandle) + Send + Sync>)>>,
    next_handler: AtomicU64,
    created: AtomicUsize,
    focus_requests: AtomicUsize,
    refuse_creation: AtomicBool,
    creation_delay: Mutex<Option<Duration>>,
}

impl Inner {
    fn fire_change(&self, buffer: &BufferHandle, change: ContentChange) {
        let handlers: Vec<_> = self
            .change_handlers
            .lock()
            .iter()
            .filter(|(_, b, _)| b == buffer)
            .map(|(_, _, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(&change);
        }
    }

    fn fire_selection(&self, buffer: &BufferHandle, selections: &[Selection]) {
        let handlers: Vec<_> = self
            .selection_handlers
            .lock()
            .iter()
            .filter(|(_, b, _)| b == buffer)
            .map(|(_, _, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(selections);
        }
    }

    fn fire_closed(&self, buffer: &BufferHandle) {
        let handlers: Vec<_> = self.closed_handlers.lock().iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(buffer);
        }
    }
}

/// Editor surface backed by plain strings. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryEditor {
    inner: Arc<Inner>,
}

impl MemoryEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffers ever created.
    pub fn creation_count(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    /// Number of times the engine asked for the window to be raised.
    pub fn focus_count(&self) -> usize {
        self.inner.focus_requests.load(Ordering::SeqCst)
    }

    /// Currently open buffers, ordered by URI.
    pub fn open_buffers(&self) -> Vec<BufferHandle> {
        self.inner.buffers.lock().keys().cloned().collect()
    }

    pub fn is_open(&self, buffer: &BufferHandle) -> bool {
        self.inner.buffers.lock().contains_key(buffer)
    }

    /// Current text and selections of `buffer`, without going through the
    /// async surface.
    pub fn snapshot(&self, buffer: &BufferHandle) -> Option<(String, Vec<Selection>)> {
        self.inner
            .buffers
            .lock()
            .get(buffer)
            .map(|b| (b.text.clone(), b.offsets()))
    }

    /// Make every later `create_buffer` fail.
    pub fn set_refuse_creation(&self, refuse: bool) {
        self.inner.refuse_creation.store(refuse, Ordering::SeqCst);
    }

    /// Make `create_buffer` take at least `delay`.
    pub fn set_creation_delay(&self, delay: Option<Duration>) {
        *self.inner.creation_delay.lock() = delay;
    }

    /// Simulate the user rewriting the buffer and leaving the cursor at the
    /// end. Fires a content-change notification only.
    pub fn user_edit(&self, buffer: &BufferHandle, text: &str) -> Result<(), EditorError> {
        {
            let mut buffers = self.inner.buffers.lock();
            let buf = buffers
                .get_mut(buffer)
                .ok_or_else(|| EditorError::BufferClosed(buffer.to_string()))?;
            buf.text = text.to_string();
            let end = crate::position::utf16_len(text);
            buf.store(&[Selection::caret(end)]);
        }
        self.inner.fire_change(buffer, ContentChange { changes: 1 });
        Ok(())
    }

    /// Simulate the user moving the cursor or selecting text.
    pub fn user_select(&self, buffer: &BufferHandle, selections: &[Selection]) -> Result<(), EditorError> {
        let resolved = {
            let mut buffers = self.inner.buffers.lock();
            let buf = buffers
                .get_mut(buffer)
                .ok_or_else(|| EditorError::BufferClosed(buffer.to_string()))?;
            buf.store(selections);
            buf.offsets()
        };
        self.inner.fire_selection(buffer, &resolved);
        Ok(())
    }

    /// Simulate a notification that carries no edits.
    pub fn touch(&self, buffer: &BufferHandle) {
        self.inner.fire_change(buffer, ContentChange::default());
    }

    /// Simulate the user closing the tab. Returns false if it was not open.
    pub fn close_buffer(&self, buffer: &BufferHandle) -> bool {
        let removed = self.inner.buffers.lock().remove(buffer).is_some();
        if removed {
            debug!(buffer = %buffer, "buffer closed");
            self.inner.fire_closed(buffer);
        }
        removed
    }

    fn subscribe_scoped<H: ?Sized>(
        &self,
        list: impl Fn(&Inner) -> &Mutex<Vec<Scoped<H>>> + Send + 'static,
        buffer: &BufferHandle,
        handler: Arc<H>,
    ) -> Subscription {
        let id = self.inner.next_handler.fetch_add(1, Ordering::Relaxed);
        list(&self.inner).lock().push((id, buffer.clone(), handler));
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                list(&inner).lock().retain(|(hid, _, _)| *hid != id);
            }
        })
    }
}

#[async_trait]
impl EditorSurface for MemoryEditor {
    async fn create_buffer(&self, title: &str, extension: &str) -> Result<BufferHandle, EditorError> {
        let delay = *self.inner.creation_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.inner.refuse_creation.load(Ordering::SeqCst) {
            return Err(EditorError::CreateRefused(title.to_string()));
        }

        let handle = BufferHandle::new(format!("untitled:{title}.{extension}"));
        let mut buffers = self.inner.buffers.lock();
        if buffers.contains_key(&handle) {
            return Err(EditorError::Other(format!("{handle} is already open")));
        }
        buffers.insert(
            handle.clone(),
            MemoryBuffer {
                text: String::new(),
                selections: Vec::new(),
            },
        );
        self.inner.created.fetch_add(1, Ordering::SeqCst);
        debug!(buffer = %handle, "buffer created");
        Ok(handle)
    }

    async fn replace_all(&self, buffer: &BufferHandle, text: &str) -> Result<(), EditorError> {
        let changed = {
            let mut buffers = self.inner.buffers.lock();
            let buf = buffers
                .get_mut(buffer)
                .ok_or_else(|| EditorError::BufferClosed(buffer.to_string()))?;
            if buf.text == text {
                false
            } else {
                let before = buf.offsets();
                buf.text = text.to_string();
                // re-resolve so cursors past the new end are clamped
                buf.store(&before);
                true
            }
        };
        if changed {
            self.inner.fire_change(buffer, ContentChange { changes: 1 });
        }
        Ok(())
    }

    async fn set_selections(
        &self,
        buffer: &BufferHandle,
        selections: &[Selection],
    ) -> Result<(), EditorError> {
        let mut buffers = self.inner.buffers.lock();
        let buf = buffers
            .get_mut(buffer)
            .ok_or_else(|| EditorError::BufferClosed(buffer.to_string()))?;
        buf.store(selections);
        Ok(())
    }

    async fn read_text(&self, buffer: &BufferHandle) -> Result<String, EditorError> {
        self.inner
            .buffers
            .lock()
            .get(buffer)
            .map(|b| b.text.clone())
            .ok_or_else(|| EditorError::BufferClosed(buffer.to_string()))
    }

    async fn read_selections(&self, buffer: &BufferHandle) -> Result<Vec<Selection>, EditorError> {
        self.inner
            .buffers
            .lock()
            .get(buffer)
            .map(MemoryBuffer::offsets)
            .ok_or_else(|| EditorError::BufferClosed(buffer.to_string()))
    }

    fn on_local_change(&self, buffer: &BufferHandle, handler: ChangeHandler) -> Subscription {
        self.subscribe_scoped(|inner| &inner.change_handlers, buffer, Arc::from(handler))
    }

    fn on_local_selection_change(
        &self,
        buffer: &BufferHandle,
        handler: SelectionHandler,
    ) -> Subscription {
        self.subscribe_scoped(|inner| &inner.selection_handlers, buffer, Arc::from(handler))
    }

    fn on_closed(&self, handler: ClosedHandler) -> Subscription {
        let id = self.inner.next_handler.fetch_add(1, Ordering::Relaxed);
        self.inner.closed_handlers.lock().push((id, Arc::from(handler)));
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.closed_handlers.lock().retain(|(hid, _)| *hid != id);
            }
        })
    }

    fn focus(&self) {
        self.inner.focus_requests.fetch_add(1, Ordering::SeqCst);
    }
}

//! Editor surface for the standalone binary.
//!
//! Buffers live in memory (see [`MemoryEditor`]); this wrapper adds logging
//! and raises a configured desktop application when a field connects.

use async_trait::async_trait;
use ghost_session::editor::{ChangeHandler, ClosedHandler, SelectionHandler};
use ghost_session::{BufferHandle, EditorError, EditorSurface, MemoryEditor, Selection, Subscription};
use std::sync::Arc;
use tracing::debug;

use crate::focus;

type FocusTarget = Arc<dyn Fn() -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct HeadlessEditor {
    buffers: MemoryEditor,
    focus_target: FocusTarget,
}

impl HeadlessEditor {
    /// `focus_target` is asked for the application to raise each time.
    pub fn new(
        buffers: MemoryEditor,
        focus_target: impl Fn() -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            buffers,
            focus_target: Arc::new(focus_target),
        }
    }

    /// The underlying buffers, for inspection and simulated edits.
    pub fn buffers(&self) -> &MemoryEditor {
        &self.buffers
    }
}

#[async_trait]
impl EditorSurface for HeadlessEditor {
    async fn create_buffer(&self, title: &str, extension: &str) -> Result<BufferHandle, EditorError> {
        let handle = self.buffers.create_buffer(title, extension).await?;
        debug!(buffer = %handle, "opened buffer");
        Ok(handle)
    }

    async fn replace_all(&self, buffer: &BufferHandle, text: &str) -> Result<(), EditorError> {
        debug!(buffer = %buffer, len = text.len(), "replacing content");
        self.buffers.replace_all(buffer, text).await
    }

    async fn set_selections(
        &self,
        buffer: &BufferHandle,
        selections: &[Selection],
    ) -> Result<(), EditorError> {
        self.buffers.set_selections(buffer, selections).await
    }

    async fn read_text(&self, buffer: &BufferHandle) -> Result<String, EditorError> {
        self.buffers.read_text(buffer).await
    }

    async fn read_selections(&self, buffer: &BufferHandle) -> Result<Vec<Selection>, EditorError> {
        self.buffers.read_selections(buffer).await
    }

    fn on_local_change(&self, buffer: &BufferHandle, handler: ChangeHandler) -> Subscription {
        self.buffers.on_local_change(buffer, handler)
    }

    fn on_local_selection_change(
        &self,
        buffer: &BufferHandle,
        handler: SelectionHandler,
    ) -> Subscription {
        self.buffers.on_local_selection_change(buffer, handler)
    }

    fn on_closed(&self, handler: ClosedHandler) -> Subscription {
        self.buffers.on_closed(handler)
    }

    fn focus(&self) {
        self.buffers.focus();
        if let Some(app) = (self.focus_target)() {
            focus::bring_to_front(&app);
        }
    }
}

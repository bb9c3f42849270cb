//! Session Protocol Engine
//!
//! One engine per duplex channel, running as its own task:
//!
//! ```text
//! AwaitingFirstMessage ──first frame──► Bound ──channel or buffer closed──► Closed
//! ```
//!
//! Every input for a session (inbound frames, editor notifications) goes
//! through one queue and is handled to completion before the next one, so
//! frames are applied in field order and a second frame that arrives while the
//! buffer is still being created simply waits for it.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::editor::{BufferHandle, ContentChange, EditorSurface, Subscription};
use crate::error::SessionError;
use crate::naming::BufferNamer;
use crate::protocol::{InboundMessage, OutboundMessage, Selection};
use crate::registry::{ListenerId, SessionRegistry};
use crate::session::{ChannelHandle, Session};
use crate::settings::SettingsProvider;

/// Outbound messages buffered per channel before the engine waits on the
/// transport.
const OUTBOUND_CAPACITY: usize = 100;

/// Everything an engine needs from the rest of the process.
#[derive(Clone)]
pub struct EngineContext {
    pub editor: Arc<dyn EditorSurface>,
    pub registry: Arc<SessionRegistry>,
    pub settings: Arc<dyn SettingsProvider>,
    pub namer: Arc<BufferNamer>,
}

impl EngineContext {
    pub fn new(
        editor: Arc<dyn EditorSurface>,
        registry: Arc<SessionRegistry>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            editor,
            registry,
            settings,
            namer: Arc::new(BufferNamer::new()),
        }
    }
}

#[derive(Debug)]
enum SessionEvent {
    Frame(String),
    LocalChange,
    LocalSelectionChange,
}

/// Transport-facing side of a running engine.
pub struct EngineHandle {
    pub frames: FrameSender,
    pub outbound: mpsc::Receiver<OutboundMessage>,
    pub task: JoinHandle<()>,
}

/// Feeds raw inbound text frames to an engine.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl FrameSender {
    /// Returns false once the engine has stopped.
    pub fn deliver(&self, frame: impl Into<String>) -> bool {
        self.tx.send(SessionEvent::Frame(frame.into())).is_ok()
    }
}

/// What the engine holds once its buffer exists.
struct Bound {
    session: Session,
    removal_listener: ListenerId,
    _subscriptions: Vec<Subscription>,
}

enum EngineState {
    AwaitingFirstMessage,
    Bound(Bound),
    Closed,
}

impl EngineState {
    fn name(&self) -> &'static str {
        match self {
            Self::AwaitingFirstMessage => "awaiting_first_message",
            Self::Bound(_) => "bound",
            Self::Closed => "closed",
        }
    }
}

pub struct SessionEngine {
    ctx: EngineContext,
    channel: ChannelHandle,
    state: EngineState,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    outbound: mpsc::Sender<OutboundMessage>,
}

impl SessionEngine {
    /// Start an engine for a freshly accepted channel.
    pub fn spawn(ctx: EngineContext, channel: ChannelHandle) -> EngineHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let engine = Self {
            ctx,
            channel,
            state: EngineState::AwaitingFirstMessage,
            events_tx: events_tx.clone(),
            events_rx,
            outbound: outbound_tx,
        };

        EngineHandle {
            frames: FrameSender { tx: events_tx },
            outbound: outbound_rx,
            task: tokio::spawn(engine.run()),
        }
    }

    async fn run(mut self) {
        debug!("session engine started");
        loop {
            let event = tokio::select! {
                biased;
                _ = self.channel.closed() => break,
                event = self.events_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if let Err(e) = self.handle(event).await {
                if e.is_buffer_loss() {
                    info!(state = self.state.name(), "buffer went away; closing channel");
                } else {
                    warn!(state = self.state.name(), "closing channel: {}", e);
                }
                self.channel.close();
                break;
            }
            if matches!(self.state, EngineState::Closed) {
                break;
            }
        }
        self.teardown();
    }

    async fn handle(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        match event {
            SessionEvent::Frame(raw) => {
                let message = InboundMessage::parse(&raw)?;
                if matches!(self.state, EngineState::AwaitingFirstMessage) {
                    self.bind(&message.title).await?;
                }
                self.apply_inbound(message).await
            }
            SessionEvent::LocalChange | SessionEvent::LocalSelectionChange => {
                self.send_snapshot().await
            }
        }
    }

    /// Create the buffer and register the session.
    async fn bind(&mut self, title: &str) -> Result<(), SessionError> {
        let title = self.ctx.namer.next_title(title);
        let extension = self.ctx.settings.file_extension();
        let buffer = self
            .ctx
            .editor
            .create_buffer(&title, &extension)
            .await
            .map_err(SessionError::BufferCreation)?;

        if self.channel.is_closed() {
            // The surface has no close capability, so the buffer stays open as
            // an ordinary untracked document.
            debug!(buffer = %buffer, "channel closed while the buffer was created; leaving it unbound");
            self.state = EngineState::Closed;
            return Ok(());
        }

        self.ctx.editor.focus();

        let session = Session::new(buffer.clone(), self.channel.clone());
        let subscriptions = self.subscribe(&session);

        let own_id = session.id().to_string();
        let channel = self.channel.clone();
        let removal_listener = self.ctx.registry.on_removed(move |id| {
            if id == own_id {
                channel.close();
            }
        });

        self.ctx.registry.put(session.id(), session.clone());
        info!(session_id = %session.id(), "session bound");

        self.state = EngineState::Bound(Bound {
            session,
            removal_listener,
            _subscriptions: subscriptions,
        });
        Ok(())
    }

    fn subscribe(&self, session: &Session) -> Vec<Subscription> {
        let editor = &self.ctx.editor;
        let buffer = session.buffer();

        // Checked inside the callback: the notification for our own replace
        // arrives while the flag is still set.
        let echo = session.echo_flag();
        let tx = self.events_tx.clone();
        let on_change = editor.on_local_change(
            buffer,
            Box::new(move |change: &ContentChange| {
                if echo.load(Ordering::Acquire) || change.is_empty() {
                    return;
                }
                let _ = tx.send(SessionEvent::LocalChange);
            }),
        );

        let tx = self.events_tx.clone();
        let on_selection = editor.on_local_selection_change(
            buffer,
            Box::new(move |_: &[Selection]| {
                let _ = tx.send(SessionEvent::LocalSelectionChange);
            }),
        );

        let bound_buffer = buffer.clone();
        let channel = self.channel.clone();
        let on_closed = editor.on_closed(Box::new(move |closed: &BufferHandle| {
            if *closed == bound_buffer && channel.close() {
                debug!(buffer = %closed, "bound buffer closed");
            }
        }));

        vec![on_change, on_selection, on_closed]
    }

    /// Remote is authoritative: replace everything, then move the cursors.
    async fn apply_inbound(&mut self, message: InboundMessage) -> Result<(), SessionError> {
        let EngineState::Bound(bound) = &self.state else {
            return Ok(());
        };
        let session = bound.session.clone();

        let _guard = session.suppress_echo();
        self.ctx
            .editor
            .replace_all(session.buffer(), &message.text)
            .await?;
        self.ctx
            .editor
            .set_selections(session.buffer(), &message.selections)
            .await?;
        debug!(
            session_id = %session.id(),
            len = message.text.len(),
            "applied inbound frame"
        );
        Ok(())
    }

    async fn send_snapshot(&mut self) -> Result<(), SessionError> {
        let EngineState::Bound(bound) = &self.state else {
            return Ok(());
        };
        let buffer = bound.session.buffer().clone();

        let text = self.ctx.editor.read_text(&buffer).await?;
        let selections = self.ctx.editor.read_selections(&buffer).await?;

        if self
            .outbound
            .send(OutboundMessage { text, selections })
            .await
            .is_err()
        {
            debug!("transport dropped; closing channel");
            self.channel.close();
        }
        Ok(())
    }

    fn teardown(&mut self) {
        self.channel.close();
        if let EngineState::Bound(bound) =
            std::mem::replace(&mut self.state, EngineState::Closed)
        {
            if self.ctx.registry.remove(bound.session.id()) {
                info!(session_id = %bound.session.id(), "session closed");
            }
            self.ctx.registry.remove_listener(bound.removal_listener);
        }
        debug!("session engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEditor;
    use crate::registry::RegistryEvent;
    use crate::settings::StaticSettings;
    use std::time::Duration;

    struct Harness {
        editor: MemoryEditor,
        registry: Arc<SessionRegistry>,
        ctx: EngineContext,
    }

    fn harness() -> Harness {
        let editor = MemoryEditor::new();
        let registry = Arc::new(SessionRegistry::new());
        let ctx = EngineContext::new(
            Arc::new(editor.clone()),
            registry.clone(),
            Arc::new(StaticSettings {
                server_port: 4001,
                file_extension: "md".into(),
            }),
        );
        Harness {
            editor,
            registry,
            ctx,
        }
    }

    fn frame(text: &str, selections: &[(usize, usize)]) -> String {
        let selections: Vec<_> = selections.iter().map(|&(s, e)| Selection::new(s, e)).collect();
        serde_json::json!({ "text": text, "title": "Comment", "selections": selections }).to_string()
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    async fn bound_buffer(h: &Harness) -> BufferHandle {
        eventually(|| h.registry.len() == 1).await;
        let id = h.registry.ids().remove(0);
        h.registry.get(&id).unwrap().buffer().clone()
    }

    #[tokio::test]
    async fn round_trip() {
        let h = harness();
        let channel = ChannelHandle::new();
        let handle = SessionEngine::spawn(h.ctx.clone(), channel.clone());

        assert!(handle.frames.deliver(frame("hello", &[(0, 5)])));
        let buffer = bound_buffer(&h).await;
        assert!(buffer.uri().ends_with("/Comment.md"), "{buffer}");

        let editor = h.editor.clone();
        eventually(|| {
            editor.snapshot(&buffer) == Some(("hello".into(), vec![Selection::new(0, 5)]))
        })
        .await;
        assert_eq!(h.editor.focus_count(), 1);
        channel.close();
    }

    #[tokio::test]
    async fn at_most_one_buffer_per_channel() {
        let h = harness();
        h.editor.set_creation_delay(Some(Duration::from_millis(50)));
        let mut events = h.registry.subscribe();
        let handle = SessionEngine::spawn(h.ctx.clone(), ChannelHandle::new());

        assert!(handle.frames.deliver(frame("one", &[])));
        assert!(handle.frames.deliver(frame("two", &[])));

        let buffer = bound_buffer(&h).await;
        let editor = h.editor.clone();
        eventually(|| editor.snapshot(&buffer).is_some_and(|(t, _)| t == "two")).await;

        assert_eq!(h.editor.creation_count(), 1);
        assert_eq!(h.registry.len(), 1);
        assert!(matches!(events.recv().await.unwrap(), RegistryEvent::Added(_)));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn inbound_replace_is_not_echoed() {
        let h = harness();
        let mut handle = SessionEngine::spawn(h.ctx.clone(), ChannelHandle::new());

        handle.frames.deliver(frame("first", &[]));
        let buffer = bound_buffer(&h).await;
        handle.frames.deliver(frame("second", &[(6, 6)]));

        let editor = h.editor.clone();
        eventually(|| editor.snapshot(&buffer).is_some_and(|(t, _)| t == "second")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn local_edit_is_sent_once() {
        let h = harness();
        let mut handle = SessionEngine::spawn(h.ctx.clone(), ChannelHandle::new());

        handle.frames.deliver(frame("draft", &[]));
        let buffer = bound_buffer(&h).await;
        let editor = h.editor.clone();
        eventually(|| editor.snapshot(&buffer).is_some_and(|(t, _)| t == "draft")).await;

        h.editor.user_edit(&buffer, "draft!").unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), handle.outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.text, "draft!");
        assert_eq!(msg.selections, vec![Selection::caret(6)]);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_change_sets_are_ignored() {
        let h = harness();
        let mut handle = SessionEngine::spawn(h.ctx.clone(), ChannelHandle::new());

        handle.frames.deliver(frame("x", &[]));
        let buffer = bound_buffer(&h).await;
        h.editor.touch(&buffer);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn selection_change_is_sent() {
        let h = harness();
        let mut handle = SessionEngine::spawn(h.ctx.clone(), ChannelHandle::new());

        handle.frames.deliver(frame("hello world", &[]));
        let buffer = bound_buffer(&h).await;
        let editor = h.editor.clone();
        eventually(|| editor.snapshot(&buffer).is_some_and(|(t, _)| t == "hello world")).await;

        h.editor.user_select(&buffer, &[Selection::new(0, 5)]).unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), handle.outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.text, "hello world");
        assert_eq!(msg.selections, vec![Selection::new(0, 5)]);
    }

    #[tokio::test]
    async fn malformed_first_frame_closes_without_session() {
        let h = harness();
        let channel = ChannelHandle::new();
        let handle = SessionEngine::spawn(h.ctx.clone(), channel.clone());

        handle.frames.deliver("{not json");
        handle.task.await.unwrap();

        assert!(channel.is_closed());
        assert_eq!(h.editor.creation_count(), 0);
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn malformed_frame_mid_session_tears_down() {
        let h = harness();
        let channel = ChannelHandle::new();
        let handle = SessionEngine::spawn(h.ctx.clone(), channel.clone());

        handle.frames.deliver(frame("ok", &[]));
        let buffer = bound_buffer(&h).await;
        handle.frames.deliver(r#"{"text":"missing the rest"}"#);
        handle.task.await.unwrap();

        assert!(channel.is_closed());
        assert!(h.registry.is_empty());
        assert_eq!(h.editor.snapshot(&buffer).map(|(t, _)| t), Some("ok".into()));
    }

    #[tokio::test]
    async fn creation_failure_closes_channel() {
        let h = harness();
        h.editor.set_refuse_creation(true);
        let channel = ChannelHandle::new();
        let handle = SessionEngine::spawn(h.ctx.clone(), channel.clone());

        handle.frames.deliver(frame("hi", &[]));
        handle.task.await.unwrap();

        assert!(channel.is_closed());
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn channel_closed_during_creation_never_registers() {
        let h = harness();
        h.editor.set_creation_delay(Some(Duration::from_millis(50)));
        let channel = ChannelHandle::new();
        let mut events = h.registry.subscribe();
        let handle = SessionEngine::spawn(h.ctx.clone(), channel.clone());

        handle.frames.deliver(frame("hi", &[]));
        tokio::time::sleep(Duration::from_millis(10)).await;
        channel.close();
        handle.task.await.unwrap();

        assert!(h.registry.is_empty());
        assert!(events.try_recv().is_err());
        // the late buffer is left to the user, untracked
        assert_eq!(h.editor.creation_count(), 1);
        assert_eq!(h.editor.open_buffers().len(), 1);
    }

    #[tokio::test]
    async fn channel_close_removes_session() {
        let h = harness();
        let channel = ChannelHandle::new();
        let handle = SessionEngine::spawn(h.ctx.clone(), channel.clone());

        handle.frames.deliver(frame("hi", &[]));
        bound_buffer(&h).await;
        channel.close();
        handle.task.await.unwrap();

        assert!(h.registry.is_empty());
        // closing again is a no-op
        assert!(!channel.close());
    }

    #[tokio::test]
    async fn buffer_close_closes_channel() {
        let h = harness();
        let channel = ChannelHandle::new();
        let handle = SessionEngine::spawn(h.ctx.clone(), channel.clone());

        handle.frames.deliver(frame("hi", &[]));
        let buffer = bound_buffer(&h).await;
        assert!(h.editor.close_buffer(&buffer));
        handle.task.await.unwrap();

        assert!(channel.is_closed());
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn registry_removal_closes_channel() {
        let h = harness();
        let channel = ChannelHandle::new();
        let handle = SessionEngine::spawn(h.ctx.clone(), channel.clone());

        handle.frames.deliver(frame("hi", &[]));
        let buffer = bound_buffer(&h).await;
        assert!(h.registry.remove(buffer.uri()));
        handle.task.await.unwrap();

        assert!(channel.is_closed());
        assert!(!h.registry.remove(buffer.uri()));
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let h = harness();
        let a = ChannelHandle::new();
        let b = ChannelHandle::new();
        let ha = SessionEngine::spawn(h.ctx.clone(), a.clone());
        let hb = SessionEngine::spawn(h.ctx.clone(), b.clone());

        ha.frames.deliver(frame("a", &[]));
        hb.frames.deliver(frame("b", &[]));
        eventually(|| h.registry.len() == 2).await;

        hb.frames.deliver("garbage");
        hb.task.await.unwrap();

        assert!(b.is_closed());
        assert!(!a.is_closed());
        assert_eq!(h.registry.len(), 1);
    }
}

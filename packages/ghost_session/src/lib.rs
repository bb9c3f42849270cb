//! Ghost Session - browser field to editor buffer synchronization
//!
//! Everything needed to keep one browser text field and one editor buffer in
//! step, with no knowledge of HTTP or sockets. A transport hands each accepted
//! duplex channel to a [`SessionEngine`]; the engine creates a buffer on the
//! first frame, mirrors later frames into it and reports local edits back.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ghost_session::{
//!     ChannelHandle, EngineContext, MemoryEditor, SessionEngine, SessionRegistry,
//!     StaticSettings,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let ctx = EngineContext::new(
//!         Arc::new(MemoryEditor::new()),
//!         Arc::new(SessionRegistry::new()),
//!         Arc::new(StaticSettings::default()),
//!     );
//!
//!     let channel = ChannelHandle::new();
//!     let mut engine = SessionEngine::spawn(ctx, channel.clone());
//!
//!     engine
//!         .frames
//!         .deliver(r#"{"text":"hi","title":"Issue","selections":[{"start":2,"end":2}]}"#);
//!
//!     // Local edits come back as outbound messages
//!     while let Some(msg) = engine.outbound.recv().await {
//!         println!("send {:?}", msg.text);
//!     }
//! }
//! ```

pub mod editor;
mod engine;
mod error;
pub mod memory;
pub mod naming;
pub mod position;
pub mod protocol;
mod registry;
mod session;
pub mod settings;

pub use editor::{BufferHandle, ContentChange, EditorSurface, Subscription};
pub use engine::{EngineContext, EngineHandle, FrameSender, SessionEngine};
pub use error::{EditorError, SessionError};
pub use memory::MemoryEditor;
pub use naming::BufferNamer;
pub use protocol::{Handshake, InboundMessage, OutboundMessage, PROTOCOL_VERSION, Selection};
pub use registry::{ListenerId, RegistryEvent, SessionRegistry};
pub use session::{ChannelHandle, Session, SessionId};
pub use settings::{SettingsProvider, StaticSettings};

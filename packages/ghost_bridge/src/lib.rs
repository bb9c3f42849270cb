//! Ghost Bridge - serve GhostText browser fields to a local editor
//!
//! Adds the network side to [`ghost_session`]: an HTTP discovery endpoint and
//! WebSocket channels on one loopback port, figment-backed settings, and the
//! lifecycle consumers that react to sessions coming and going.

mod bridge;
mod channel;
pub mod config;
mod error;
pub mod focus;
pub mod headless;
pub mod lifecycle;
pub mod listener;

pub use bridge::Bridge;
pub use channel::serve_channel;
pub use config::{BridgeConfig, FileConfig, FileSettings};
pub use error::BridgeError;
pub use headless::HeadlessEditor;
pub use listener::{ChannelCallback, ListenerState, TransportListener};

//! Wire messages
//!
//! The discovery handshake is served over plain HTTP; everything else is one
//! JSON text frame per logical message on the duplex channel. Selection
//! offsets are UTF-16 code units into the accompanying `text`.

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Version advertised by the discovery handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// A selection or cursor, as character offsets into a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// A collapsed selection (plain cursor) at `offset`.
    pub fn caret(offset: usize) -> Self {
        Self::new(offset, offset)
    }
}

/// Field → engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    pub text: String,
    pub title: String,
    pub selections: Vec<Selection>,
}

impl InboundMessage {
    /// Parse one inbound frame. Missing fields are malformed, same as bad JSON.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Engine → field. Same shape as inbound minus the title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,
    pub selections: Vec<Selection>,
}

/// Body of the discovery response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Handshake {
    pub protocol_version: u32,
    pub web_socket_port: u16,
}

impl Handshake {
    pub fn new(port: u16) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            web_socket_port: port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inbound() {
        let msg = InboundMessage::parse(
            r#"{"text":"hello","title":"Issue #12","selections":[{"start":0,"end":5}],"url":"example.com"}"#,
        )
        .unwrap();
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.title, "Issue #12");
        assert_eq!(msg.selections, vec![Selection::new(0, 5)]);
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(InboundMessage::parse(r#"{"text":"hi","title":"t"}"#).is_err());
        assert!(InboundMessage::parse(r#"{"title":"t","selections":[]}"#).is_err());
        assert!(InboundMessage::parse("not json").is_err());
    }

    #[test]
    fn rejects_negative_offsets() {
        let raw = r#"{"text":"hi","title":"t","selections":[{"start":-1,"end":1}]}"#;
        assert!(InboundMessage::parse(raw).is_err());
    }

    #[test]
    fn outbound_has_no_title() {
        let msg = OutboundMessage {
            text: "abc".into(),
            selections: vec![Selection::caret(3)],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"text": "abc", "selections": [{"start": 3, "end": 3}]})
        );
    }

    #[test]
    fn handshake_field_names() {
        let json = serde_json::to_string(&Handshake::new(4001)).unwrap();
        assert_eq!(json, r#"{"ProtocolVersion":1,"WebSocketPort":4001}"#);
    }
}

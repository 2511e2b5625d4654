//! Core protocol types: the hub message model.
//!
//! Every frame on the wire is one [`Message`]. On the wire a message is a
//! flat JSON object tagged by an integer `type`; in Rust it is an enum, so
//! each variant carries exactly the fields its kind declares and nothing
//! else. That is what lets the codec emit a minimal object per kind.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// MessageType — the integer tag
// ---------------------------------------------------------------------------

/// The nine message kinds and their wire tags.
///
/// The numbering is part of the wire format and must never change.
///
/// `#[serde(try_from = "u8", into = "u8")]` makes serde read and write the
/// tag as a plain JSON integer (`"type":1`), going through the
/// `TryFrom<u8>` / `From<MessageType>` impls below. An unknown tag fails
/// deserialization instead of producing a bogus variant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum MessageType {
    /// Request to call a named method.
    Invocation = 1,
    /// One element of a streamed result.
    StreamItem = 2,
    /// Terminal response to an invocation.
    Completion = 3,
    /// Request to call a method whose result is a stream.
    StreamInvocation = 4,
    /// Request to stop a running stream invocation.
    CancelInvocation = 5,
    /// Keep-alive.
    Ping = 6,
    /// The sender is closing the connection.
    Close = 7,
    /// Acknowledges delivery up to a sequence id.
    Ack = 8,
    /// Announces the sequence id of the next message.
    Sequence = 9,
}

impl MessageType {
    /// The integer tag written to the wire.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl From<MessageType> for u8 {
    fn from(kind: MessageType) -> Self {
        kind.tag()
    }
}

impl TryFrom<u8> for MessageType {
    type Error = UnknownMessageType;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            1 => Self::Invocation,
            2 => Self::StreamItem,
            3 => Self::Completion,
            4 => Self::StreamInvocation,
            5 => Self::CancelInvocation,
            6 => Self::Ping,
            7 => Self::Close,
            8 => Self::Ack,
            9 => Self::Sequence,
            other => return Err(UnknownMessageType(other)),
        })
    }
}

/// A `type` tag outside `1..=9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownMessageType(pub u8);

impl fmt::Display for UnknownMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message type {}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Invocation — shared body of Invocation / StreamInvocation
// ---------------------------------------------------------------------------

/// A call to a named method on the other side.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Invocation {
    /// Correlates the call with its StreamItems and Completion.
    /// `None` for a fire-and-forget call.
    pub invocation_id: Option<String>,
    /// Method name.
    pub target: String,
    /// Positional arguments, untyped until coerced against the target's
    /// parameter list.
    pub arguments: Vec<Value>,
    /// Names of client-to-server upload streams attached to this call.
    /// `Some` selects the upload shape on the wire, even when empty.
    pub stream_ids: Option<Vec<String>>,
    /// `true` when the caller does not expect a Completion.
    pub nonblocking: bool,
}

impl Invocation {
    /// A call that expects a Completion for `invocation_id`.
    pub fn new(
        invocation_id: impl Into<String>,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            invocation_id: Some(invocation_id.into()),
            target: target.into(),
            arguments,
            stream_ids: None,
            nonblocking: false,
        }
    }

    /// A fire-and-forget call: no invocation id, no Completion.
    pub fn nonblocking(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            invocation_id: None,
            target: target.into(),
            arguments,
            stream_ids: None,
            nonblocking: true,
        }
    }

    /// Attaches upload stream ids.
    pub fn with_stream_ids(mut self, stream_ids: Vec<String>) -> Self {
        self.stream_ids = Some(stream_ids);
        self
    }
}

// ---------------------------------------------------------------------------
// Message — the envelope
// ---------------------------------------------------------------------------

/// One hub protocol message.
///
/// The kind is fixed by the variant, so a message can never change type
/// after creation and never carries fields that belong to another kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Tag 1.
    Invocation(Invocation),

    /// Tag 2: one streamed element for `invocation_id`.
    StreamItem {
        invocation_id: String,
        item: Value,
    },

    /// Tag 3: the end of `invocation_id`.
    ///
    /// `result` and `error` are meant to be exclusive. If both are set,
    /// the error wins on the wire. Neither set is a legal, empty
    /// acknowledgement.
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },

    /// Tag 4.
    StreamInvocation(Invocation),

    /// Tag 5: ask the other side to stop streaming `invocation_id`.
    CancelInvocation { invocation_id: String },

    /// Tag 6.
    Ping,

    /// Tag 7.
    ///
    /// `allow_reconnect` is only ever read from inbound frames; the
    /// client never sends it.
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },

    /// Tag 8.
    Ack { sequence_id: u64 },

    /// Tag 9.
    Sequence { sequence_id: u64 },
}

impl Message {
    /// The message's kind.
    pub fn kind(&self) -> MessageType {
        match self {
            Self::Invocation(_) => MessageType::Invocation,
            Self::StreamItem { .. } => MessageType::StreamItem,
            Self::Completion { .. } => MessageType::Completion,
            Self::StreamInvocation(_) => MessageType::StreamInvocation,
            Self::CancelInvocation { .. } => MessageType::CancelInvocation,
            Self::Ping => MessageType::Ping,
            Self::Close { .. } => MessageType::Close,
            Self::Ack { .. } => MessageType::Ack,
            Self::Sequence { .. } => MessageType::Sequence,
        }
    }

    /// The invocation id this message belongs to, if its kind has one.
    pub fn invocation_id(&self) -> Option<&str> {
        match self {
            Self::Invocation(inv) | Self::StreamInvocation(inv) => {
                inv.invocation_id.as_deref()
            }
            Self::StreamItem { invocation_id, .. }
            | Self::Completion { invocation_id, .. }
            | Self::CancelInvocation { invocation_id } => Some(invocation_id),
            Self::Ping | Self::Close { .. } | Self::Ack { .. } | Self::Sequence { .. } => None,
        }
    }

    /// A successful Completion carrying `result`.
    pub fn completion_result(invocation_id: impl Into<String>, result: Value) -> Self {
        Self::Completion {
            invocation_id: invocation_id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// A failed Completion carrying `error`.
    pub fn completion_error(
        invocation_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::Completion {
            invocation_id: invocation_id.into(),
            result: None,
            error: Some(error.into()),
        }
    }

    /// A Completion with neither result nor error.
    pub fn completion_empty(invocation_id: impl Into<String>) -> Self {
        Self::Completion {
            invocation_id: invocation_id.into(),
            result: None,
            error: None,
        }
    }

    /// A clean Close.
    pub fn close() -> Self {
        Self::Close {
            error: None,
            allow_reconnect: false,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_type_tags_are_stable() {
        let expected = [
            (MessageType::Invocation, 1),
            (MessageType::StreamItem, 2),
            (MessageType::Completion, 3),
            (MessageType::StreamInvocation, 4),
            (MessageType::CancelInvocation, 5),
            (MessageType::Ping, 6),
            (MessageType::Close, 7),
            (MessageType::Ack, 8),
            (MessageType::Sequence, 9),
        ];
        for (kind, tag) in expected {
            assert_eq!(kind.tag(), tag);
            assert_eq!(MessageType::try_from(tag), Ok(kind));
        }
    }

    #[test]
    fn test_message_type_serializes_as_integer() {
        let json = serde_json::to_string(&MessageType::Completion).unwrap();
        assert_eq!(json, "3");
    }

    #[test]
    fn test_unknown_tag_fails_to_deserialize() {
        assert_eq!(MessageType::try_from(0), Err(UnknownMessageType(0)));
        let result: Result<MessageType, _> = serde_json::from_str("10");
        assert!(result.is_err());
    }

    #[test]
    fn test_kind_matches_variant() {
        let inv = Invocation::new("1", "Send", vec![json!("hi")]);
        assert_eq!(Message::Invocation(inv.clone()).kind(), MessageType::Invocation);
        assert_eq!(Message::StreamInvocation(inv).kind(), MessageType::StreamInvocation);
        assert_eq!(Message::Ping.kind(), MessageType::Ping);
        assert_eq!(Message::close().kind(), MessageType::Close);
        assert_eq!(Message::Ack { sequence_id: 3 }.kind(), MessageType::Ack);
    }

    #[test]
    fn test_invocation_id_only_for_correlated_kinds() {
        assert_eq!(Message::completion_empty("7").invocation_id(), Some("7"));
        assert_eq!(
            Message::CancelInvocation { invocation_id: "9".into() }.invocation_id(),
            Some("9")
        );
        let fire_and_forget = Invocation::nonblocking("Log", vec![]);
        assert_eq!(Message::Invocation(fire_and_forget).invocation_id(), None);
        assert_eq!(Message::Ping.invocation_id(), None);
        assert_eq!(Message::Sequence { sequence_id: 1 }.invocation_id(), None);
    }

    #[test]
    fn test_nonblocking_constructor() {
        let inv = Invocation::nonblocking("Log", vec![json!(1)]);
        assert!(inv.nonblocking);
        assert!(inv.invocation_id.is_none());
        assert!(inv.stream_ids.is_none());
    }
}

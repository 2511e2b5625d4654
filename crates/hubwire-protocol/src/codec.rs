//! The hub protocol codec: [`Message`] ⇄ framed bytes.
//!
//! Encoding builds a per-kind *projection* — a small borrowed struct with
//! exactly the fields that kind puts on the wire — and hands only that to
//! the [`Encoder`]. Serializing the full enum would leak fields the server
//! rejects; the projections make that impossible by construction.
//!
//! A few kinds have a fixed shape and skip the encoder entirely.
//!
//! | kind | wire shape |
//! |---|---|
//! | Invocation / StreamInvocation | `type, invocationId?, nonblocking, target, arguments[, streamIds]` |
//! | StreamItem | `type, invocationId, item` |
//! | Completion | `type, invocationId` + `error`, else `result`, else nothing |
//! | CancelInvocation | `type, invocationId` |
//! | Ping | `{"type":6}` (constant) |
//! | Close | `{"type":7,"error":…}`, or `{"type":7}` (constant) |
//! | Ack / Sequence | `{"type":8\|9,"sequenceId":N}` (template) |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{trace, warn};

use crate::framer::{self, RECORD_SEPARATOR};
use crate::{Encoder, Invocation, JsonEncoder, Message, MessageType, ProtocolError};

/// Pre-framed Ping.
const PING_FRAME: &[u8] = b"{\"type\":6}\x1e";
/// Pre-framed Close without error.
const CLOSE_FRAME: &[u8] = b"{\"type\":7}\x1e";

/// How a transport should carry encoded frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Raw bytes.
    Binary,
    /// UTF-8 text.
    Text,
}

/// The result of parsing one transport buffer.
#[derive(Debug, Default)]
pub struct Parsed {
    /// Successfully decoded messages, in stream order.
    pub messages: Vec<Message>,
    /// One error per frame that failed to decode. Those frames are dropped;
    /// the frames after them are still in `messages`.
    pub rejected: Vec<ProtocolError>,
    /// Length of the unterminated tail after the last separator.
    pub trailing: usize,
}

/// The JSON hub protocol over a pluggable [`Encoder`].
///
/// Stateless across messages: the only state is the encoder, fixed at
/// construction.
#[derive(Debug, Clone)]
pub struct HubProtocol<E: Encoder> {
    encoder: E,
}

impl Default for HubProtocol<JsonEncoder> {
    fn default() -> Self {
        Self::new(JsonEncoder)
    }
}

impl<E: Encoder> HubProtocol<E> {
    /// Protocol name a handshake layer advertises to the hub.
    pub const NAME: &'static str = "json";
    /// Protocol version a handshake layer advertises to the hub.
    pub const VERSION: u32 = 1;

    /// Creates the protocol around `encoder`.
    pub fn new(encoder: E) -> Self {
        Self { encoder }
    }

    /// The encoder this protocol was built with.
    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Frames are written as binary transport messages.
    pub fn transfer_mode(&self) -> TransferMode {
        TransferMode::Binary
    }

    // -----------------------------------------------------------------------
    // Encode path
    // -----------------------------------------------------------------------

    /// Encodes one message into a wire-ready frame (separator included).
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the encoder rejects a value
    /// inside the message (arguments, result, item).
    pub fn encode_message(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        let frame = match message {
            Message::Invocation(inv) => {
                self.encode_invocation(MessageType::Invocation, inv)?
            }
            Message::StreamInvocation(inv) => {
                self.encode_invocation(MessageType::StreamInvocation, inv)?
            }
            Message::StreamItem {
                invocation_id,
                item,
            } => self.encode_framed(&StreamItemFrame {
                kind: MessageType::StreamItem,
                invocation_id,
                item,
            })?,
            Message::Completion {
                invocation_id,
                result,
                error,
            } => self.encode_completion(invocation_id, result.as_ref(), error.as_deref())?,
            Message::CancelInvocation { invocation_id } => {
                self.encode_framed(&CancelInvocationFrame {
                    kind: MessageType::CancelInvocation,
                    invocation_id,
                })?
            }
            Message::Ping => PING_FRAME.to_vec(),
            Message::Close { error, .. } => match non_empty(error.as_deref()) {
                Some(error) => self.encode_framed(&CloseWithErrorFrame {
                    kind: MessageType::Close,
                    error,
                })?,
                None => CLOSE_FRAME.to_vec(),
            },
            Message::Ack { sequence_id } => sequence_frame(MessageType::Ack, *sequence_id),
            Message::Sequence { sequence_id } => {
                sequence_frame(MessageType::Sequence, *sequence_id)
            }
        };

        trace!(
            kind = %message.kind(),
            json = %String::from_utf8_lossy(&frame[..frame.len() - 1]),
            "encoded message"
        );
        Ok(frame)
    }

    fn encode_framed<T: Serialize>(&self, projection: &T) -> Result<Vec<u8>, ProtocolError> {
        self.encoder.encode(projection).map(framer::terminate)
    }

    fn encode_invocation(
        &self,
        kind: MessageType,
        inv: &Invocation,
    ) -> Result<Vec<u8>, ProtocolError> {
        let invocation_id = inv.invocation_id.as_deref();
        match &inv.stream_ids {
            Some(stream_ids) => self.encode_framed(&UploadInvocationFrame {
                kind,
                invocation_id,
                nonblocking: inv.nonblocking,
                target: &inv.target,
                arguments: &inv.arguments,
                stream_ids,
            }),
            None => self.encode_framed(&InvocationFrame {
                kind,
                invocation_id,
                nonblocking: inv.nonblocking,
                target: &inv.target,
                arguments: &inv.arguments,
            }),
        }
    }

    fn encode_completion(
        &self,
        invocation_id: &str,
        result: Option<&Value>,
        error: Option<&str>,
    ) -> Result<Vec<u8>, ProtocolError> {
        let kind = MessageType::Completion;
        // Error takes precedence over result; a null result counts as none.
        if let Some(error) = non_empty(error) {
            return self.encode_framed(&CompletionWithErrorFrame {
                kind,
                invocation_id,
                error,
            });
        }
        match result.filter(|r| !r.is_null()) {
            Some(result) => self.encode_framed(&CompletionWithResultFrame {
                kind,
                invocation_id,
                result,
            }),
            None => self.encode_framed(&CompletionFrame {
                kind,
                invocation_id,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Decode path
    // -----------------------------------------------------------------------

    /// Splits and decodes every complete frame in `data`.
    ///
    /// A frame that fails to decode is reported in [`Parsed::rejected`] and
    /// skipped; it never hides the frames after it. An empty buffer parses
    /// to nothing.
    ///
    /// # Errors
    /// Returns `ProtocolError::Framing` if `data` is non-empty and has no
    /// separator at all. Nothing is decoded in that case.
    pub fn parse_messages(&self, data: &[u8]) -> Result<Parsed, ProtocolError> {
        let split = framer::split(data)?;
        let mut parsed = Parsed {
            messages: Vec::with_capacity(split.frames.len()),
            rejected: Vec::new(),
            trailing: split.remainder.len(),
        };

        for payload in split.frames {
            match self.decode_frame(payload) {
                Ok(message) => parsed.messages.push(message),
                Err(e) => {
                    warn!(error = %e, "dropping undecodable frame");
                    parsed.rejected.push(e);
                }
            }
        }
        Ok(parsed)
    }

    /// Decodes one payload (separator already stripped).
    ///
    /// Unknown fields are ignored and missing optional fields default to
    /// absent.
    ///
    /// # Errors
    /// - `ProtocolError::Decode` — malformed payload or unknown `type`.
    /// - `ProtocolError::InvalidMessage` — a StreamItem, Completion or
    ///   CancelInvocation without an invocation id.
    pub fn decode_frame(&self, payload: &[u8]) -> Result<Message, ProtocolError> {
        trace!(json = %String::from_utf8_lossy(payload), "decoding frame");
        let wire: WireMessage = self.encoder.decode(payload)?;
        wire.into_message()
    }

    /// Converts an untyped value to `T` through the encoder.
    ///
    /// # Errors
    /// Returns `ProtocolError::Coercion` if the value does not fit `T`.
    pub fn convert_to<T: DeserializeOwned>(&self, value: &Value) -> Result<T, ProtocolError> {
        self.encoder.convert(value)
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

fn sequence_frame(kind: MessageType, sequence_id: u64) -> Vec<u8> {
    let mut frame = format!("{{\"type\":{},\"sequenceId\":{}}}", kind.tag(), sequence_id)
        .into_bytes();
    frame.push(RECORD_SEPARATOR);
    frame
}

// ---------------------------------------------------------------------------
// Wire projections (encode side)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InvocationFrame<'a> {
    #[serde(rename = "type")]
    kind: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    invocation_id: Option<&'a str>,
    nonblocking: bool,
    target: &'a str,
    arguments: &'a [Value],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadInvocationFrame<'a> {
    #[serde(rename = "type")]
    kind: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    invocation_id: Option<&'a str>,
    nonblocking: bool,
    target: &'a str,
    arguments: &'a [Value],
    stream_ids: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamItemFrame<'a> {
    #[serde(rename = "type")]
    kind: MessageType,
    invocation_id: &'a str,
    item: &'a Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionFrame<'a> {
    #[serde(rename = "type")]
    kind: MessageType,
    invocation_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionWithResultFrame<'a> {
    #[serde(rename = "type")]
    kind: MessageType,
    invocation_id: &'a str,
    result: &'a Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionWithErrorFrame<'a> {
    #[serde(rename = "type")]
    kind: MessageType,
    invocation_id: &'a str,
    error: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelInvocationFrame<'a> {
    #[serde(rename = "type")]
    kind: MessageType,
    invocation_id: &'a str,
}

#[derive(Serialize)]
struct CloseWithErrorFrame<'a> {
    #[serde(rename = "type")]
    kind: MessageType,
    error: &'a str,
}

// ---------------------------------------------------------------------------
// Generic wire shape (decode side)
// ---------------------------------------------------------------------------

/// Every field any kind may carry. Only `type` is required.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(rename = "type")]
    kind: MessageType,
    invocation_id: Option<String>,
    target: Option<String>,
    arguments: Option<Vec<Value>>,
    stream_ids: Option<Vec<String>>,
    nonblocking: Option<bool>,
    result: Option<Value>,
    error: Option<String>,
    item: Option<Value>,
    sequence_id: Option<u64>,
    allow_reconnect: Option<bool>,
}

impl WireMessage {
    fn into_message(self) -> Result<Message, ProtocolError> {
        let kind = self.kind;
        let require_id = |id: Option<String>| {
            id.ok_or_else(|| {
                ProtocolError::InvalidMessage(format!("{kind} without invocationId"))
            })
        };

        Ok(match kind {
            MessageType::Invocation | MessageType::StreamInvocation => {
                let inv = Invocation {
                    invocation_id: self.invocation_id,
                    target: self.target.unwrap_or_default(),
                    arguments: self.arguments.unwrap_or_default(),
                    stream_ids: self.stream_ids,
                    nonblocking: self.nonblocking.unwrap_or(false),
                };
                if kind == MessageType::Invocation {
                    Message::Invocation(inv)
                } else {
                    Message::StreamInvocation(inv)
                }
            }
            MessageType::StreamItem => Message::StreamItem {
                invocation_id: require_id(self.invocation_id)?,
                item: self.item.unwrap_or(Value::Null),
            },
            MessageType::Completion => Message::Completion {
                invocation_id: require_id(self.invocation_id)?,
                result: self.result.filter(|r| !r.is_null()),
                error: self.error,
            },
            MessageType::CancelInvocation => Message::CancelInvocation {
                invocation_id: require_id(self.invocation_id)?,
            },
            MessageType::Ping => Message::Ping,
            MessageType::Close => Message::Close {
                error: self.error,
                allow_reconnect: self.allow_reconnect.unwrap_or(false),
            },
            MessageType::Ack => Message::Ack {
                sequence_id: self.sequence_id.unwrap_or(0),
            },
            MessageType::Sequence => Message::Sequence {
                sequence_id: self.sequence_id.unwrap_or(0),
            },
        })
    }
}

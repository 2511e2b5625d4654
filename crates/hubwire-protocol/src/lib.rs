//! Wire protocol for hubwire.
//!
//! This crate defines what a hub client and server say to each other:
//!
//! - **Types** ([`Message`], [`Invocation`], [`MessageType`]) — the nine
//!   message kinds that travel on the wire.
//! - **Framing** ([`framer`]) — how messages are delimited in a byte
//!   stream (each one ends with `0x1E`).
//! - **Codec** ([`HubProtocol`], [`Encoder`], [`JsonEncoder`]) — how a
//!   message becomes a minimal JSON object and back.
//! - **Coercion** ([`ParamType`]) — how untyped arguments are converted to
//!   the types a handler declares.
//! - **Errors** ([`ProtocolError`]).
//!
//! The protocol layer sits between the transport (raw bytes) and the
//! connection (invocations, handlers, reconnects). It knows nothing about
//! sockets or retry schedules.
//!
//! ```text
//! Transport (bytes) → Protocol (Message) → Connection (calls & handlers)
//! ```
//!
//! # Example
//!
//! ```rust
//! use hubwire_protocol::{HubProtocol, Invocation, Message};
//! use serde_json::json;
//!
//! let protocol = HubProtocol::default();
//! let call = Message::Invocation(Invocation::new("1", "Echo", vec![json!("hi")]));
//! let bytes = protocol.encode_message(&call).unwrap();
//! assert_eq!(bytes.last(), Some(&0x1E));
//!
//! let parsed = protocol.parse_messages(&bytes).unwrap();
//! assert_eq!(parsed.messages, vec![call]);
//! ```

mod codec;
mod coercion;
mod encoder;
mod error;
pub mod framer;
mod types;

pub use codec::{HubProtocol, Parsed, TransferMode};
pub use coercion::{FloatKind, IntKind, ParamType};
pub use encoder::{Encoder, JsonEncoder};
pub use error::ProtocolError;
pub use framer::{FrameReader, RECORD_SEPARATOR, Split};
pub use types::{Invocation, Message, MessageType, UnknownMessageType};

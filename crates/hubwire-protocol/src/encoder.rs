//! The Encoder seam: how one message projection becomes bytes.
//!
//! The hub codec decides *which* fields a message puts on the wire; an
//! [`Encoder`] decides *how* those fields are written. Swapping encoders
//! (a different JSON library, a tracing wrapper) never touches framing or
//! the per-kind projection rules.
//!
//! The encoder is chosen once, when the [`HubProtocol`](crate::HubProtocol)
//! is built, and is never replaced afterwards.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::ProtocolError;

/// Serializes and deserializes single payloads (no separator).
///
/// ## Trait bounds
///
/// - `Send + Sync + 'static` → the protocol is owned by a connection driver
///   that runs on a Tokio task, which may hop between threads.
///
/// The methods are generic, so `Encoder` is used as a type parameter,
/// never as `dyn Encoder`.
pub trait Encoder: Send + Sync + 'static {
    /// Serializes a value into a payload.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes one payload.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the payload is malformed or does
    /// not match `T`.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Converts an already-decoded, untyped value into `T`.
    ///
    /// This is the catch-all used by argument coercion for any declared
    /// type that has no dedicated conversion rule.
    ///
    /// # Errors
    /// Returns `ProtocolError::Coercion` if the value does not fit `T`.
    fn convert<T: DeserializeOwned>(&self, value: &Value) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonEncoder
// ---------------------------------------------------------------------------

/// An [`Encoder`] that writes compact JSON via `serde_json`.
///
/// Compact output never contains the record separator (0x1E): JSON
/// escapes every control character inside strings and emits no
/// whitespace between tokens.
///
/// ## Example
///
/// ```rust
/// use hubwire_protocol::{Encoder, JsonEncoder};
/// use serde_json::{json, Value};
///
/// let encoder = JsonEncoder;
/// let bytes = encoder.encode(&json!({"type": 6})).unwrap();
/// assert_eq!(bytes, br#"{"type":6}"#);
///
/// let back: Value = encoder.decode(&bytes).unwrap();
/// assert_eq!(back["type"], 6);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }

    fn convert<T: DeserializeOwned>(&self, value: &Value) -> Result<T, ProtocolError> {
        // `&Value` is itself a serde `Deserializer`, so no text round trip
        // is needed to reinterpret the tree as `T`.
        T::deserialize(value).map_err(|e| {
            ProtocolError::coercion(std::any::type_name::<T>(), e.to_string())
        })
    }
}

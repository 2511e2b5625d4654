//! Unified error type for hubwire.

use hubwire_connection::ConnectionError;
use hubwire_protocol::ProtocolError;
use hubwire_transport::TransportError;

/// Top-level error that wraps every layer's error.
///
/// When using the `hubwire` facade you deal with this single type instead
/// of importing errors from each layer. `#[from]` on each variant lets `?`
/// convert layer errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum HubwireError {
    /// A transport-level error (connect, send, receive).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, framing, coercion).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A connection-level error (lifecycle, call failures, hub errors).
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl HubwireError {
    /// The hub's error message, if the hub answered a call with one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Connection(ConnectionError::Server(msg)) => Some(msg),
            _ => None,
        }
    }
}

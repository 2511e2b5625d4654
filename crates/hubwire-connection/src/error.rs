//! Error types for the connection layer.

use hubwire_protocol::ProtocolError;

/// Errors surfaced by a [`HubConnection`](crate::HubConnection) and the
/// calls made through it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    /// The connection is not currently able to carry messages, for example
    /// while it is waiting out a reconnect delay.
    #[error("not connected")]
    NotConnected,

    /// `close()` was called. Terminal.
    #[error("connection closed")]
    Closed,

    /// Every entry of the retry schedule was used up without a successful
    /// reconnect. Terminal.
    #[error("connection exhausted after {attempts} reconnect attempt(s)")]
    ConnectionExhausted {
        /// Reconnect attempts made before giving up.
        attempts: u32,
    },

    /// The hub sent a Close that did not allow a reconnect. Terminal.
    #[error("hub closed the connection")]
    ServerClosed {
        /// The error the hub gave, if any.
        reason: Option<String>,
    },

    /// The transport dropped while this call was waiting for its answer.
    /// The connection itself may recover, but the call's Completion is lost.
    #[error("connection lost before the call completed")]
    ConnectionLost,

    /// The hub answered the call with a Completion carrying an error.
    #[error("hub error: {0}")]
    Server(String),

    /// The transport failed to connect, send or receive.
    ///
    /// Stored as a string so that the error stays `Clone` and can be
    /// handed to every caller waiting on the same failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Encoding, decoding or argument coercion failed.
    #[error(transparent)]
    Protocol(#[from] std::sync::Arc<ProtocolError>),
}

impl From<ProtocolError> for ConnectionError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(std::sync::Arc::new(err))
    }
}

impl ConnectionError {
    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Whether the connection can never carry messages again after this
    /// error.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::ConnectionExhausted { .. } | Self::ServerClosed { .. }
        )
    }
}

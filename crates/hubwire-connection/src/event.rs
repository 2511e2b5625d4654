//! Events emitted by a running connection.

use hubwire_protocol::Message;

use crate::{ConnectionError, ConnectionState};

/// Something the application may want to react to.
///
/// Delivered on the bounded channel returned by
/// [`HubConnection::connect`](crate::HubConnection::connect). If the
/// consumer falls behind, events are dropped with a warning, except the
/// terminal ones (`ConnectionExhausted`, `ServerClosed` and the final
/// `StateChanged`), which wait for room. A `close()` made while one of
/// them is waiting takes effect at once and drops it.
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// The lifecycle state changed.
    StateChanged(ConnectionState),

    /// An inbound message that no pending call or handler consumed: an
    /// Invocation for an unregistered target, an Ack, a Sequence, or a
    /// StreamItem/Completion for an unknown invocation id.
    Message(Message),

    /// A client-bound invocation could not be dispatched to its handler,
    /// typically `ArgumentCountMismatch` or a coercion failure. Invocations
    /// that carry an id are also answered with a Completion error.
    DispatchFailed {
        target: String,
        error: ConnectionError,
    },

    /// The retry schedule ran out. Terminal.
    ConnectionExhausted { attempts: u32 },

    /// The hub sent Close without permission to reconnect. Terminal.
    ServerClosed { error: Option<String> },
}

impl HubEvent {
    pub(crate) fn is_terminal(&self) -> bool {
        match self {
            Self::StateChanged(state) => state.is_terminal(),
            Self::ConnectionExhausted { .. } | Self::ServerClosed { .. } => true,
            Self::Message(_) | Self::DispatchFailed { .. } => false,
        }
    }
}

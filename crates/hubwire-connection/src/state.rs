use std::fmt;

/// Lifecycle state of a hub connection.
///
/// ```text
///   Disconnected ─→ Connecting ─→ Connected ⇄ Reconnecting
///        ↑              │             │            │
///        └───(failure)──┘             │            ├─(schedule exhausted)─→ Disconnected
///                                     │            │
///               close() from anywhere ┴────────────┴─→ Closed
/// ```
///
/// `Closed` is terminal. `Disconnected` is terminal once the connection
/// has been started: a failed first connect, an exhausted retry schedule
/// and a server Close without reconnect permission all end there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    Disconnected,
    /// Opening the transport for the first time.
    Connecting,
    /// Messages flow.
    Connected,
    /// The transport dropped; waiting out a delay or attempting to reconnect.
    Reconnecting,
    /// Closed on request.
    Closed,
}

impl ConnectionState {
    /// Whether the connection can carry messages in this state.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Whether this is an end state of a started connection.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        })
    }
}

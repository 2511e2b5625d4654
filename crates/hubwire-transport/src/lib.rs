//! Transport abstraction layer for hubwire.
//!
//! The hub protocol rides on a single persistent duplex connection. This
//! crate provides the seams the rest of the stack is written against:
//!
//! - [`Connection`] — send bytes, receive bytes, close.
//! - [`Connector`] — opens a new [`Connection`] to a fixed address. The
//!   connection driver calls it once on start and again on every
//!   reconnect attempt.
//! - [`Listener`] — accepts incoming connections. Only used to stand up
//!   loopback hubs in tests and demos.
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket transport via `tokio-tungstenite`
//!
//! The [`memory`] transport is always available and needs no network.

mod error;
pub mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{MemoryConnection, MemoryConnector, MemoryDialer, MemoryPeer};
#[cfg(feature = "websocket")]
pub use websocket::{
    WebSocketConnection, WebSocketConnector, WebSocketListener,
};

use std::fmt;
use std::future::Future;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A single connection that can send and receive bytes.
///
/// The returned futures are `Send` so a generic connection can be driven
/// from a spawned Tokio task.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends data to the remote peer.
    ///
    /// Implementations must serialize concurrent writers so two frames
    /// are never interleaved on the wire.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next buffer from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed. A buffer
    /// may hold several frames, or only part of one.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

/// Opens connections to one remote hub.
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: Connection;
    /// The error type for connect attempts.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Attempts to open a new connection.
    fn connect(
        &self,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

/// Accepts new incoming connections.
pub trait Listener: Send + Sync + 'static {
    /// The connection type produced by this listener.
    type Connection: Connection;
    /// The error type for listener operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_equality() {
        let a = ConnectionId::new(1);
        let b = ConnectionId::new(1);
        let c = ConnectionId::new(2);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

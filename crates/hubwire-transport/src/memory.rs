//! In-process transport backed by Tokio channels.
//!
//! [`pair`] creates two connected ends: bytes sent on one arrive, unchanged
//! and in order, on the other. [`connector`] returns a [`MemoryConnector`]
//! whose connect attempts are scripted by the matching [`MemoryDialer`],
//! which is how lifecycle tests simulate a hub that goes away and comes
//! back.
//!
//! ```
//! use hubwire_transport::{memory, Connection};
//!
//! # async fn demo() -> Result<(), hubwire_transport::TransportError> {
//! let (client, hub) = memory::pair();
//! client.send(b"{\"type\":6}\x1e").await?;
//! assert_eq!(hub.recv().await?.as_deref(), Some(&b"{\"type\":6}\x1e"[..]));
//! # Ok(())
//! # }
//! ```

use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};

use crate::{Connection, ConnectionId, Connector, TransportError};

static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(1);

/// One end of an in-memory duplex connection.
pub struct MemoryConnection {
    id: ConnectionId,
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

/// The hub-side end of a connection handed out by a [`MemoryDialer`].
pub type MemoryPeer = MemoryConnection;

/// Creates two connected ends.
pub fn pair() -> (MemoryConnection, MemoryConnection) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (MemoryConnection::new(a_tx, b_rx), MemoryConnection::new(b_tx, a_rx))
}

impl MemoryConnection {
    fn new(
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            id: ConnectionId::new(NEXT_MEMORY_ID.fetch_add(1, Ordering::Relaxed)),
            tx: std::sync::Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
        }
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Vec<u8>>> {
        self.tx.lock().ok().and_then(|tx| tx.clone())
    }
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let tx = self.sender().ok_or_else(|| {
            TransportError::ConnectionClosed("closed locally".into())
        })?;
        tx.send(data.to_vec()).map_err(|_| {
            TransportError::SendFailed(TransportError::io(
                ErrorKind::BrokenPipe,
                "peer dropped",
            ))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        // Dropping our sender ends the peer's receive stream.
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// A [`Connector`] whose attempts succeed or fail as its dialer decides.
pub struct MemoryConnector {
    outcomes: Mutex<mpsc::UnboundedReceiver<Option<MemoryConnection>>>,
    attempts: Arc<AtomicUsize>,
}

/// Scripts the outcome of each connect attempt on a [`MemoryConnector`].
///
/// Outcomes are consumed in the order they were queued. An attempt with
/// nothing queued waits until the dialer queues something, or fails once
/// the dialer is dropped.
#[derive(Clone)]
pub struct MemoryDialer {
    outcomes: mpsc::UnboundedSender<Option<MemoryConnection>>,
    attempts: Arc<AtomicUsize>,
}

/// Creates a scripted connector and its dialer.
pub fn connector() -> (MemoryConnector, MemoryDialer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let attempts = Arc::new(AtomicUsize::new(0));
    (
        MemoryConnector {
            outcomes: Mutex::new(rx),
            attempts: Arc::clone(&attempts),
        },
        MemoryDialer {
            outcomes: tx,
            attempts,
        },
    )
}

impl MemoryDialer {
    /// Queues a successful attempt and returns the hub-side end of it.
    pub fn accept(&self) -> MemoryPeer {
        let (client, hub) = pair();
        let _ = self.outcomes.send(Some(client));
        hub
    }

    /// Queues a refused attempt.
    pub fn refuse(&self) {
        let _ = self.outcomes.send(None);
    }

    /// Number of connect attempts made so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;
    type Error = TransportError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self.outcomes.lock().await.recv().await;
        match outcome {
            Some(Some(conn)) => {
                tracing::trace!(attempt, id = %conn.id(), "memory connect accepted");
                Ok(conn)
            }
            Some(None) | None => {
                tracing::trace!(attempt, "memory connect refused");
                Err(TransportError::ConnectFailed(TransportError::io(
                    ErrorKind::ConnectionRefused,
                    "refused",
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (a, b) = pair();
        a.send(b"one").await.unwrap();
        a.send(b"two").await.unwrap();

        assert_eq!(b.recv().await.unwrap().unwrap(), b"one");
        assert_eq!(b.recv().await.unwrap().unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (a, b) = pair();
        a.close().await.unwrap();
        assert!(b.recv().await.unwrap().is_none());
        assert!(a.send(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_connector_follows_script() {
        let (connector, dialer) = connector();
        dialer.refuse();
        let hub = dialer.accept();

        assert!(connector.connect().await.is_err());
        let client = connector.connect().await.expect("second attempt accepted");
        assert_eq!(dialer.attempts(), 2);

        client.send(b"hi").await.unwrap();
        assert_eq!(hub.recv().await.unwrap().unwrap(), b"hi");
    }

    #[tokio::test]
    async fn test_connector_fails_when_dialer_dropped() {
        let (connector, dialer) = connector();
        drop(dialer);
        assert!(matches!(
            connector.connect().await,
            Err(TransportError::ConnectFailed(_))
        ));
    }
}

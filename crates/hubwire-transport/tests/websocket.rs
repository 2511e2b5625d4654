//! Integration tests for the WebSocket transport.
//!
//! These tests spin up a real WebSocket listener on a loopback port and dial
//! it with [`WebSocketConnector`], so both halves of the transport are
//! exercised over an actual TCP socket.

#[cfg(feature = "websocket")]
mod websocket {
    use hubwire_transport::{
        Connection, Connector, Listener, WebSocketConnector, WebSocketListener,
    };

    /// Binds on an OS-assigned port and returns the listener with its URL.
    async fn bind() -> (WebSocketListener, String) {
        let listener = WebSocketListener::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = listener.local_addr().expect("should have local addr");
        (listener, format!("ws://{addr}"))
    }

    #[tokio::test]
    async fn test_websocket_connect_and_send_receive() {
        let (mut listener, url) = bind().await;

        let server_handle = tokio::spawn(async move {
            listener.accept().await.expect("should accept")
        });

        let client = WebSocketConnector::new(url)
            .connect()
            .await
            .expect("client should connect");
        let server = server_handle.await.expect("task should complete");

        assert!(client.id().into_inner() > 0);
        assert_ne!(client.id(), server.id());

        // --- Client sends, server receives ---
        client
            .send(b"{\"type\":6}\x1e")
            .await
            .expect("send should succeed");
        let received = server
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, b"{\"type\":6}\x1e");

        // --- Server sends, client receives ---
        server.send(b"{\"type\":7}\x1e").await.unwrap();
        let received = client.recv().await.unwrap().unwrap();
        assert_eq!(received, b"{\"type\":7}\x1e");

        client.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_peer_close() {
        let (mut listener, url) = bind().await;

        let server_handle = tokio::spawn(async move {
            listener.accept().await.expect("should accept")
        });

        let client = WebSocketConnector::new(url).connect().await.unwrap();
        let server = server_handle.await.unwrap();

        client.close().await.unwrap();

        let result = server.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_websocket_connect_refused() {
        // Bind, note the port, then drop the listener so nothing answers.
        let (listener, url) = bind().await;
        drop(listener);

        let result = WebSocketConnector::new(url).connect().await;
        assert!(result.is_err(), "connect to a closed port should fail");
    }
}

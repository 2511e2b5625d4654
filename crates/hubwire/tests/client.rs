//! End-to-end tests: a `HubConnectionBuilder` client against a tiny hub
//! served over a real loopback WebSocket.

use std::time::Duration;

use hubwire::prelude::*;
use hubwire::protocol::FrameReader;
use hubwire::transport::{Connection, Listener, WebSocketListener};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Serves one client: answers `Add`, `Fail`, `Count`, `TriggerNotify`
/// and `Quit`, and stops when the client closes.
async fn serve_one(mut listener: WebSocketListener) {
    let conn = listener.accept().await.expect("should accept");
    let protocol = HubProtocol::<JsonEncoder>::default();
    let mut reader = FrameReader::new(FrameReader::DEFAULT_MAX_BUFFERED);

    while let Ok(Some(data)) = conn.recv().await {
        reader.push(&data);
        while let Some(frame) = reader.next_frame().expect("well-framed input") {
            let message = protocol.decode_frame(&frame).expect("should decode");
            match message {
                Message::Invocation(inv) => match (inv.target.as_str(), inv.invocation_id) {
                    ("Add", Some(id)) => {
                        let sum: i64 = inv.arguments.iter().filter_map(Value::as_i64).sum();
                        push(&conn, &protocol, Message::completion_result(id, json!(sum))).await;
                    }
                    ("Fail", Some(id)) => {
                        push(&conn, &protocol, Message::completion_error(id, "boom")).await;
                    }
                    ("TriggerNotify", None) => {
                        let notify =
                            Invocation::nonblocking("Notify", vec![json!("7"), json!("hi")]);
                        push(&conn, &protocol, Message::Invocation(notify)).await;
                    }
                    ("Quit", None) => {
                        push(&conn, &protocol, Message::Close {
                            error: Some("bye".into()),
                            allow_reconnect: false,
                        })
                        .await;
                        let _ = conn.close().await;
                        return;
                    }
                    (other, _) => panic!("unexpected call to {other}"),
                },
                Message::StreamInvocation(inv) => {
                    let id = inv.invocation_id.expect("stream calls carry an id");
                    let n = inv.arguments.first().and_then(Value::as_u64).unwrap_or(0);
                    for i in 1..=n {
                        push(&conn, &protocol, Message::StreamItem {
                            invocation_id: id.clone(),
                            item: json!(i),
                        })
                        .await;
                    }
                    push(&conn, &protocol, Message::completion_empty(id)).await;
                }
                Message::Close { .. } => return,
                _ => {}
            }
        }
    }
}

async fn push<C: Connection>(conn: &C, protocol: &HubProtocol<JsonEncoder>, message: Message) {
    let bytes = protocol.encode_message(&message).expect("should encode");
    conn.send(&bytes).await.expect("hub send");
}

async fn start_hub() -> (HubConnection, mpsc::Receiver<HubEvent>) {
    let listener = WebSocketListener::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let url = format!("ws://{}", listener.local_addr().expect("local addr"));
    tokio::spawn(serve_one(listener));

    HubConnectionBuilder::new(url)
        .retry_policy(RetryPolicy::never())
        .keep_alive_interval(Duration::ZERO)
        .connect()
        .await
        .expect("should connect")
}

async fn next_non_state(events: &mut mpsc::Receiver<HubEvent>) -> HubEvent {
    loop {
        let event = timeout(WAIT, events.recv())
            .await
            .expect("event in time")
            .expect("channel open");
        if !matches!(event, HubEvent::StateChanged(_)) {
            return event;
        }
    }
}

#[tokio::test]
async fn test_invoke_returns_result() {
    let (hub, _events) = start_hub().await;
    assert_eq!(hub.state(), ConnectionState::Connected);

    let sum = timeout(WAIT, hub.invoke("Add", vec![json!(2), json!(40)]))
        .await
        .expect("reply in time")
        .expect("invoke should succeed");
    assert_eq!(sum, json!(42));

    hub.close().await;
    assert_eq!(hub.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_invoke_surfaces_hub_error() {
    let (hub, _events) = start_hub().await;

    let err: HubwireError = timeout(WAIT, hub.invoke("Fail", vec![]))
        .await
        .expect("reply in time")
        .expect_err("hub should fail the call")
        .into();
    assert_eq!(err.server_message(), Some("boom"));

    hub.close().await;
}

#[tokio::test]
async fn test_stream_yields_items_then_ends() {
    let (hub, _events) = start_hub().await;

    let mut stream = hub.stream("Count", vec![json!(3)]).await.expect("stream");
    let mut items = Vec::new();
    while let Some(item) = timeout(WAIT, stream.next()).await.expect("item in time") {
        items.push(item.expect("item ok"));
    }
    assert_eq!(items, vec![json!(1), json!(2), json!(3)]);

    hub.close().await;
}

#[tokio::test]
async fn test_hub_invokes_registered_handler() {
    let (hub, _events) = start_hub().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.on("Notify", vec![ParamType::INT, ParamType::String], move |args| {
        let _ = tx.send(args);
    });
    hub.send("TriggerNotify", vec![]).await.expect("send");

    let args = timeout(WAIT, rx.recv())
        .await
        .expect("handler in time")
        .expect("handler called");
    assert_eq!(args, vec![json!(7), json!("hi")]);

    hub.close().await;
}

#[tokio::test]
async fn test_hub_close_without_reconnect_is_terminal() {
    let (hub, mut events) = start_hub().await;

    hub.send("Quit", vec![]).await.expect("send");

    match next_non_state(&mut events).await {
        HubEvent::ServerClosed { error } => assert_eq!(error.as_deref(), Some("bye")),
        other => panic!("expected ServerClosed, got {other:?}"),
    }
    assert_eq!(hub.state(), ConnectionState::Disconnected);

    let err = hub.invoke("Add", vec![]).await.expect_err("no longer connected");
    assert!(err.is_terminal());
    assert!(matches!(
        err,
        ConnectionError::ServerClosed { reason: Some(ref r) } if r == "bye"
    ));

    hub.close().await;
    assert_eq!(hub.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_connect_to_dead_port_fails() {
    // Bind then drop to get a port nobody listens on.
    let listener = WebSocketListener::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let url = format!("ws://{}", listener.local_addr().expect("local addr"));
    drop(listener);

    let result = HubConnectionBuilder::new(url).connect().await;
    assert!(matches!(
        result,
        Err(HubwireError::Connection(ConnectionError::Transport(_)))
    ));
}

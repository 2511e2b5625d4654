//! Minimal hub client: connects, listens for `ReceiveMessage`, sends one
//! message, and prints every connection event until the hub goes away.
//!
//! ```text
//! cargo run -p hub-client -- ws://127.0.0.1:5000/chat
//! RUST_LOG=hubwire_connection=debug cargo run -p hub-client
//! ```

use hubwire::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "ws://127.0.0.1:5000/chat";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let url = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_URL.to_string());
    tracing::info!(%url, "starting hub client");

    let (hub, mut events) = HubConnectionBuilder::new(url).connect().await?;

    hub.on(
        "ReceiveMessage",
        vec![ParamType::String, ParamType::String],
        |args| println!("{}: {}", args[0], args[1]),
    );

    match hub
        .invoke("SendMessage", vec![json!("hub-client"), json!("hello")])
        .await
    {
        Ok(result) => println!("SendMessage -> {result}"),
        Err(e) => eprintln!("SendMessage failed: {e}"),
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = events.recv() => match event {
                Some(HubEvent::StateChanged(state)) => println!("state: {state}"),
                Some(HubEvent::Message(message)) => println!("unhandled: {message:?}"),
                Some(HubEvent::DispatchFailed { target, error }) => {
                    eprintln!("could not dispatch {target}: {error}");
                }
                Some(HubEvent::ConnectionExhausted { attempts }) => {
                    eprintln!("gave up after {attempts} reconnect attempt(s)");
                    break;
                }
                Some(HubEvent::ServerClosed { error }) => {
                    eprintln!("hub closed the connection: {}", error.as_deref().unwrap_or("no reason"));
                    break;
                }
                None => break,
            },
        }
    }

    hub.close().await;
    Ok(())
}

//! # hubwire
//!
//! Client for framed, JSON-encoded hub messaging over one persistent
//! duplex connection: invoke remote methods, receive streamed results,
//! handle hub-to-client calls, and ride out dropped connections with a
//! bounded retry schedule.
//!
//! The facade ties the layers together:
//!
//! - [`transport`] — bytes over WebSocket (or in memory)
//! - [`protocol`] — messages, framing, JSON codec, argument coercion
//! - [`connection`] — lifecycle, retries, call correlation, dispatch
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hubwire::prelude::*;
//!
//! # async fn demo() -> Result<(), HubwireError> {
//! let (hub, mut events) = HubConnectionBuilder::new("ws://127.0.0.1:5000/chat")
//!     .connect()
//!     .await?;
//!
//! hub.on("ReceiveMessage", vec![ParamType::String, ParamType::String], |args| {
//!     println!("{}: {}", args[0], args[1]);
//! });
//! hub.send("SendMessage", vec![json!("me"), json!("hello")]).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let HubEvent::ConnectionExhausted { .. } = event {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod builder;
mod error;

pub use builder::HubConnectionBuilder;
pub use error::HubwireError;

pub use hubwire_connection as connection;
pub use hubwire_protocol as protocol;
pub use hubwire_transport as transport;

/// Everything a typical client needs.
pub mod prelude {
    pub use crate::{HubConnectionBuilder, HubwireError};
    pub use hubwire_connection::{
        ConnectionError, ConnectionState, HubConnection, HubEvent, HubOptions,
        InvocationStream, RetryPolicy, RetryStep,
    };
    pub use hubwire_protocol::{
        FloatKind, HubProtocol, IntKind, Invocation, JsonEncoder, Message, ParamType,
    };
    pub use serde_json::{Value, json};
}

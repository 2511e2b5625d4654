//! Connection lifecycle for hubwire.
//!
//! This crate turns a transport [`Connector`](hubwire_transport::Connector)
//! and a [`HubProtocol`](hubwire_protocol::HubProtocol) into a long-lived
//! hub connection:
//!
//! 1. **Lifecycle** — connect, detect drops, reconnect along a
//!    [`RetryPolicy`], close ([`ConnectionState`]).
//! 2. **Calls** — [`HubConnection::invoke`], [`HubConnection::send`] and
//!    [`HubConnection::stream`], correlated with their Completions by
//!    invocation id.
//! 3. **Dispatch** — hub-to-client invocations routed to handlers
//!    registered with [`HubConnection::on`], arguments coerced to the
//!    declared parameter types.
//!
//! # How it fits in the stack
//!
//! ```text
//! Application (above)  ← HubEvent stream, call results
//!     ↕
//! Connection Layer (this crate)  ← state machine, retries, correlation
//!     ↕
//! Protocol Layer (below)  ← Message, framing, JSON codec
//!     ↕
//! Transport Layer  ← bytes
//! ```

mod connection;
mod error;
mod event;
mod options;
mod retry;
mod state;

pub use connection::{HubConnection, InvocationStream};
pub use error::ConnectionError;
pub use event::HubEvent;
pub use options::HubOptions;
pub use retry::{Backoff, RetryPolicy, RetryStep};
pub use state::ConnectionState;

//! `HubConnectionBuilder`: the one-call way to reach a hub.
//!
//! Wires the default stack together: WebSocket transport, JSON protocol,
//! and whatever [`HubOptions`] the caller tweaked.

use std::time::Duration;

use hubwire_connection::{HubConnection, HubEvent, HubOptions, RetryPolicy};
use hubwire_protocol::{HubProtocol, JsonEncoder};
use hubwire_transport::WebSocketConnector;
use tokio::sync::mpsc;

use crate::HubwireError;

/// Builder for a hub connection over WebSocket with the JSON protocol.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use hubwire::prelude::*;
///
/// # async fn demo() -> Result<(), HubwireError> {
/// let (hub, mut events) = HubConnectionBuilder::new("ws://127.0.0.1:5000/hub")
///     .retry_policy(RetryPolicy::from_delays([Duration::from_secs(2)]))
///     .keep_alive_interval(Duration::from_secs(30))
///     .connect()
///     .await?;
///
/// let answer = hub.invoke("Add", vec![json!(1), json!(2)]).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HubConnectionBuilder {
    url: String,
    options: HubOptions,
}

impl HubConnectionBuilder {
    /// Creates a builder for the hub at `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: HubOptions::default(),
        }
    }

    /// Replaces all options at once.
    pub fn options(mut self, options: HubOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the reconnect schedule.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.options.retry_policy = policy;
        self
    }

    /// Sets the keep-alive interval (`Duration::ZERO` disables it).
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.options.keep_alive_interval = interval;
        self
    }

    /// Sets the event channel capacity.
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.event_channel_capacity = capacity;
        self
    }

    /// The target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connects and starts the connection driver.
    ///
    /// # Errors
    /// Returns `HubwireError::Connection` if the first connect fails.
    pub async fn connect(
        self,
    ) -> Result<(HubConnection, mpsc::Receiver<HubEvent>), HubwireError> {
        tracing::debug!(url = %self.url, "connecting to hub");
        let connector = WebSocketConnector::new(self.url);
        let protocol = HubProtocol::<JsonEncoder>::default();
        Ok(HubConnection::connect(connector, protocol, self.options).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_applies_settings() {
        let builder = HubConnectionBuilder::new("ws://localhost:1/hub")
            .retry_policy(RetryPolicy::never())
            .keep_alive_interval(Duration::ZERO)
            .event_channel_capacity(8);
        assert_eq!(builder.url(), "ws://localhost:1/hub");
        assert_eq!(builder.options.retry_policy, RetryPolicy::never());
        assert_eq!(builder.options.keep_alive(), None);
        assert_eq!(builder.options.event_channel_capacity, 8);
    }

    #[test]
    fn test_builder_defaults() {
        let builder = HubConnectionBuilder::new("ws://localhost:1/hub");
        assert_eq!(builder.options.retry_policy, RetryPolicy::default());
    }
}

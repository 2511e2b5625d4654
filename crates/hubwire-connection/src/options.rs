//! Connection configuration.

use std::time::Duration;

use hubwire_protocol::FrameReader;
use tracing::warn;

use crate::RetryPolicy;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default idle time before a keep-alive Ping is written.
const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Options for a [`HubConnection`](crate::HubConnection).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use hubwire_connection::{HubOptions, RetryPolicy};
///
/// let options = HubOptions::default()
///     .with_retry_policy(RetryPolicy::from_delays([Duration::from_secs(1)]))
///     .with_keep_alive_interval(Duration::from_secs(30));
/// assert_eq!(options.event_channel_capacity, 256);
/// ```
#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Reconnect schedule applied after an established connection drops.
    /// Default: `[5s, 15s, 45s, 90s, stop]`.
    pub retry_policy: RetryPolicy,
    /// A Ping is written whenever nothing else has been written for this
    /// long. `Duration::ZERO` disables keep-alive. Default: 15 s.
    pub keep_alive_interval: Duration,
    /// Capacity of the bounded event channel. When the consumer falls
    /// behind, non-terminal events are dropped with a warning.
    /// Default: 256; values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Most bytes of an unterminated frame the reader will hold before it
    /// gives up on the frame. Default: 1 MiB.
    pub max_buffered_bytes: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            max_buffered_bytes: FrameReader::DEFAULT_MAX_BUFFERED,
        }
    }
}

impl HubOptions {
    /// Smallest accepted frame buffer.
    pub const MIN_BUFFERED_BYTES: usize = 1024;

    /// Sets the reconnect schedule.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the keep-alive interval (`Duration::ZERO` disables it).
    #[must_use]
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Sets the event channel capacity.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Sets the cap on unterminated frame bytes.
    #[must_use]
    pub fn with_max_buffered_bytes(mut self, max: usize) -> Self {
        self.max_buffered_bytes = max;
        self
    }

    /// Clamps out-of-range values so the options are safe to use.
    ///
    /// Called by [`HubConnection::connect`](crate::HubConnection::connect).
    pub fn validated(mut self) -> Self {
        if self.event_channel_capacity == 0 {
            warn!("event_channel_capacity of 0 — clamping to 1");
            self.event_channel_capacity = 1;
        }
        if self.max_buffered_bytes < Self::MIN_BUFFERED_BYTES {
            warn!(
                max_buffered_bytes = self.max_buffered_bytes,
                min = Self::MIN_BUFFERED_BYTES,
                "max_buffered_bytes below minimum — clamping"
            );
            self.max_buffered_bytes = Self::MIN_BUFFERED_BYTES;
        }
        self.retry_policy = self.retry_policy.validated();
        self
    }

    /// The keep-alive interval, or `None` when disabled.
    pub fn keep_alive(&self) -> Option<Duration> {
        (!self.keep_alive_interval.is_zero()).then_some(self.keep_alive_interval)
    }
}

//! Reconnect schedule.
//!
//! A [`RetryPolicy`] is an ordered list of [`RetryStep`]s. After the
//! transport drops, the connection walks the list: wait, try to reconnect,
//! move to the next step on failure. Reaching [`RetryStep::StopRetrying`]
//! (or the end of the list) gives up for good. A successful reconnect
//! rewinds to the first step.
//!
//! ```text
//!   drop ─→ Wait(5s) ─fail─→ Wait(15s) ─fail─→ … ─→ StopRetrying ─→ exhausted
//!              │                 │
//!              └──── success ────┴──→ back to step 0
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// One entry of a retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// Wait this long, then attempt to reconnect.
    Wait(Duration),
    /// Give up. Nothing after this entry is ever used.
    StopRetrying,
}

/// An ordered reconnect schedule.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use hubwire_connection::{RetryPolicy, RetryStep};
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.steps()[0], RetryStep::Wait(Duration::from_secs(5)));
/// assert_eq!(policy.max_attempts(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    steps: Vec<RetryStep>,
    /// Upper bound of a random delay added to every wait (0 = none).
    jitter: Duration,
}

impl Default for RetryPolicy {
    /// `[5s, 15s, 45s, 90s, stop]`, no jitter.
    fn default() -> Self {
        Self::from_delays([5, 15, 45, 90].map(Duration::from_secs))
    }
}

impl RetryPolicy {
    /// Builds a policy from explicit steps.
    pub fn new(steps: impl IntoIterator<Item = RetryStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            jitter: Duration::ZERO,
        }
    }

    /// Waits for each delay in turn, then stops.
    pub fn from_delays(delays: impl IntoIterator<Item = Duration>) -> Self {
        Self::new(
            delays
                .into_iter()
                .map(RetryStep::Wait)
                .chain(std::iter::once(RetryStep::StopRetrying)),
        )
    }

    /// Never reconnects: the first drop is final.
    pub fn never() -> Self {
        Self::new([RetryStep::StopRetrying])
    }

    /// Adds up to `max` of random delay to every wait, so that many
    /// clients dropped at once do not reconnect in lockstep.
    #[must_use]
    pub fn with_jitter(mut self, max: Duration) -> Self {
        self.jitter = max;
        self
    }

    /// The schedule, in order.
    pub fn steps(&self) -> &[RetryStep] {
        &self.steps
    }

    /// The configured jitter bound.
    pub fn jitter(&self) -> Duration {
        self.jitter
    }

    /// Number of reconnect attempts made before giving up.
    pub fn max_attempts(&self) -> u32 {
        let waits = self
            .steps
            .iter()
            .take_while(|step| matches!(step, RetryStep::Wait(_)))
            .count();
        u32::try_from(waits).unwrap_or(u32::MAX)
    }

    /// Drops steps after the first `StopRetrying` and terminates an open
    /// schedule, so that `steps()` shows exactly what will happen.
    pub fn validated(mut self) -> Self {
        if let Some(stop) = self
            .steps
            .iter()
            .position(|step| *step == RetryStep::StopRetrying)
        {
            if stop + 1 < self.steps.len() {
                warn!(
                    ignored = self.steps.len() - stop - 1,
                    "retry steps after StopRetrying are never used — dropping"
                );
                self.steps.truncate(stop + 1);
            }
        } else {
            self.steps.push(RetryStep::StopRetrying);
        }
        self
    }

    /// Starts walking the schedule from the first step.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            index: 0,
        }
    }
}

/// A position in a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    index: usize,
}

impl Backoff {
    /// The delay before the next attempt, or `None` once the schedule is
    /// used up. Advances the position.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let step = self
            .policy
            .steps
            .get(self.index)
            .copied()
            .unwrap_or(RetryStep::StopRetrying);

        match step {
            RetryStep::Wait(delay) => {
                self.index += 1;
                Some(delay + self.jitter())
            }
            RetryStep::StopRetrying => None,
        }
    }

    /// Rewinds to the first step after a successful reconnect.
    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// Attempts handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        u32::try_from(self.index).unwrap_or(u32::MAX)
    }

    fn jitter(&self) -> Duration {
        let max = self.policy.jitter;
        if max.is_zero() {
            return Duration::ZERO;
        }
        let us = rand::rng().random_range(0..=max.as_micros().min(u64::MAX as u128) as u64);
        Duration::from_micros(us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_default_schedule_walks_then_stops() {
        let mut backoff = RetryPolicy::default().backoff();
        assert_eq!(backoff.next_delay(), Some(secs(5)));
        assert_eq!(backoff.next_delay(), Some(secs(15)));
        assert_eq!(backoff.next_delay(), Some(secs(45)));
        assert_eq!(backoff.next_delay(), Some(secs(90)));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 4);
    }

    #[test]
    fn test_reset_rewinds_to_first_step() {
        let mut backoff = RetryPolicy::default().backoff();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(secs(5)));
    }

    #[test]
    fn test_open_schedule_stops_at_end() {
        let mut backoff = RetryPolicy::new([RetryStep::Wait(secs(1))]).backoff();
        assert_eq!(backoff.next_delay(), Some(secs(1)));
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_never_policy_gives_up_immediately() {
        let mut backoff = RetryPolicy::never().backoff();
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(RetryPolicy::never().max_attempts(), 0);
    }

    #[test]
    fn test_validated_truncates_after_stop() {
        let policy = RetryPolicy::new([
            RetryStep::Wait(secs(1)),
            RetryStep::StopRetrying,
            RetryStep::Wait(secs(2)),
        ])
        .validated();
        assert_eq!(
            policy.steps(),
            &[RetryStep::Wait(secs(1)), RetryStep::StopRetrying]
        );
    }

    #[test]
    fn test_validated_terminates_open_schedule() {
        let policy = RetryPolicy::new([RetryStep::Wait(secs(1))]).validated();
        assert_eq!(policy.steps().last(), Some(&RetryStep::StopRetrying));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let mut backoff = RetryPolicy::from_delays([secs(1); 50])
            .with_jitter(Duration::from_millis(250))
            .backoff();
        while let Some(delay) = backoff.next_delay() {
            assert!(delay >= secs(1));
            assert!(delay <= secs(1) + Duration::from_millis(250));
        }
    }
}

//! Heartbeat interval tracking and reconnect policy.
//!
//! [`IntervalTracker`] holds the read deadline for the next Marco.
//! [`RetryState`] decides how long to wait before re-establishing a failed
//! session, and when to stop trying altogether.

use std::fmt;
use std::time::Duration;

/// Interval, in seconds, every fresh heartbeat channel starts with.
pub const INITIAL_INTERVAL_SECS: u64 = 5;

/// Lifecycle of one heartbeat attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatPhase {
    /// Establishing the session and opening the heartbeat channel.
    Connecting,
    /// Exchanging Marco/Polo round trips.
    Alive,
    /// Channel released; a reconnect follows unless the breaker is open.
    Failed,
}

impl fmt::Display for HeartbeatPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Alive => "alive",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The current heartbeat interval of one channel.
///
/// ```rust
/// use sideload_core::IntervalTracker;
///
/// let mut tracker = IntervalTracker::new();
/// assert_eq!(tracker.current(), 5);
/// tracker.record(10);
/// assert_eq!(tracker.current(), 11);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalTracker {
    current: u64,
}

impl IntervalTracker {
    pub fn new() -> Self {
        Self {
            current: INITIAL_INTERVAL_SECS,
        }
    }

    /// Seconds to wait for the next challenge.
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Records the interval announced by the device; the next wait is one
    /// second longer than announced.
    pub fn record(&mut self, announced: u64) {
        self.current = announced.saturating_add(1);
    }

    /// The current interval as a read deadline.
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.current)
    }
}

impl Default for IntervalTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ── Retry policy ──────────────────────────────────────────────────────────────

/// Exponential backoff with a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Failures in a row after which no further attempt is made.
    pub max_consecutive_failures: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_consecutive_failures: 10,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th consecutive failure (0-indexed): the
    /// initial backoff doubled `attempt` times, capped at `max_backoff`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// What to do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then reconnect.
    RetryAfter(Duration),
    /// The breaker is open.
    GiveUp,
}

/// Failure bookkeeping for one heartbeat loop.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    consecutive_failures: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
        }
    }

    /// Counts a failure and returns the next step.
    pub fn record_failure(&mut self) -> RetryDecision {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.policy.max_consecutive_failures {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(
            self.policy
                .backoff_for_attempt(self.consecutive_failures - 1),
        )
    }

    /// A completed round trip clears the failure streak.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── IntervalTracker ───────────────────────────────────────────────────────

    #[test]
    fn test_tracker_starts_at_initial_interval() {
        assert_eq!(IntervalTracker::new().current(), INITIAL_INTERVAL_SECS);
    }

    #[test]
    fn test_tracker_next_wait_is_announced_plus_one() {
        // Arrange
        let mut tracker = IntervalTracker::new();

        // Act
        tracker.record(10);
        let after_first = tracker.current();
        tracker.record(2);

        // Assert
        assert_eq!(after_first, 11);
        assert_eq!(tracker.current(), 3);
        assert_eq!(tracker.deadline(), Duration::from_secs(3));
    }

    #[test]
    fn test_tracker_saturates_instead_of_overflowing() {
        let mut tracker = IntervalTracker::new();
        tracker.record(u64::MAX);
        assert_eq!(tracker.current(), u64::MAX);
    }

    // ── RetryPolicy ───────────────────────────────────────────────────────────

    #[test]
    fn test_backoff_doubles_then_caps() {
        // Arrange
        let policy = RetryPolicy::default();

        // Act
        let delays: Vec<u64> = (0..8)
            .map(|n| policy.backoff_for_attempt(n).as_secs())
            .collect();

        // Assert
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_backoff_large_attempt_does_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for_attempt(200), Duration::from_secs(60));
    }

    // ── RetryState ────────────────────────────────────────────────────────────

    #[test]
    fn test_circuit_opens_after_configured_failures() {
        // Arrange
        let mut state = RetryState::new(RetryPolicy {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            max_consecutive_failures: 3,
        });

        // Act
        let first = state.record_failure();
        let second = state.record_failure();
        let third = state.record_failure();

        // Assert
        assert_eq!(first, RetryDecision::RetryAfter(Duration::from_millis(10)));
        assert_eq!(second, RetryDecision::RetryAfter(Duration::from_millis(20)));
        assert_eq!(third, RetryDecision::GiveUp);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        // Arrange
        let mut state = RetryState::new(RetryPolicy::default());
        state.record_failure();
        state.record_failure();

        // Act
        state.record_success();

        // Assert
        assert_eq!(state.consecutive_failures(), 0);
        assert_eq!(
            state.record_failure(),
            RetryDecision::RetryAfter(Duration::from_secs(1))
        );
    }
}

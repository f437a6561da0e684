//! Reconnection backoff schedule.

use lobview_core::ReconnectPolicy;
use std::time::Duration;

/// Tracks reconnection attempts against a [`ReconnectPolicy`].
///
/// `next_delay` returns `None` once the policy says to stop: reconnection
/// disabled, or `max_attempts` (> 0) exhausted. The counter resets when a
/// connection is successfully re-established.
#[derive(Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Replace the policy (config update mid-life). The attempt counter is
    /// kept so a patched policy cannot restart an exhausted schedule.
    pub fn set_policy(&mut self, policy: ReconnectPolicy) {
        self.policy = policy;
    }

    /// Delay before the next reconnection attempt, or `None` when no
    /// further attempt should be scheduled.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.policy.enabled {
            return None;
        }
        self.attempt += 1;
        if self.policy.max_attempts > 0 && self.attempt > self.policy.max_attempts {
            return None;
        }
        Some(self.policy.delay_for_attempt(self.attempt))
    }

    /// Attempts consumed so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reset the counter after reaching `Connected`.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, initial_ms: u64, multiplier: f64) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            max_attempts,
            initial_delay_ms: initial_ms,
            backoff_multiplier: multiplier,
        }
    }

    #[test]
    fn test_geometric_schedule() {
        let mut backoff = Backoff::new(policy(0, 1000, 1.5));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1500)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(2250)));
    }

    #[test]
    fn test_exhaustion() {
        let mut backoff = Backoff::new(policy(2, 10, 1.0));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut backoff = Backoff::new(policy(1, 10, 1.0));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        backoff.reset();
        assert!(backoff.next_delay().is_some());
    }

    #[test]
    fn test_disabled_policy() {
        let mut backoff = Backoff::new(ReconnectPolicy {
            enabled: false,
            ..ReconnectPolicy::default()
        });
        assert_eq!(backoff.next_delay(), None);
    }
}

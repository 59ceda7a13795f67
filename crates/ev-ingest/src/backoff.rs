//! Reconnection policy.
//!
//! Exponential backoff with jitter plus a consecutive-failure circuit
//! breaker. When the breaker trips the acquirer abandons the subscription
//! and the coordinator falls back to polling; ingestion never silently
//! stops.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a consecutive-failure cap
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    max_consecutive_errors: u32,
    consecutive_errors: u32,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn new(base: Duration, max: Duration, max_consecutive_errors: u32) -> Self {
        Self {
            base,
            max,
            max_consecutive_errors,
            consecutive_errors: 0,
        }
    }

    /// Pre-jitter delay for the given attempt: `min(base * 2^attempt, max)`
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max)
    }

    /// Record a failed attempt.
    ///
    /// Returns the jittered delay before the next attempt, or `None` once
    /// `max_consecutive_errors` failures have occurred in a row (the
    /// abandonment condition).
    pub fn record_failure(&mut self) -> Option<Duration> {
        let attempt = self.consecutive_errors;
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.max_consecutive_errors {
            return None;
        }
        Some(Self::jitter(self.delay_for(attempt)))
    }

    /// Reset the breaker on a successful Ready transition.
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    #[must_use]
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Uniform jitter up to 25% on top of the base delay
    fn jitter(delay: Duration) -> Duration {
        let extra_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
        delay + Duration::from_millis(extra_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_jitter_sequence_doubles_and_caps() {
        let policy = ReconnectPolicy::new(
            Duration::from_secs(5),
            Duration::from_secs(300),
            u32::MAX,
        );
        let delays: Vec<u64> = (0..8).map(|a| policy.delay_for(a).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 300, 300]);
    }

    #[test]
    fn success_resets_the_sequence() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_secs(5), Duration::from_secs(300), 100);
        for _ in 0..4 {
            policy.record_failure();
        }
        assert_eq!(policy.consecutive_errors(), 4);

        policy.record_success();
        assert_eq!(policy.consecutive_errors(), 0);
        // Next failure starts back at the base delay (plus jitter < 25%)
        let delay = policy.record_failure().unwrap();
        assert!(delay >= Duration::from_secs(5));
        assert!(delay < Duration::from_millis(6250));
    }

    #[test]
    fn abandons_after_max_consecutive_errors() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_secs(5), Duration::from_secs(300), 3);
        assert!(policy.record_failure().is_some());
        assert!(policy.record_failure().is_some());
        assert!(policy.record_failure().is_none());
    }

    #[test]
    fn jitter_stays_within_a_quarter_of_the_delay() {
        for _ in 0..100 {
            let jittered = ReconnectPolicy::jitter(Duration::from_secs(40));
            assert!(jittered >= Duration::from_secs(40));
            assert!(jittered <= Duration::from_secs(50));
        }
    }
}

use rand::Rng;
use std::time::Duration;

/// Bounded exponential backoff. The pre-jitter envelope doubles every
/// attempt and is strictly increasing; jitter keeps the actual delay in
/// the upper half of the envelope, capped at `max_delay`.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Pre-jitter delay before attempt `attempt + 1`, so
    /// `delay_for_attempt(1)` is the wait after the first failure.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base_ms = self.base.as_millis() as u64;
        let pow = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(base_ms.saturating_mul(pow).max(1))
    }

    /// Actual wait: uniform over the upper half of the envelope, capped.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let envelope = self.delay_for_attempt(attempt);
        if envelope.is_zero() {
            return Duration::ZERO;
        }
        let envelope_ms = envelope.as_millis() as u64;
        let half = envelope_ms / 2;
        let jitter = rand::thread_rng().gen_range(0..=half.max(1));
        let delay = half.saturating_add(jitter);
        Duration::from_millis(delay.min(self.max_delay.as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_attempt_has_no_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn envelope_is_strictly_increasing() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=10 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay > previous, "attempt {attempt} did not grow");
            previous = delay;
        }
    }

    #[test]
    fn envelope_doubles() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(60), 3);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_within_envelope_and_cap() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_millis(250), 5);
        for attempt in 1..=5 {
            let envelope = policy.delay_for_attempt(attempt);
            for _ in 0..50 {
                let actual = policy.jittered_delay(attempt);
                assert!(actual <= envelope.min(policy.max_delay) + Duration::from_millis(1));
                assert!(actual <= policy.max_delay);
            }
        }
    }

    #[test]
    fn attempt_ceiling_is_at_least_one() {
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(10), 0);
        assert_eq!(policy.max_attempts, 1);
    }
}

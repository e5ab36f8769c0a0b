//! Retry policy: backoff and dead-letter decisions for failed jobs.

use crate::config::RetryConfig;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Source of pseudo-random values for backoff jitter.
///
/// Injectable so tests can seed it and assert exact delays.
pub trait JitterSource: Send + Sync {
    /// Returns the next raw pseudo-random value.
    fn next(&self) -> u64;
}

/// Seedable jitter source backed by a simple LCG.
pub struct SeededJitter {
    state: AtomicU64,
}

// LCG parameters (Knuth MMIX).
const LCG_A: u64 = 6364136223846793005;
const LCG_C: u64 = 1442695040888963407;

impl SeededJitter {
    /// Creates a jitter source with a fixed seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: AtomicU64::new(seed),
        }
    }

    /// Creates a jitter source seeded from the wall clock.
    #[must_use]
    pub fn from_time() -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Self::new(seed)
    }
}

impl JitterSource for SeededJitter {
    fn next(&self) -> u64 {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            let next = current.wrapping_mul(LCG_A).wrapping_add(LCG_C);
            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Jitter source that always lands on the midpoint, i.e. no jitter.
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn next(&self) -> u64 {
        0
    }
}

/// Exponential backoff policy with a cap and symmetric jitter.
///
/// Delays follow `min(base * 2^(attempt-1), max)`, spread over
/// `±jitter_factor` of the computed delay. The decisions are pure in
/// their inputs apart from the injected jitter source.
#[derive(Clone)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    jitter: Arc<dyn JitterSource>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("jitter_factor", &self.jitter_factor)
            .finish()
    }
}

impl RetryPolicy {
    /// Creates a policy from configuration, seeding jitter from the clock.
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self::with_jitter(config, Arc::new(SeededJitter::from_time()))
    }

    /// Creates a policy with an explicit jitter source.
    #[must_use]
    pub fn with_jitter(config: &RetryConfig, jitter: Arc<dyn JitterSource>) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms.max(1),
            max_delay_ms: config.max_delay_ms.max(config.base_delay_ms.max(1)),
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
            jitter,
        }
    }

    /// Disables jitter, for exact assertions.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Computes the capped backoff delay for a claim attempt, before
    /// jitter. `attempt` is the claim count of the lease that failed,
    /// so the first retry (attempt 1) waits the base delay.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(63);
        // Widen before shifting; 2^63 times a u64 base overflows u64.
        let delay = (u128::from(self.base_delay_ms) << exp).min(u128::from(self.max_delay_ms));
        Duration::from_millis(delay as u64)
    }

    /// Computes the instant a failed attempt becomes claimable again.
    ///
    /// The result is `now + delay ± jitter` and never earlier than `now`,
    /// so `run_at` stays monotonic across retries of the same job.
    #[must_use]
    pub fn next_run_at(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = self.delay_for_attempt(attempt).as_millis() as u64;
        let jittered = self.apply_jitter(delay);
        now + ChronoDuration::milliseconds(jittered as i64)
    }

    /// Returns true when a job that has used `attempt` claims out of a
    /// budget of `max_attempts` must be dead-lettered instead of retried.
    #[must_use]
    pub fn should_deadletter(&self, attempt: u32, max_attempts: u32) -> bool {
        attempt >= max_attempts
    }

    fn apply_jitter(&self, delay_ms: u64) -> u64 {
        if self.jitter_factor <= 0.0 || delay_ms == 0 {
            return delay_ms;
        }
        let half_span = (delay_ms as f64 * self.jitter_factor) as u64;
        if half_span == 0 {
            return delay_ms;
        }
        let offset = self.jitter.next() % (half_span * 2 + 1);
        delay_ms.saturating_add(offset).saturating_sub(half_span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: u64, max: u64, jitter: f64) -> RetryConfig {
        RetryConfig {
            max_attempts: 10,
            base_delay_ms: base,
            max_delay_ms: max,
            jitter_factor: jitter,
        }
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(&config(1_000, 30_000, 0.0));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(16_000));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::new(&config(1_000, 30_000, 0.0));

        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for_attempt(63), Duration::from_millis(30_000));
        // Shift overflow territory must not wrap around.
        assert_eq!(policy.delay_for_attempt(200), Duration::from_millis(30_000));
    }

    #[test]
    fn test_delay_monotonic_in_attempt() {
        let policy = RetryPolicy::new(&config(500, 20_000, 0.0));
        let mut previous = Duration::ZERO;
        for attempt in 1..=20 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= previous, "attempt {} went backwards", attempt);
            previous = delay;
        }
    }

    #[test]
    fn test_next_run_at_without_jitter() {
        let policy = RetryPolicy::new(&config(1_000, 30_000, 0.2)).without_jitter();
        let now = Utc::now();

        assert_eq!(policy.next_run_at(1, now), now + ChronoDuration::seconds(1));
        assert_eq!(policy.next_run_at(10, now), now + ChronoDuration::seconds(30));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::with_jitter(
            &config(1_000, 30_000, 0.2),
            Arc::new(SeededJitter::new(42)),
        );
        let now = Utc::now();

        for attempt in 1..=10 {
            let exact = policy.delay_for_attempt(attempt).as_millis() as i64;
            let low = now + ChronoDuration::milliseconds(exact - exact / 5 - 1);
            let high = now + ChronoDuration::milliseconds(exact + exact / 5 + 1);
            let next = policy.next_run_at(attempt, now);
            assert!(next >= low && next <= high, "attempt {} out of band", attempt);
            assert!(next >= now);
        }
    }

    #[test]
    fn test_seeded_jitter_is_deterministic() {
        let a = SeededJitter::new(7);
        let b = SeededJitter::new(7);
        for _ in 0..5 {
            assert_eq!(a.next(), b.next());
        }
    }

    #[test]
    fn test_should_deadletter() {
        let policy = RetryPolicy::new(&config(1_000, 30_000, 0.0));
        assert!(!policy.should_deadletter(1, 3));
        assert!(!policy.should_deadletter(2, 3));
        assert!(policy.should_deadletter(3, 3));
        assert!(policy.should_deadletter(4, 3));
    }
}

//! Exponential backoff with jitter.
//!
//! Delays grow geometrically from `initial` up to `max`, with up to `jitter`
//! (a fraction of the current delay) added to spread reconnect storms. Two
//! guarantees hold for any RNG output:
//!
//! - No delay exceeds `max`.
//! - Delays never decrease between resets, so jitter cannot produce a
//!   shorter wait than the previous attempt.

use std::time::Duration;

use crate::env::Environment;

/// First reconnect delay.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Upper bound on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Backoff tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Cap on any single delay.
    pub max: Duration,
    /// Growth factor per attempt.
    pub multiplier: u32,
    /// Maximum jitter as a fraction of the un-jittered delay (0.0 - 1.0).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL_DELAY,
            max: DEFAULT_MAX_DELAY,
            multiplier: 2,
            jitter: 0.25,
        }
    }
}

/// Backoff calculator.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    last: Duration,
}

impl Backoff {
    /// Create a calculator at attempt zero.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0, last: Duration::ZERO }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Compute the next delay, drawing jitter from `env`.
    pub fn next_delay<E: Environment>(&mut self, env: &E) -> Duration {
        let growth = self.config.multiplier.max(1).saturating_pow(self.attempt);
        let base = self.config.initial.saturating_mul(growth).min(self.config.max);

        let span_ms = (base.as_millis() as f64 * self.config.jitter.clamp(0.0, 1.0)) as u64;
        let jitter = if span_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(env.random_u64() % (span_ms + 1))
        };

        let delay = base.saturating_add(jitter).min(self.config.max).max(self.last);

        self.last = delay;
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Start over from `initial` (after a successful connection).
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    };

    use super::*;

    /// Environment whose RNG walks a fixed sequence.
    #[derive(Clone)]
    struct SeqEnv(Arc<AtomicU64>, Vec<u64>);

    impl Environment for SeqEnv {
        type Instant = std::time::Instant;

        #[allow(clippy::disallowed_methods)]
        fn now(&self) -> Self::Instant {
            std::time::Instant::now()
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            let i = self.0.fetch_add(1, Ordering::Relaxed) as usize;
            let value = self.1[i % self.1.len()];
            buffer.copy_from_slice(&value.to_be_bytes()[..buffer.len()]);
        }

        fn wall_clock_millis(&self) -> u64 {
            0
        }
    }

    fn env(values: Vec<u64>) -> SeqEnv {
        SeqEnv(Arc::new(AtomicU64::new(0)), values)
    }

    #[test]
    fn grows_geometrically_without_jitter() {
        let config = BackoffConfig { jitter: 0.0, ..BackoffConfig::default() };
        let mut backoff = Backoff::new(config);
        let env = env(vec![0]);

        assert_eq!(backoff.next_delay(&env), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(&env), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(&env), Duration::from_millis(2000));
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn capped_at_max() {
        let config = BackoffConfig { max: Duration::from_secs(3), ..BackoffConfig::default() };
        let mut backoff = Backoff::new(config);
        let env = env(vec![u64::MAX]);

        for _ in 0..40 {
            assert!(backoff.next_delay(&env) <= Duration::from_secs(3));
        }
    }

    #[test]
    fn large_jitter_then_small_jitter_never_decreases() {
        // Max jitter on attempt 0 (500 + 125), none on attempt 1 (1000).
        // Then max jitter at the cap followed by none: stays at the cap.
        let config = BackoffConfig { max: Duration::from_millis(1100), ..BackoffConfig::default() };
        let mut backoff = Backoff::new(config);
        let env = env(vec![125, 0, 275, 0]);

        let d0 = backoff.next_delay(&env);
        let d1 = backoff.next_delay(&env);
        let d2 = backoff.next_delay(&env);
        let d3 = backoff.next_delay(&env);

        assert_eq!(d0, Duration::from_millis(625));
        assert_eq!(d1, Duration::from_millis(1000));
        assert_eq!(d2, Duration::from_millis(1100));
        assert_eq!(d3, Duration::from_millis(1100));
    }

    #[test]
    fn reset_starts_over() {
        let config = BackoffConfig { jitter: 0.0, ..BackoffConfig::default() };
        let mut backoff = Backoff::new(config);
        let env = env(vec![0]);

        backoff.next_delay(&env);
        backoff.next_delay(&env);
        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(&env), Duration::from_millis(500));
    }
}

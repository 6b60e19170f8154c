//! Time and randomness, injected.
//!
//! Every state machine in the chat layer reads the clock and draws random
//! numbers through [`Environment`], so a simulation can run reconnect storms
//! and ack timeouts on a virtual clock with a seeded RNG while production
//! uses the system clock and OS entropy.

use std::{
    ops::{Add, Sub},
    time::Duration,
};

/// Clock and entropy source for the chat state machines.
///
/// `now()` must be monotonic. Failures are only expected from a broken host
/// (entropy exhaustion) or a misconfigured simulation.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic instant: `std::time::Instant` in production, a virtual
    /// instant in simulation.
    type Instant: Copy
        + Ord
        + Send
        + Sync
        + std::fmt::Debug
        + Sub<Output = Duration>
        + Add<Duration, Output = Self::Instant>;

    /// Monotonic now, used for deadlines (backoff, heartbeat, ack timeouts).
    fn now(&self) -> Self::Instant;

    /// Wait for `duration`. Drivers only; state machines work with deadlines.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes, reproducible for a given seed.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Wall-clock time in unix milliseconds, used to stamp optimistic sends.
    fn wall_clock_millis(&self) -> u64;

    /// Random `u64` for backoff jitter and temporary message ids.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

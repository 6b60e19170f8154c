//! Manually advanced environment for unit tests.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use showroom_core::Environment;

/// Virtual clock over a fixed base instant, counter-based RNG.
#[derive(Clone)]
pub(crate) struct TestEnv {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
    counter: Arc<AtomicU64>,
}

impl TestEnv {
    #[allow(clippy::disallowed_methods)]
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
            counter: Arc::new(AtomicU64::new(1)),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Environment for TestEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        let value = self.counter.fetch_add(1, Ordering::Relaxed).to_be_bytes();
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = value[i % value.len()];
        }
    }

    fn wall_clock_millis(&self) -> u64 {
        1_700_000_000_000 + self.offset.lock().unwrap().as_millis() as u64
    }
}

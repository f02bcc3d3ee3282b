use std::time::{Duration, Instant};

/// Monotonic time source and sleep, injected so the loop can run on a fake
/// clock in tests.
pub trait Clock {
    /// Milliseconds since the clock was created
    fn now_ms(&self) -> u64;

    fn sleep_ms(&mut self, ms: u64);
}

pub struct SystemClock {
    boot: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }

    fn sleep_ms(&mut self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

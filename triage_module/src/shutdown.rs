//! Cooperative cancellation flag with an interruptible sleep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Process-wide cancellation flag shared by intake and workers.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    stop: Arc<AtomicBool>,
}

const SLEEP_SLICE: Duration = Duration::from_millis(25);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Sleep for `duration` unless cancelled first. Returns `false` when the
    /// sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

//! Time sources for pause timestamps

use rtmem_api::sync::{AtomicU64, Ordering};
use rtmem_api::{Clock, Nanoseconds};

/// Clock driven by explicit advances, optionally stepping on every read
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
    step: u64,
}

impl ManualClock {
    /// Creates a clock frozen at `start`
    pub const fn new(start: Nanoseconds) -> Self {
        Self {
            now: AtomicU64::new(start),
            step: 0,
        }
    }

    /// Creates a clock that advances by `step` after every read
    pub const fn ticking(start: Nanoseconds, step: Nanoseconds) -> Self {
        Self {
            now: AtomicU64::new(start),
            step,
        }
    }

    /// Moves the clock forward
    pub fn advance(&self, delta: Nanoseconds) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }

    /// Sets the current reading
    pub fn set(&self, now: Nanoseconds) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> Nanoseconds {
        self.now.fetch_add(self.step, Ordering::SeqCst)
    }
}

/// Wall clock in nanoseconds since the Unix epoch
#[cfg(feature = "std")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now_ns(&self) -> Nanoseconds {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

/// Clock used when none is supplied
#[cfg(feature = "std")]
pub fn default_clock() -> alloc::boxed::Box<dyn Clock> {
    alloc::boxed::Box::new(SystemClock)
}

/// Clock used when none is supplied
#[cfg(not(feature = "std"))]
pub fn default_clock() -> alloc::boxed::Box<dyn Clock> {
    alloc::boxed::Box::new(ManualClock::ticking(1_000, 1_000))
}

//! Time adapters.
//!
//! Provides the monotonic microsecond [`Clock`] the scheduler and the FSM
//! engine run on.
//!
//! - [`MonotonicClock`] wraps `embassy_time::Instant`, the same time base
//!   the event loop uses for its bounded queue waits.
//! - [`ManualClock`] only moves when told to; tests use it to place timer
//!   firings at exact microseconds.

use core::cell::Cell;
use std::rc::Rc;

use embassy_time::Instant;

use crate::scheduler::Clock;

/// Monotonic clock backed by the embassy time driver.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Seconds since this clock was created.
    pub fn uptime_secs(&self) -> u64 {
        self.now_micros() / 1_000_000
    }
}

impl Clock for MonotonicClock {
    fn now_micros(&self) -> u64 {
        Instant::now().duration_since(self.origin).as_micros()
    }
}

/// Hand-driven clock.  Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_micros(&self, us: u64) {
        self.now.set(self.now.get() + us);
    }

    pub fn advance_millis(&self, ms: u64) {
        self.advance_micros(ms * 1_000);
    }

    pub fn set_micros(&self, us: u64) {
        self.now.set(us);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u64 {
        self.now.get()
    }
}

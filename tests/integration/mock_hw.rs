//! Mock hardware adapters for integration tests.
//!
//! Records every driver call so tests can assert on the full command
//! history without touching a real modem, PMIC or GPIO.  Handles are
//! cheap clones sharing one record, so a test keeps one copy while the
//! machine owns the other.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use embedded_hal::digital::{ErrorKind, ErrorType, OutputPin};
use reactor_core::adapters::time::ManualClock;
use reactor_core::app::ports::{ModemError, ModemPort, PowerRail};
use reactor_core::config::LoopConfig;
use reactor_core::EventLoop;

/// Loop on a hand-driven clock.  The clock handle advances its time.
pub fn manual_loop() -> (EventLoop, ManualClock) {
    let clock = ManualClock::new();
    let lp = EventLoop::with_clock(LoopConfig::default(), clock.clone())
        .expect("default config is valid");
    (lp, clock)
}

/// Pull everything currently queued, timers included.
pub fn settle(lp: &EventLoop) {
    while lp.run_once(0).did_work() {}
}

// ── MockModem ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemCall {
    Chunk(Vec<u8>),
    Abort,
}

#[derive(Clone, Default)]
pub struct MockModem {
    pub calls: Rc<RefCell<Vec<ModemCall>>>,
    pub refuse: Rc<Cell<Option<ModemError>>>,
}

#[allow(dead_code)]
impl MockModem {
    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                ModemCall::Chunk(data) => Some(data.clone()),
                ModemCall::Abort => None,
            })
            .collect()
    }

    pub fn aborts(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| **c == ModemCall::Abort)
            .count()
    }
}

impl ModemPort for MockModem {
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), ModemError> {
        if let Some(e) = self.refuse.get() {
            return Err(e);
        }
        self.calls.borrow_mut().push(ModemCall::Chunk(chunk.to_vec()));
        Ok(())
    }

    fn abort(&mut self) {
        self.calls.borrow_mut().push(ModemCall::Abort);
    }
}

// ── MockRail ──────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MockRail {
    pub history: Rc<RefCell<Vec<bool>>>,
    pub good_when_enabled: Rc<Cell<bool>>,
}

#[allow(dead_code)]
impl MockRail {
    pub fn is_on(&self) -> bool {
        self.history.borrow().last().copied().unwrap_or(false)
    }
}

impl PowerRail for MockRail {
    fn set_enabled(&mut self, on: bool) {
        self.history.borrow_mut().push(on);
    }

    fn is_good(&self) -> bool {
        self.is_on() && self.good_when_enabled.get()
    }
}

// ── MockPin ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinStuck;

impl embedded_hal::digital::Error for PinStuck {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Load-enable line.  With `stuck` set every write fails.
#[derive(Clone, Default)]
pub struct MockPin {
    pub high: Rc<Cell<bool>>,
    pub stuck: Rc<Cell<bool>>,
}

impl ErrorType for MockPin {
    type Error = PinStuck;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), PinStuck> {
        if self.stuck.get() {
            return Err(PinStuck);
        }
        self.high.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), PinStuck> {
        if self.stuck.get() {
            return Err(PinStuck);
        }
        self.high.set(true);
        Ok(())
    }
}

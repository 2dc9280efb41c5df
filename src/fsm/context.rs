//! Handler-side view of a running machine.
//!
//! A [`Controls`] is passed into every [`Behavior::handle`] call.  It is
//! the only way a handler touches its own machine: arming the per-state
//! timeout and deferring inputs.  Every method borrows engine state only
//! for its own duration, so handlers may call them in any order.

use super::{Behavior, Machine};
use crate::error::Result;

pub struct Controls<'a, B: Behavior> {
    machine: &'a Machine<B>,
}

impl<'a, B: Behavior> Controls<'a, B> {
    pub(super) fn new(machine: &'a Machine<B>) -> Self {
        Self { machine }
    }

    /// (Re)arm the timeout of the current state.  Delivers
    /// [`Input::Timeout`](super::Input::Timeout) unless the machine leaves
    /// the state first.
    pub fn set_state_timeout(&self, millis: u32) {
        self.machine.set_state_timeout(millis);
    }

    pub fn clear_state_timeout(&self) {
        self.machine.clear_state_timeout();
    }

    /// Deliver `input` once after `delay_ms`, whatever the state is then.
    /// A zero delay still goes through the scheduler, so the input never
    /// runs on the caller's stack.
    pub fn queue_input(&self, input: B::Input, delay_ms: u32) {
        self.machine.queue_input(input, delay_ms);
    }

    /// Deliver `input` once, the next time the machine settles in `state`.
    pub fn queue_input_for_state(&self, input: B::Input, state: B::State) -> Result<()> {
        self.machine.queue_input_for_state(input, state)
    }

    pub fn millis_in_state(&self) -> u64 {
        self.machine.millis_in_state()
    }

    /// Remaining millis of the armed state timeout.
    pub fn timeout_remaining(&self) -> Option<u64> {
        self.machine.timeout_remaining()
    }

    /// Machine name, for handler log lines.
    pub fn name(&self) -> &'static str {
        self.machine.name()
    }

    pub fn now_micros(&self) -> u64 {
        self.machine.scheduler().now_micros()
    }
}

//! Runtime diagnostics for the reactor core.
//!
//! Counters of the event loop and one-line status strings for the loop
//! and its machines, as printed by the `status` command.  Lines are
//! fixed-capacity `heapless::String`s so status reporting never
//! allocates; an over-long line is truncated.

use core::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::fsm::MachineStatus;

/// Capacity of one status line.
pub const STATUS_LINE_LEN: usize = 128;

pub type StatusLine = heapless::String<STATUS_LINE_LEN>;

/// Event loop counters, collected on demand by `EventLoop::stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStats {
    /// Envelopes accepted into the queue.
    pub posted: u64,
    /// Envelopes rejected because the queue stayed full.
    pub rejected: u64,
    pub dispatched: u64,
    /// Dispatched envelopes no handler accepted.
    pub unprocessed: u64,
    pub timer_runs: u64,
    /// Queue depth right now.
    pub pending: usize,
    pub armed_timers: usize,
}

impl LoopStats {
    /// `loop: posted=.. rejected=.. dispatched=.. unprocessed=.. timers=.. pending=..`
    pub fn status_line(&self) -> StatusLine {
        let mut s = StatusLine::new();
        let _ = write!(
            s,
            "loop: posted={} rejected={} dispatched={} unprocessed={} timers={} pending={}",
            self.posted,
            self.rejected,
            self.dispatched,
            self.unprocessed,
            self.timer_runs,
            self.pending
        );
        s
    }
}

/// `name: STATE 120ms [timeout 80ms] [pending=1] [queued=2] [HALTED]`
pub fn machine_line(status: &MachineStatus) -> StatusLine {
    let mut s = StatusLine::new();
    let _ = write!(
        s,
        "{}: {} {}ms",
        status.name, status.state, status.millis_in_state
    );
    if let Some(ms) = status.timeout_remaining_ms {
        let _ = write!(s, " timeout {}ms", ms);
    }
    if status.pending_for_state > 0 {
        let _ = write!(s, " pending={}", status.pending_for_state);
    }
    if status.queued > 0 {
        let _ = write!(s, " queued={}", status.queued);
    }
    if status.halted {
        let _ = s.push_str(" HALTED");
    }
    s
}

//! Cooperative timer scheduler.
//!
//! A due-time-ordered set of one-shot and periodic tasks with microsecond
//! resolution.  Nothing fires on its own: the event loop calls
//! [`Scheduler::execute_due_tasks`] once per `run_once` and sizes its
//! queue wait with [`Scheduler::micros_until_next_due`].
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Timer handles (owned by subsystems / machines)              │
//! │                                                              │
//! │  ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌──────────┐   │
//! │  │ State     │  │ Queued    │  │ LED       │  │ Modem    │   │
//! │  │ timeout   │  │ input     │  │ interval  │  │ poll     │   │
//! │  └─────┬─────┘  └─────┬─────┘  └─────┬─────┘  └─────┬────┘   │
//! │        ▼              ▼              ▼              ▼        │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │      BTreeMap<(due_us, seq), Weak<TaskSlot>>           │  │
//! │  └───────────────────────┬────────────────────────────────┘  │
//! │                          ▼                                   │
//! │                EventLoop::run_once (owner thread)            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callbacks run on the owner thread with no scheduler borrow held, so a
//! callback may freely arm, re-arm or cancel any timer, its own included.

use core::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use log::trace;

// ═══════════════════════════════════════════════════════════════
//  Clock port
// ═══════════════════════════════════════════════════════════════

/// Monotonic microsecond time source.
pub trait Clock {
    fn now_micros(&self) -> u64;
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler
// ═══════════════════════════════════════════════════════════════

type TaskKey = (u64, u64);
type Callback = Box<dyn FnMut()>;

struct SchedulerInner {
    clock: Box<dyn Clock>,
    queue: RefCell<BTreeMap<TaskKey, Weak<TaskSlot>>>,
    next_seq: Cell<u64>,
    runs: Cell<u64>,
}

/// Owner-thread handle to the task set.  Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                clock: Box::new(clock),
                queue: RefCell::new(BTreeMap::new()),
                next_seq: Cell::new(0),
                runs: Cell::new(0),
            }),
        }
    }

    pub fn now_micros(&self) -> u64 {
        self.inner.clock.now_micros()
    }

    /// Run every task that is due now.  Returns `true` if any ran.
    ///
    /// Tasks armed while this pass is running (including periodic
    /// re-arms) wait for the next pass, so a zero-period interval cannot
    /// spin the loop.
    pub fn execute_due_tasks(&self) -> bool {
        let now = self.now_micros();
        let horizon = self.inner.next_seq.get();
        let mut did_any = false;

        loop {
            let next = {
                let queue = self.inner.queue.borrow();
                queue
                    .range(..=(now, u64::MAX))
                    .find(|(key, _)| key.1 < horizon)
                    .map(|(key, slot)| (*key, slot.clone()))
            };
            let Some((key, weak)) = next else { break };
            self.inner.queue.borrow_mut().remove(&key);

            let Some(slot) = weak.upgrade() else { continue };
            if slot.key.get() != Some(key) {
                continue;
            }
            slot.key.set(None);
            did_any = true;
            self.inner.runs.set(self.inner.runs.get() + 1);
            self.fire(&slot, key.0, now);
        }

        did_any
    }

    /// Time until the earliest armed task, `Some(0)` if one is overdue.
    pub fn micros_until_next_due(&self) -> Option<u64> {
        let now = self.now_micros();
        self.inner
            .queue
            .borrow()
            .keys()
            .next()
            .map(|(due, _)| due.saturating_sub(now))
    }

    /// Number of armed tasks.
    pub fn armed_count(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// Total task firings since creation.
    pub fn total_runs(&self) -> u64 {
        self.inner.runs.get()
    }

    // ── Internal ──────────────────────────────────────────────

    fn fire(&self, slot: &Rc<TaskSlot>, due: u64, now: u64) {
        let last = match (slot.period.get(), slot.remaining.get()) {
            (None, _) => true,
            (Some(_), Some(n)) => n <= 1,
            (Some(_), None) => false,
        };

        match slot.period.get() {
            Some(period) => {
                let next_due = due.saturating_add(period);
                slot.overrun.set(next_due as i64 - now as i64);
                if last {
                    slot.remaining.set(Some(0));
                } else {
                    if let Some(n) = slot.remaining.get() {
                        slot.remaining.set(Some(n - 1));
                    }
                    self.arm(slot, next_due);
                }
            }
            None => slot.overrun.set(due as i64 - now as i64),
        }
        slot.last_iteration.set(last);

        let generation = slot.generation.get();
        let taken = slot.callback.borrow_mut().take();
        if let Some(mut cb) = taken {
            slot.running.set(true);
            cb();
            slot.running.set(false);
            // Keep the callback unless it was replaced while running.
            if slot.generation.get() == generation && slot.callback.borrow().is_none() {
                *slot.callback.borrow_mut() = Some(cb);
            }
        }
    }

    fn arm(&self, slot: &Rc<TaskSlot>, due: u64) {
        self.disarm(slot);
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);
        let key = (due, seq);
        slot.key.set(Some(key));
        self.inner
            .queue
            .borrow_mut()
            .insert(key, Rc::downgrade(slot));
    }

    fn disarm(&self, slot: &TaskSlot) {
        if let Some(key) = slot.key.take() {
            self.inner.queue.borrow_mut().remove(&key);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Timer handle
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct TaskSlot {
    callback: RefCell<Option<Callback>>,
    key: Cell<Option<TaskKey>>,
    period: Cell<Option<u64>>,
    /// Firings left for a bounded interval; `None` = unbounded.
    remaining: Cell<Option<u32>>,
    /// Bumped whenever a new callback is installed.
    generation: Cell<u64>,
    running: Cell<bool>,
    overrun: Cell<i64>,
    last_iteration: Cell<bool>,
}

/// One scheduler task.  Dropping the handle cancels the task.
pub struct Timer {
    scheduler: Scheduler,
    slot: Rc<TaskSlot>,
}

impl Timer {
    pub fn new(scheduler: &Scheduler) -> Self {
        Self {
            scheduler: scheduler.clone(),
            slot: Rc::new(TaskSlot::default()),
        }
    }

    /// Fire `callback` once, `duration_us` from now.
    pub fn set_timeout(&self, duration_us: u64, callback: impl FnMut() + 'static) {
        self.install(callback, None, None);
        self.arm_after(duration_us);
    }

    /// Fire `callback` every `period_us`, first firing one period from now.
    pub fn set_interval(&self, period_us: u64, callback: impl FnMut() + 'static) {
        self.install(callback, Some(period_us), None);
        self.arm_after(period_us);
    }

    /// Like [`set_interval`](Self::set_interval) but disables itself after
    /// `iterations` firings.  `iterations == 0` leaves the timer idle.
    pub fn set_iterations(
        &self,
        period_us: u64,
        iterations: u32,
        callback: impl FnMut() + 'static,
    ) {
        self.install(callback, Some(period_us), Some(iterations));
        if iterations > 0 {
            self.arm_after(period_us);
        }
    }

    /// Re-arm the current callback `delay_us` from now, keeping its period.
    /// Returns `false` if no callback is installed.
    pub fn restart_delayed(&self, delay_us: u64) -> bool {
        if self.slot.callback.borrow().is_none() && !self.slot.running.get() {
            return false;
        }
        self.arm_after(delay_us);
        true
    }

    /// Effective only before the timer fires.
    pub fn cancel(&self) {
        self.scheduler.disarm(&self.slot);
    }

    pub fn is_active(&self) -> bool {
        self.slot.key.get().is_some()
    }

    /// True while running the final firing of a one-shot or bounded interval.
    pub fn is_last_iteration(&self) -> bool {
        self.slot.last_iteration.get()
    }

    /// Slack of the most recent firing, in micros: time from the actual
    /// firing to the next scheduled one (periodic), or `due - fired_at`
    /// (one-shot).  Negative means the task is already late.
    pub fn overrun(&self) -> i64 {
        self.slot.overrun.get()
    }

    /// Micros until this timer fires, if armed.
    pub fn remaining_micros(&self) -> Option<u64> {
        let (due, _) = self.slot.key.get()?;
        Some(due.saturating_sub(self.scheduler.now_micros()))
    }

    fn install(
        &self,
        callback: impl FnMut() + 'static,
        period: Option<u64>,
        iterations: Option<u32>,
    ) {
        self.cancel();
        *self.slot.callback.borrow_mut() = Some(Box::new(callback));
        self.slot.period.set(period);
        self.slot.remaining.set(iterations);
        self.slot.last_iteration.set(false);
        self.slot.generation.set(self.slot.generation.get() + 1);
    }

    fn arm_after(&self, delay_us: u64) {
        let due = self.scheduler.now_micros().saturating_add(delay_us);
        trace!("timer armed, due in {}us", delay_us);
        self.scheduler.arm(&self.slot, due);
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.scheduler.disarm(&self.slot);
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

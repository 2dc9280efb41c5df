//! Cooperative event loop.
//!
//! One owner thread runs [`EventLoop::run_once`] repeatedly; any number of
//! other threads hold an [`EventSender`] and post into the bounded queue.
//!
//! ```text
//! ┌─────────────┐
//! │ Radio ISR   │──┐
//! │ Modem UART  │──┤  EventSender::post   ┌──────────────────┐
//! │ Command CLI │──┼────────────────────▶ │ Channel<Envelope,│
//! │ Owner code  │──┘  (bounded wait)      │      32>         │
//! └─────────────┘                         └────────┬─────────┘
//!                                                  │ ≤10 per run_once
//!                 ┌──────────────┐                 ▼
//!                 │  Scheduler   │──due──▶ ┌──────────────────┐
//!                 │  (timers)    │         │ run_once (owner) │──▶ Dispatcher
//!                 └──────────────┘         └──────────────────┘
//! ```
//!
//! `run_once` order: (a) run due timers, (b) size the wait budget as
//! `min(max_wait, time until next timer)`, (c) pull up to
//! `max_events_per_run` envelopes, re-sizing the budget after each,
//! (d) yield once if nothing ran.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_time::{Duration, Instant, Timer as AsyncTimer, with_timeout};
use futures_lite::future::block_on;
use log::{debug, info, warn};

use crate::adapters::time::MonotonicClock;
use crate::config::{EVENT_QUEUE_DEPTH, LoopConfig};
use crate::diagnostics::LoopStats;
use crate::dispatch::{Dispatcher, HandlerId};
use crate::error::{Error, Result};
use crate::events::{Completion, Envelope, Event};
use crate::registry::EventType;
use crate::scheduler::{Clock, Scheduler};

/// Poll step while waiting for queue space.
const POST_RETRY: Duration = Duration::from_millis(1);

// ───────────────────────────────────────────────────────────────
// Shared (cross-thread) state
// ───────────────────────────────────────────────────────────────

struct Shared {
    queue: Channel<CriticalSectionRawMutex, Envelope, EVENT_QUEUE_DEPTH>,
    owner: ThreadId,
    post_wait: Duration,
    closed: AtomicBool,
    posted: AtomicU64,
    rejected: AtomicU64,
}

impl Shared {
    fn is_owner_thread(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    /// Push without waiting.  A push that lands after the loop closed is
    /// rejected here, since the owner's final drain may already be done.
    fn enqueue(&self, envelope: Envelope) -> core::result::Result<(), TrySendError<Envelope>> {
        self.queue.try_send(envelope)?;
        self.posted.fetch_add(1, Ordering::Relaxed);
        if self.closed.load(Ordering::Acquire) {
            self.reject_queued();
        }
        Ok(())
    }

    /// Complete every queued envelope with `processed = false`.
    fn reject_queued(&self) -> usize {
        let mut drained = 0usize;
        while let Ok(envelope) = self.queue.try_receive() {
            envelope.reject();
            self.rejected.fetch_add(1, Ordering::Relaxed);
            drained += 1;
        }
        drained
    }
}

// ───────────────────────────────────────────────────────────────
// EventSender
// ───────────────────────────────────────────────────────────────

/// Cross-thread posting handle.  The only core API that is `Send`.
#[derive(Clone)]
pub struct EventSender {
    shared: Arc<Shared>,
}

impl EventSender {
    /// Enqueue `envelope`, waiting up to the configured post window for
    /// space.  On failure the envelope tail runs right here with
    /// `processed = false` before returning [`Error::QueueFull`].
    pub fn try_post(&self, envelope: Envelope) -> Result<()> {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.post_wait;
        let mut envelope = envelope;

        loop {
            if shared.closed.load(Ordering::Acquire) {
                envelope.reject();
                shared.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(Error::QueueFull);
            }
            match shared.enqueue(envelope) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) => {
                    // Only the owner drains the queue, so it never waits.
                    if shared.is_owner_thread() || Instant::now() >= deadline {
                        warn!(
                            "event_loop: queue full, rejecting {}",
                            back.event().map_or(EventType::NOT_FOUND, Event::event_type)
                        );
                        back.reject();
                        shared.rejected.fetch_add(1, Ordering::Relaxed);
                        return Err(Error::QueueFull);
                    }
                    envelope = back;
                    block_on(AsyncTimer::after(POST_RETRY));
                }
            }
        }
    }

    /// [`try_post`](Self::try_post) reduced to the accepted flag.
    pub fn post(&self, envelope: Envelope) -> bool {
        self.try_post(envelope).is_ok()
    }

    pub fn post_event(&self, event: Event) -> bool {
        self.post(Envelope::new(event))
    }

    /// Post and block until the owner thread has processed the envelope.
    /// Returns the processed flag (`false` also when the queue was full).
    ///
    /// Calling this on the owner thread would wait on the caller's own
    /// queue; it returns [`Error::WouldDeadlock`] instead.  Owner code uses
    /// [`Dispatcher::process_immediately`].
    pub fn call_with(&self, envelope: Envelope) -> Result<bool> {
        if self.shared.is_owner_thread() {
            return Err(Error::WouldDeadlock);
        }
        let completion = Completion::new();
        // A rejected post releases the completion with `false`.
        let _ = self.try_post(envelope.completion(completion.clone()));
        Ok(completion.wait())
    }

    pub fn call(&self, event: Event) -> Result<bool> {
        self.call_with(Envelope::new(event))
    }

    pub fn is_owner_thread(&self) -> bool {
        self.shared.is_owner_thread()
    }

    /// Identifies the loop this sender posts to.  Stable and unique while
    /// any sender of that loop is alive.
    pub fn loop_id(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }

    /// Envelopes currently queued.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }
}

// ───────────────────────────────────────────────────────────────
// EventLoop
// ───────────────────────────────────────────────────────────────

/// What one `run_once` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunOutcome {
    pub timers_ran: bool,
    pub events: u16,
}

impl RunOutcome {
    pub fn did_work(&self) -> bool {
        self.timers_ran || self.events > 0
    }
}

/// The owner side of the loop.  Bound to the thread that created it.
pub struct EventLoop {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
    scheduler: Scheduler,
    config: LoopConfig,
}

impl EventLoop {
    /// Create a loop on the real monotonic clock.  The calling thread
    /// becomes the owner.
    pub fn new(config: LoopConfig) -> Result<Self> {
        Self::with_clock(config, MonotonicClock::new())
    }

    pub fn with_clock(config: LoopConfig, clock: impl Clock + 'static) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            queue: Channel::new(),
            owner: std::thread::current().id(),
            post_wait: Duration::from_millis(u64::from(config.post_wait_ms)),
            closed: AtomicBool::new(false),
            posted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        });
        info!(
            "event_loop: created (queue depth {}, {} events/run, post wait {}ms)",
            EVENT_QUEUE_DEPTH, config.max_events_per_run, config.post_wait_ms
        );
        Ok(Self {
            shared,
            dispatcher: Dispatcher::new(),
            scheduler: Scheduler::new(clock),
            config,
        })
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Register a handler (see [`Dispatcher::on_event`]).
    pub fn on_event(
        &self,
        ty: EventType,
        handler: impl FnMut(&Event) -> bool + 'static,
    ) -> HandlerId {
        self.dispatcher.on_event(ty, handler)
    }

    /// Owner-thread synchronous dispatch.
    pub fn process_immediately(&self, envelope: Envelope) -> bool {
        self.dispatcher.process_immediately(envelope)
    }

    /// One loop step.  See the module docs for the exact order.
    pub fn run_once(&self, max_wait_ms: u32) -> RunOutcome {
        let started = Instant::now();
        let max_wait = Duration::from_millis(u64::from(max_wait_ms));

        let timers_ran = self.scheduler.execute_due_tasks();
        let mut events: u16 = 0;

        while events < self.config.max_events_per_run {
            let budget = self.wait_budget(started, max_wait);
            let next = if budget.as_ticks() == 0 {
                self.shared.queue.try_receive().ok()
            } else {
                block_on(with_timeout(budget, self.shared.queue.receive())).ok()
            };
            let Some(envelope) = next else { break };
            self.dispatcher.dispatch(envelope);
            events += 1;
        }

        if !timers_ran && events == 0 {
            std::thread::yield_now();
        }
        RunOutcome { timers_ran, events }
    }

    /// Keep running `run_once(max_wait_ms)` until `done()` returns true.
    pub fn run_until(&self, max_wait_ms: u32, mut done: impl FnMut() -> bool) {
        while !done() {
            self.run_once(max_wait_ms);
        }
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            posted: self.shared.posted.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
            dispatched: self.dispatcher.dispatched_count(),
            unprocessed: self.dispatcher.unprocessed_count(),
            timer_runs: self.scheduler.total_runs(),
            pending: self.shared.queue.len(),
            armed_timers: self.scheduler.armed_count(),
        }
    }

    // ── Internal ──────────────────────────────────────────────

    fn wait_budget(&self, started: Instant, max_wait: Duration) -> Duration {
        let left = max_wait
            .checked_sub(started.elapsed())
            .unwrap_or(Duration::from_ticks(0));
        match self.scheduler.micros_until_next_due() {
            Some(us) => left.min(Duration::from_micros(us)),
            None => left,
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        let drained = self.shared.reject_queued();
        if drained > 0 {
            debug!("event_loop: dropped with {} queued envelopes", drained);
        }
    }
}

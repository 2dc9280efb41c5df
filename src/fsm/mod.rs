//! Finite-state-machine execution engine.
//!
//! A subsystem describes its whole control logic as one [`Behavior`]: a
//! single total function from `(state, input)` to a [`Transition`].  The
//! engine owns everything around it:
//!
//! ```text
//!                    ┌──────────────────────────────┐
//!   handle_input ──▶ │ Machine                      │
//!   state timeout ─▶ │  ┌────────────────────────┐  │
//!   queued input ──▶ │  │ Behavior::handle(      │  │
//!                    │  │   ctl, state, input)   │  │
//!                    │  └───────────┬────────────┘  │
//!                    │   Stay       │ To(S, t?)     │
//!                    │   (done)     ▼               │
//!                    │  cancel timeout, state = S,  │
//!                    │  arm t, deliver Enter to S ──┼─▶ loop (chain guard)
//!                    └──────────────────────────────┘
//! ```
//!
//! - `To(S)` always re-fires [`Input::Enter`], also when `S` is the
//!   current state.  `Stay` never does.
//! - Entering a state clears the previous state's timeout and resets
//!   `millis_in_state`.
//! - Inputs queued for a state are delivered, oldest first, right after
//!   a later entry of that state returns `Stay` from Enter.
//! - A handler feeding its own machine (directly or through another
//!   machine) does not recurse: the input is delivered after the current
//!   one finishes.
//!
//! Machines live on the event loop's owner thread and are `!Send`.

pub mod context;
pub mod states;

use core::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use log::{Level, debug, error, info, log, warn};

pub use context::Controls;
pub use states::{InputTable, Label, StateTable, Symbol};

use crate::config::{MAX_PENDING_INPUTS, MachineConfig, ViolationPolicy};
use crate::error::{FsmError, Result};
use crate::scheduler::{Scheduler, Timer};

// ---------------------------------------------------------------------------
// Handler contract
// ---------------------------------------------------------------------------

/// What a handler is asked to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input<I> {
    /// The machine just entered the state.
    Enter,
    /// The state's timeout expired.
    Timeout,
    /// A machine-specific input.
    Custom(I),
}

impl<I: Label> Input<I> {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Enter => "ENTER",
            Self::Timeout => "TIMEOUT",
            Self::Custom(i) => i.label(),
        }
    }
}

/// A handler's answer to one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<S> {
    /// Keep the state.  No Enter, timeout untouched.
    Stay,
    /// Enter `S` (re-firing Enter), optionally arming a state timeout in ms.
    To(S, Option<u32>),
    /// The handler does not accept this `(state, input)` pair.
    Violation,
}

impl<S> Transition<S> {
    pub fn to(state: S) -> Self {
        Self::To(state, None)
    }

    pub fn to_with_timeout(state: S, millis: u32) -> Self {
        Self::To(state, Some(millis))
    }
}

/// One machine's states, inputs and handler.
pub trait Behavior: Sized + 'static {
    type State: Label;
    type Input: Label;

    fn handle(
        &mut self,
        ctl: &Controls<'_, Self>,
        state: Self::State,
        input: Input<Self::Input>,
    ) -> Transition<Self::State>;
}

/// Snapshot for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineStatus {
    pub name: &'static str,
    pub state: &'static str,
    pub millis_in_state: u64,
    pub timeout_remaining_ms: Option<u64>,
    pub pending_for_state: usize,
    pub queued: usize,
    pub transitions: u64,
    pub halted: bool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct Core<S, I> {
    initial: Option<S>,
    state: Option<S>,
    entered_at_us: u64,
    transitions: u64,
    busy: bool,
    halted: bool,
    /// `(state, input, transitions when queued)`
    pending: heapless::Vec<(S, I, u64), MAX_PENDING_INPUTS>,
    deferred: VecDeque<Input<I>>,
}

struct Inner<B: Behavior> {
    name: &'static str,
    config: MachineConfig,
    scheduler: Scheduler,
    tracing: Cell<bool>,
    behavior: RefCell<B>,
    core: RefCell<Core<B::State, B::Input>>,
    timeout: Timer,
    delayed: RefCell<Vec<Timer>>,
}

/// Handle to a machine.  Clones share the machine.
pub struct Machine<B: Behavior> {
    inner: Rc<Inner<B>>,
}

impl<B: Behavior> Clone for Machine<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// Non-owning handle, for machines that feed each other.
pub struct WeakMachine<B: Behavior> {
    inner: Weak<Inner<B>>,
}

impl<B: Behavior> Clone for WeakMachine<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<B: Behavior> WeakMachine<B> {
    pub fn upgrade(&self) -> Option<Machine<B>> {
        self.inner.upgrade().map(|inner| Machine { inner })
    }
}

impl<B: Behavior> Machine<B> {
    /// Create a stopped machine.  Call [`start`](Self::start) once the
    /// handler's collaborators are wired up.
    pub fn new(
        name: &'static str,
        scheduler: &Scheduler,
        config: MachineConfig,
        behavior: B,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                name,
                config,
                scheduler: scheduler.clone(),
                tracing: Cell::new(false),
                behavior: RefCell::new(behavior),
                core: RefCell::new(Core {
                    initial: None,
                    state: None,
                    entered_at_us: 0,
                    transitions: 0,
                    busy: false,
                    halted: false,
                    pending: heapless::Vec::new(),
                    deferred: VecDeque::new(),
                }),
                timeout: Timer::new(scheduler),
                delayed: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Enter `initial` and deliver its Enter before returning.
    pub fn start(&self, initial: B::State) -> Result<()> {
        {
            let mut core = self.inner.core.borrow_mut();
            if core.state.is_some() {
                return Err(FsmError::AlreadyStarted.into());
            }
            core.initial = Some(initial);
        }
        info!("fsm[{}]: starting in {}", self.inner.name, initial.label());
        self.enter(initial, None);
        self.deliver(Input::Enter)
    }

    /// Feed one input.  Inside a handler of this machine the input is
    /// delivered once the current one has finished.
    pub fn handle_input(&self, input: B::Input) -> Result<()> {
        self.deliver(Input::Custom(input))
    }

    /// Clear every pending input and timer, leave the halted state and
    /// re-enter the initial state.
    pub fn restart(&self) -> Result<()> {
        let initial = {
            let mut core = self.inner.core.borrow_mut();
            if core.busy {
                return Err(FsmError::Busy.into());
            }
            let Some(initial) = core.initial else {
                return Err(FsmError::NotStarted.into());
            };
            core.halted = false;
            core.pending.clear();
            core.deferred.clear();
            initial
        };
        self.cancel_queued();
        info!("fsm[{}]: restarting in {}", self.inner.name, initial.label());
        self.enter(initial, None);
        self.deliver(Input::Enter)
    }

    // ── Timers and queued inputs ──────────────────────────────

    /// (Re)arm the current state's timeout.
    pub fn set_state_timeout(&self, millis: u32) {
        let weak = Rc::downgrade(&self.inner);
        self.inner
            .timeout
            .set_timeout(u64::from(millis) * 1_000, move || {
                if let Some(inner) = weak.upgrade() {
                    let machine = Machine { inner };
                    if let Err(e) = machine.deliver(Input::Timeout) {
                        warn!("fsm[{}]: timeout not delivered: {}", machine.name(), e);
                    }
                }
            });
    }

    pub fn clear_state_timeout(&self) {
        self.inner.timeout.cancel();
    }

    /// Deliver `input` once after `delay_ms`, through the scheduler.
    pub fn queue_input(&self, input: B::Input, delay_ms: u32) {
        let weak = Rc::downgrade(&self.inner);
        let deliver = move || {
            if let Some(inner) = weak.upgrade() {
                let machine = Machine { inner };
                if let Err(e) = machine.deliver(Input::Custom(input)) {
                    warn!(
                        "fsm[{}]: queued {} not delivered: {}",
                        machine.name(),
                        input.label(),
                        e
                    );
                }
            }
        };

        let mut delayed = self.inner.delayed.borrow_mut();
        let delay_us = u64::from(delay_ms) * 1_000;
        match delayed.iter().find(|t| !t.is_active()) {
            Some(timer) => timer.set_timeout(delay_us, deliver),
            None => {
                let timer = Timer::new(&self.inner.scheduler);
                timer.set_timeout(delay_us, deliver);
                delayed.push(timer);
            }
        }
    }

    /// Deliver `input` once, the next time `state` is entered and its
    /// Enter returns `Stay`.  Being in `state` right now does not count.
    pub fn queue_input_for_state(&self, input: B::Input, state: B::State) -> Result<()> {
        let mut core = self.inner.core.borrow_mut();
        let stamp = core.transitions;
        core.pending.push((state, input, stamp)).map_err(|_| {
            warn!(
                "fsm[{}]: pending list full, dropping {} for {}",
                self.inner.name,
                input.label(),
                state.label()
            );
            FsmError::PendingFull
        })?;
        Ok(())
    }

    // ── Introspection ─────────────────────────────────────────

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn current_state(&self) -> Option<B::State> {
        self.inner.core.borrow().state
    }

    /// Name of the current state, `"-"` before `start`.
    pub fn state_name(&self) -> &'static str {
        self.current_state().map_or("-", |s| s.label())
    }

    pub fn input_name(input: &Input<B::Input>) -> &'static str {
        input.label()
    }

    pub fn millis_in_state(&self) -> u64 {
        let core = self.inner.core.borrow();
        if core.state.is_none() {
            return 0;
        }
        self.inner
            .scheduler
            .now_micros()
            .saturating_sub(core.entered_at_us)
            / 1_000
    }

    /// Millis until the armed state timeout fires.
    pub fn timeout_remaining(&self) -> Option<u64> {
        self.inner
            .timeout
            .remaining_micros()
            .map(|us| us.div_ceil(1_000))
    }

    pub fn is_halted(&self) -> bool {
        self.inner.core.borrow().halted
    }

    pub fn status(&self) -> MachineStatus {
        let queued = self
            .inner
            .delayed
            .borrow()
            .iter()
            .filter(|t| t.is_active())
            .count();
        let core = self.inner.core.borrow();
        let state = core.state.map_or("-", |s| s.label());
        let pending_for_state = core.pending.len();
        let transitions = core.transitions;
        let halted = core.halted;
        drop(core);
        MachineStatus {
            name: self.inner.name,
            state,
            millis_in_state: self.millis_in_state(),
            timeout_remaining_ms: self.timeout_remaining(),
            pending_for_state,
            queued,
            transitions,
            halted,
        }
    }

    /// Log every input and transition at `debug` instead of `trace`.
    pub fn set_tracing(&self, on: bool) {
        self.inner.tracing.set(on);
    }

    /// Read the behavior's data.  `None` while its handler is running.
    pub fn with_behavior<R>(&self, f: impl FnOnce(&B) -> R) -> Option<R> {
        self.inner.behavior.try_borrow().ok().map(|b| f(&b))
    }

    pub fn with_behavior_mut<R>(&self, f: impl FnOnce(&mut B) -> R) -> Option<R> {
        self.inner
            .behavior
            .try_borrow_mut()
            .ok()
            .map(|mut b| f(&mut b))
    }

    pub fn downgrade(&self) -> WeakMachine<B> {
        WeakMachine {
            inner: Rc::downgrade(&self.inner),
        }
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn deliver(&self, input: Input<B::Input>) -> Result<()> {
        {
            let mut core = self.inner.core.borrow_mut();
            if core.state.is_none() {
                return Err(FsmError::NotStarted.into());
            }
            if core.halted {
                warn!("fsm[{}]: halted, dropping {}", self.inner.name, input.label());
                return Err(FsmError::Halted.into());
            }
            if core.busy {
                core.deferred.push_back(input);
                return Ok(());
            }
            core.busy = true;
        }

        let result = self.run_chain(input);

        loop {
            let next = {
                let mut core = self.inner.core.borrow_mut();
                if core.halted {
                    core.deferred.clear();
                }
                core.deferred.pop_front()
            };
            let Some(next) = next else { break };
            if let Err(e) = self.run_chain(next) {
                debug!("fsm[{}]: deferred input failed: {}", self.inner.name, e);
            }
        }

        self.inner.core.borrow_mut().busy = false;
        result
    }

    /// Run one input and every transition it chains into.
    fn run_chain(&self, first: Input<B::Input>) -> Result<()> {
        let limit = self.inner.config.max_transition_chain;
        let mut input = first;
        let mut chained = 0u32;
        // Set once the current state's Enter returned Stay.
        let mut settled = false;
        let mut outcome = Ok(());

        loop {
            let Some(state) = self.current_state() else {
                return Err(FsmError::NotStarted.into());
            };
            let is_enter = matches!(input, Input::Enter);
            let input_label = input.label();
            log!(
                self.trace_level(),
                "fsm[{}]: {} <- {}",
                self.inner.name,
                state.label(),
                input_label
            );

            let transition = {
                let ctl = Controls::new(self);
                let mut behavior = self.inner.behavior.borrow_mut();
                behavior.handle(&ctl, state, input)
            };

            let stayed = matches!(transition, Transition::Stay);
            let next = match transition {
                Transition::Stay => None,
                Transition::To(next, timeout) => Some((next, timeout)),
                Transition::Violation => {
                    outcome = Err(FsmError::ProtocolViolation.into());
                    self.violation(state, input_label)
                }
            };

            match next {
                Some((next, timeout)) => {
                    chained += 1;
                    if chained > limit {
                        error!(
                            "fsm[{}]: more than {} chained transitions, stopped in {} (next {})",
                            self.inner.name,
                            limit,
                            state.label(),
                            next.label()
                        );
                        return Err(FsmError::ChainLimit.into());
                    }
                    self.enter(next, timeout);
                    input = Input::Enter;
                    settled = false;
                }
                None => {
                    if is_enter && stayed {
                        settled = true;
                    }
                    if !settled || !stayed {
                        return outcome;
                    }
                    match self.take_pending(state) {
                        Some(queued) => input = Input::Custom(queued),
                        None => return outcome,
                    }
                }
            }
        }
    }

    /// Apply the violation policy.  Returns the state to enter, if any.
    fn violation(
        &self,
        state: B::State,
        input_label: &'static str,
    ) -> Option<(B::State, Option<u32>)> {
        error!(
            "fsm[{}]: protocol violation: input {} in state {}",
            self.inner.name,
            input_label,
            state.label()
        );
        match self.inner.config.violation_policy {
            ViolationPolicy::Park => None,
            ViolationPolicy::Halt => {
                self.inner.core.borrow_mut().halted = true;
                self.inner.timeout.cancel();
                self.cancel_queued();
                warn!("fsm[{}]: halted until restart", self.inner.name);
                None
            }
            ViolationPolicy::Restart => self.inner.core.borrow().initial.map(|s| (s, None)),
        }
    }

    fn enter(&self, next: B::State, timeout: Option<u32>) {
        self.inner.timeout.cancel();
        let now = self.inner.scheduler.now_micros();
        let prev = {
            let mut core = self.inner.core.borrow_mut();
            core.entered_at_us = now;
            core.transitions += 1;
            core.state.replace(next)
        };
        log!(
            self.trace_level(),
            "fsm[{}]: {} -> {}",
            self.inner.name,
            prev.map_or("-", |s| s.label()),
            next.label()
        );
        if let Some(ms) = timeout {
            self.set_state_timeout(ms);
        }
    }

    /// Oldest input for `state` queued before the current entry of it.
    fn take_pending(&self, state: B::State) -> Option<B::Input> {
        let mut core = self.inner.core.borrow_mut();
        let entry = core.transitions;
        let idx = core
            .pending
            .iter()
            .position(|(s, _, stamp)| *s == state && *stamp < entry)?;
        Some(core.pending.remove(idx).1)
    }

    fn cancel_queued(&self) {
        for timer in self.inner.delayed.borrow().iter() {
            timer.cancel();
        }
    }

    fn trace_level(&self) -> Level {
        if self.inner.tracing.get() {
            Level::Debug
        } else {
            Level::Trace
        }
    }
}

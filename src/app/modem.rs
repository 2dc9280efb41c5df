//! Confirmed send over the cellular modem.
//!
//! Splits an outbound buffer into chunks and walks each one through the
//! modem driver.  Three timeout categories guard the flow, each with its
//! own error state; all error states converge on `CLEANUP`, which either
//! retries the whole buffer after a delay or gives up.
//!
//! ```text
//!  IDLE ──Send──▶ START ──▶ SEND_CHUNK ──ok──▶ AWAIT_ACCEPT ──Accepted──▶ AWAIT_TRANSMIT
//!                   ▲           │ refused         │ timeout/Rejected        │ timeout
//!                   │           ▼                 ▼                         ▼
//!                   │       ACCEPT_ERROR ◀────────┘                   TRANSMIT_ERROR
//!                   │           │                                           │
//!                   │           ▼                                           │
//!   RETRY_WAIT ◀────┼──── CLEANUP ◀───────────────────────────────────────────┤
//!   (timeout)───────┘      │  attempts used up                              │
//!                          ▼                                                │
//!                       FAILED ──▶ IDLE         AWAIT_TRANSMIT ──Transmitted─┴─▶ SEND_CHUNK
//!                                                 (last chunk) ──▶ AWAIT_CONFIRM
//!                                                                  │Confirmed  │timeout
//!                                                                  ▼           ▼
//!                                                          DONE ──▶ IDLE   CONFIRM_ERROR ──▶ CLEANUP
//! ```
//!
//! Buffers sent mid-flight wait in the outbox.  Every entry into `IDLE`
//! starts the oldest one, so the outbox drains however many are queued.

use std::collections::VecDeque;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::ModemPort;
use crate::config::MachineConfig;
use crate::dispatch::{Dispatcher, HandlerId};
use crate::error::{Error, FsmError, Result};
use crate::fsm::{Behavior, Controls, Input, Label, Machine, Transition};
use crate::registry::{self, EventType};
use crate::scheduler::Scheduler;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModemTiming {
    /// Bytes handed to the driver per AT command
    pub chunk_size: usize,
    /// Driver must accept the command within this window (ms)
    pub accept_timeout_ms: u32,
    /// Chunk must leave the radio within this window (ms)
    pub transmit_timeout_ms: u32,
    /// Server must confirm the whole buffer within this window (ms)
    pub confirm_timeout_ms: u32,
    /// Pause between a failed attempt and the next one (ms)
    pub retry_delay_ms: u32,
    /// Attempts per buffer, including the first
    pub max_attempts: u8,
}

impl Default for ModemTiming {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            accept_timeout_ms: 5_000,
            transmit_timeout_ms: 30_000,
            confirm_timeout_ms: 180_000,
            retry_delay_ms: 10_000,
            max_attempts: 3,
        }
    }
}

impl ModemTiming {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be > 0"));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be > 0"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// States, inputs, outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Start,
    SendChunk,
    AwaitAccept,
    AwaitTransmit,
    AwaitConfirm,
    AcceptError,
    TransmitError,
    ConfirmError,
    Cleanup,
    RetryWait,
    Done,
    Failed,
}

impl Label for SendState {
    fn label(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Start => "START",
            Self::SendChunk => "SEND_CHUNK",
            Self::AwaitAccept => "AWAIT_ACCEPT",
            Self::AwaitTransmit => "AWAIT_TRANSMIT",
            Self::AwaitConfirm => "AWAIT_CONFIRM",
            Self::AcceptError => "ACCEPT_ERROR",
            Self::TransmitError => "TRANSMIT_ERROR",
            Self::ConfirmError => "CONFIRM_ERROR",
            Self::Cleanup => "CLEANUP",
            Self::RetryWait => "RETRY_WAIT",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemInput {
    /// A buffer was added to the outbox.
    Send,
    Accepted,
    Rejected,
    Transmitted,
    Confirmed,
}

impl Label for ModemInput {
    fn label(&self) -> &'static str {
        match self {
            Self::Send => "SEND",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Transmitted => "TRANSMITTED",
            Self::Confirmed => "CONFIRMED",
        }
    }
}

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// The driver refused the command outright.
    Refused,
    /// The driver answered the command with an error.
    Rejected,
    AcceptTimeout,
    TransmitTimeout,
    ConfirmTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered { attempts: u8 },
    Failed { reason: SendFailure, attempts: u8 },
}

// ---------------------------------------------------------------------------
// Behavior
// ---------------------------------------------------------------------------

type OutcomeFn = Box<dyn FnMut(SendOutcome)>;

pub struct SendFlow<M: ModemPort> {
    modem: M,
    timing: ModemTiming,
    outbox: VecDeque<Vec<u8>>,
    current: Vec<u8>,
    offset: usize,
    inflight: usize,
    attempt: u8,
    failure: Option<SendFailure>,
    last_outcome: Option<SendOutcome>,
    on_outcome: Option<OutcomeFn>,
}

impl<M: ModemPort> SendFlow<M> {
    fn new(modem: M, timing: ModemTiming) -> Self {
        Self {
            modem,
            timing,
            outbox: VecDeque::new(),
            current: Vec::new(),
            offset: 0,
            inflight: 0,
            attempt: 0,
            failure: None,
            last_outcome: None,
            on_outcome: None,
        }
    }

    fn fail(&mut self, reason: SendFailure, via: SendState) -> Transition<SendState> {
        self.failure = Some(reason);
        Transition::to(via)
    }

    fn finish(&mut self, outcome: SendOutcome) -> Transition<SendState> {
        info!("modem: {} bytes -> {:?}", self.current.len(), outcome);
        self.last_outcome = Some(outcome);
        self.current.clear();
        if let Some(f) = self.on_outcome.as_mut() {
            f(outcome);
        }
        Transition::to(SendState::Idle)
    }

    fn start_next(&mut self) -> Transition<SendState> {
        while let Some(buf) = self.outbox.pop_front() {
            if buf.is_empty() {
                warn!("modem: ignoring empty buffer");
                continue;
            }
            self.current = buf;
            self.attempt = 0;
            return Transition::to(SendState::Start);
        }
        Transition::Stay
    }

    fn send_next_chunk(&mut self) -> Transition<SendState> {
        let end = (self.offset + self.timing.chunk_size).min(self.current.len());
        match self.modem.send_chunk(&self.current[self.offset..end]) {
            Ok(()) => {
                self.inflight = end - self.offset;
                debug!(
                    "modem: chunk {}..{} of {} handed to driver",
                    self.offset,
                    end,
                    self.current.len()
                );
                Transition::to_with_timeout(SendState::AwaitAccept, self.timing.accept_timeout_ms)
            }
            Err(e) => {
                warn!("modem: chunk refused: {}", e);
                self.fail(SendFailure::Refused, SendState::AcceptError)
            }
        }
    }
}

impl<M: ModemPort + 'static> Behavior for SendFlow<M> {
    type State = SendState;
    type Input = ModemInput;

    fn handle(
        &mut self,
        _ctl: &Controls<'_, Self>,
        state: SendState,
        input: Input<ModemInput>,
    ) -> Transition<SendState> {
        use Input::{Custom, Enter, Timeout};
        use ModemInput as I;
        use SendState as S;

        match (state, input) {
            (S::Idle, Enter | Custom(I::Send)) => self.start_next(),
            // Already in the outbox; picked up on the next IDLE.
            (_, Custom(I::Send)) => Transition::Stay,

            (S::Start, Enter) => {
                self.attempt += 1;
                self.offset = 0;
                self.failure = None;
                info!(
                    "modem: sending {} bytes, attempt {}/{}",
                    self.current.len(),
                    self.attempt,
                    self.timing.max_attempts
                );
                Transition::to(S::SendChunk)
            }
            (S::SendChunk, Enter) => self.send_next_chunk(),

            (S::AwaitAccept | S::AwaitTransmit | S::AwaitConfirm | S::RetryWait, Enter) => {
                Transition::Stay
            }
            (S::AwaitAccept, Custom(I::Accepted)) => Transition::to_with_timeout(
                S::AwaitTransmit,
                self.timing.transmit_timeout_ms,
            ),
            (S::AwaitAccept, Custom(I::Rejected)) => {
                self.fail(SendFailure::Rejected, S::AcceptError)
            }
            (S::AwaitAccept, Timeout) => self.fail(SendFailure::AcceptTimeout, S::AcceptError),

            (S::AwaitTransmit, Custom(I::Transmitted)) => {
                self.offset += self.inflight;
                self.inflight = 0;
                if self.offset < self.current.len() {
                    Transition::to(S::SendChunk)
                } else {
                    Transition::to_with_timeout(S::AwaitConfirm, self.timing.confirm_timeout_ms)
                }
            }
            (S::AwaitTransmit, Timeout) => {
                self.fail(SendFailure::TransmitTimeout, S::TransmitError)
            }

            (S::AwaitConfirm, Custom(I::Confirmed)) => Transition::to(S::Done),
            (S::AwaitConfirm, Timeout) => self.fail(SendFailure::ConfirmTimeout, S::ConfirmError),

            (S::AcceptError | S::TransmitError | S::ConfirmError, Enter) => {
                warn!(
                    "modem: {:?} in {} (attempt {}/{})",
                    self.failure,
                    state.label(),
                    self.attempt,
                    self.timing.max_attempts
                );
                Transition::to(S::Cleanup)
            }
            (S::Cleanup, Enter) => {
                self.modem.abort();
                self.inflight = 0;
                if self.attempt < self.timing.max_attempts {
                    Transition::to_with_timeout(S::RetryWait, self.timing.retry_delay_ms)
                } else {
                    Transition::to(S::Failed)
                }
            }
            (S::RetryWait, Timeout) => Transition::to(S::Start),

            (S::Done, Enter) => self.finish(SendOutcome::Delivered {
                attempts: self.attempt,
            }),
            (S::Failed, Enter) => {
                let reason = self.failure.unwrap_or(SendFailure::Refused);
                self.finish(SendOutcome::Failed {
                    reason,
                    attempts: self.attempt,
                })
            }

            // Late driver reports after a timeout or an abort.
            (_, Custom(I::Accepted | I::Rejected | I::Transmitted | I::Confirmed)) => {
                debug!("modem: stale {} in {}", input.label(), state.label());
                Transition::Stay
            }
            _ => Transition::Violation,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver event types
// ---------------------------------------------------------------------------

/// Event types the modem driver posts (`modem/<name>`).
#[derive(Debug, Clone, Copy)]
pub struct ModemEvents {
    pub accepted: EventType,
    pub rejected: EventType,
    pub transmitted: EventType,
    pub confirmed: EventType,
}

impl ModemEvents {
    pub fn register() -> Self {
        Self {
            accepted: registry::event_type("modem", "accepted"),
            rejected: registry::event_type("modem", "rejected"),
            transmitted: registry::event_type("modem", "transmitted"),
            confirmed: registry::event_type("modem", "confirmed"),
        }
    }

    fn input_for(&self, ty: EventType) -> Option<ModemInput> {
        match ty {
            t if t == self.accepted => Some(ModemInput::Accepted),
            t if t == self.rejected => Some(ModemInput::Rejected),
            t if t == self.transmitted => Some(ModemInput::Transmitted),
            t if t == self.confirmed => Some(ModemInput::Confirmed),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// Confirmed-send machine plus its outbox.
pub struct ConfirmedSend<M: ModemPort + 'static> {
    machine: Machine<SendFlow<M>>,
}

impl<M: ModemPort + 'static> ConfirmedSend<M> {
    pub fn new(
        scheduler: &Scheduler,
        config: MachineConfig,
        timing: ModemTiming,
        modem: M,
    ) -> Result<Self> {
        timing.validate()?;
        let machine = Machine::new("modem", scheduler, config, SendFlow::new(modem, timing));
        Ok(Self { machine })
    }

    pub fn start(&self) -> Result<()> {
        self.machine.start(SendState::Idle)
    }

    /// Queue `data` for a confirmed send.
    pub fn send(&self, data: Vec<u8>) -> Result<()> {
        self.machine
            .with_behavior_mut(|flow| flow.outbox.push_back(data))
            .ok_or(Error::Fsm(FsmError::Busy))?;
        self.machine.handle_input(ModemInput::Send)
    }

    /// Called once per finished buffer, from inside the handler.
    pub fn on_outcome(&self, f: impl FnMut(SendOutcome) + 'static) {
        let _ = self
            .machine
            .with_behavior_mut(|flow| flow.on_outcome = Some(Box::new(f)));
    }

    /// Route `modem/*` driver events into the machine.
    pub fn bind(&self, dispatcher: &Dispatcher) -> HandlerId {
        let events = ModemEvents::register();
        let machine = self.machine.clone();
        dispatcher.on_class(events.accepted, move |event| {
            let Some(input) = events.input_for(event.event_type()) else {
                return false;
            };
            if let Err(e) = machine.handle_input(input) {
                warn!("modem: {} not handled: {}", input.label(), e);
            }
            true
        })
    }

    pub fn state(&self) -> Option<SendState> {
        self.machine.current_state()
    }

    pub fn last_outcome(&self) -> Option<SendOutcome> {
        self.machine.with_behavior(|flow| flow.last_outcome).flatten()
    }

    /// Buffers waiting behind the one in flight.
    pub fn queued(&self) -> usize {
        self.machine
            .with_behavior(|flow| flow.outbox.len())
            .unwrap_or(0)
    }

    pub fn machine(&self) -> &Machine<SendFlow<M>> {
        &self.machine
    }
}

//! Unified error types for the reactor core.
//!
//! The core never aborts: every anomaly is either turned into an input the
//! owning machine handles, or reported through one of these variants and
//! logged.  All variants are `Copy` so they pass through the dispatcher and
//! the FSM engine without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the core funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The bounded event queue stayed full for the whole post window.
    QueueFull,
    /// A blocking call was attempted from the loop's own thread.
    WouldDeadlock,
    /// The registry ran out of 16-bit class or name ids.
    RegistryExhausted,
    /// A machine error (see [`FsmError`]).
    Fsm(FsmError),
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "event queue full"),
            Self::WouldDeadlock => write!(f, "blocking call on the loop's owner thread"),
            Self::RegistryExhausted => write!(f, "event type registry exhausted"),
            Self::Fsm(e) => write!(f, "fsm: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Machine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmError {
    /// Too many chained transitions inside one external input.
    ChainLimit,
    /// The handler rejected a `(state, input)` pair.
    ProtocolViolation,
    /// The machine is halted after a protocol violation.
    Halted,
    /// The machine has not been started yet.
    NotStarted,
    /// The state-conditioned pending list is at capacity.
    PendingFull,
    /// The operation needs the machine outside its handler.
    Busy,
    /// `start` was called on a running machine.
    AlreadyStarted,
}

impl fmt::Display for FsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChainLimit => write!(f, "transition chain limit exceeded"),
            Self::ProtocolViolation => write!(f, "protocol violation"),
            Self::Halted => write!(f, "machine halted"),
            Self::NotStarted => write!(f, "machine not started"),
            Self::PendingFull => write!(f, "pending input list full"),
            Self::Busy => write!(f, "machine is inside its handler"),
            Self::AlreadyStarted => write!(f, "machine already started"),
        }
    }
}

impl From<FsmError> for Error {
    fn from(e: FsmError) -> Self {
        Self::Fsm(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

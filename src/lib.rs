//! Reactor core: cooperative event loop and FSM engine.
//!
//! ```text
//!   registry ──▶ events ──▶ dispatch ──▶ event_loop ◀── scheduler
//!                                            │
//!                                            ▼
//!                                   fsm (Machine, Behavior)
//!                                            │
//!                                            ▼
//!                               app (modem, power, commands)
//! ```
//!
//! Everything except the registry and [`event_loop::EventSender`] is
//! owner-thread only and `!Send`.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod event_loop;
pub mod events;
pub mod fsm;
pub mod registry;
pub mod scheduler;

pub use dispatch::{Dispatcher, HandlerId, WeakDispatcher};
pub use error::{Error, FsmError, Result};
pub use event_loop::{EventLoop, EventSender, RunOutcome};
pub use events::{Completion, Envelope, Event, Payload};
pub use fsm::{Behavior, Controls, Input, Label, Machine, Transition};
pub use registry::EventType;
pub use scheduler::{Clock, Scheduler, Timer};

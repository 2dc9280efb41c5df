//! Events and queue entries.
//!
//! An [`Event`] is a registered [`EventType`] plus a tagged [`Payload`].
//! Posters wrap it in an [`Envelope`] together with the optional
//! on-process callback, completion signal and finalizer.
//!
//! ```text
//!  poster thread                        owner thread
//! ┌──────────────┐   Envelope   ┌──────────────────────────────┐
//! │ Event        │─────────────▶│ dispatch                     │
//! │ on_process?  │   (queue)    │   on_process(&event, hit)    │
//! │ completion?  │              │   completion.release(hit)    │
//! │ finalizer?   │              │   finalizer(event)           │
//! └──────────────┘              └──────────────────────────────┘
//! ```
//!
//! The finalizer receives the event *by value*, so it runs exactly once and
//! is the only place the payload is released.  An envelope that is dropped
//! without being dispatched (queue teardown, rejected post) still runs the
//! whole tail with `processed = false`.

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, with_timeout};
use futures_lite::future::block_on;

use crate::registry::EventType;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Event payload: nothing, a 64-bit scalar, or owned heap data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Payload {
    #[default]
    None,
    Scalar(u64),
    Bytes(Vec<u8>),
    Text(String),
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    ty: EventType,
    payload: Payload,
}

impl Event {
    pub fn new(ty: EventType) -> Self {
        Self {
            ty,
            payload: Payload::None,
        }
    }

    pub fn with_payload(ty: EventType, payload: Payload) -> Self {
        Self { ty, payload }
    }

    pub fn scalar(ty: EventType, value: u64) -> Self {
        Self::with_payload(ty, Payload::Scalar(value))
    }

    pub fn bytes(ty: EventType, data: Vec<u8>) -> Self {
        Self::with_payload(ty, Payload::Bytes(data))
    }

    pub fn text(ty: EventType, text: impl Into<String>) -> Self {
        Self::with_payload(ty, Payload::Text(text.into()))
    }

    pub fn event_type(&self) -> EventType {
        self.ty
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn as_scalar(&self) -> Option<u64> {
        match self.payload {
            Payload::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(t) => Some(t),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// One-shot completion signal a foreign thread can block on.
///
/// Carries the processed flag so the waiter learns the dispatch outcome.
#[derive(Clone, Default)]
pub struct Completion {
    signal: Arc<Signal<CriticalSectionRawMutex, bool>>,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn release(&self, processed: bool) {
        self.signal.signal(processed);
    }

    /// Block until released; returns the processed flag.
    pub fn wait(&self) -> bool {
        block_on(self.signal.wait())
    }

    /// Block at most `timeout_ms`; `None` if still pending.
    pub fn wait_timeout(&self, timeout_ms: u64) -> Option<bool> {
        block_on(with_timeout(
            Duration::from_millis(timeout_ms),
            self.signal.wait(),
        ))
        .ok()
    }

    /// Non-blocking check; consumes the release if present.
    pub fn try_take(&self) -> Option<bool> {
        self.signal.try_take()
    }
}

// ---------------------------------------------------------------------------
// Envelope (queue entry)
// ---------------------------------------------------------------------------

pub type OnProcess = Box<dyn FnOnce(&Event, bool) + Send>;
pub type Finalizer = Box<dyn FnOnce(Event) + Send>;

/// An event plus its processing tail.  Consumed exactly once.
pub struct Envelope {
    event: Option<Event>,
    on_process: Option<OnProcess>,
    completion: Option<Completion>,
    finalizer: Option<Finalizer>,
}

impl Envelope {
    pub fn new(event: Event) -> Self {
        Self {
            event: Some(event),
            on_process: None,
            completion: None,
            finalizer: None,
        }
    }

    /// Called with the outcome before the completion is released.
    #[must_use]
    pub fn on_process(mut self, f: impl FnOnce(&Event, bool) + Send + 'static) -> Self {
        self.on_process = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn completion(mut self, completion: Completion) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Receives the event by value once processing is over.
    #[must_use]
    pub fn finalizer(mut self, f: impl FnOnce(Event) + Send + 'static) -> Self {
        self.finalizer = Some(Box::new(f));
        self
    }

    /// The carried event; `None` once it has been handed to dispatch.
    pub fn event(&self) -> Option<&Event> {
        self.event.as_ref()
    }

    pub(crate) fn take_event(&mut self) -> Option<Event> {
        self.event.take()
    }

    /// Runs the tail in its fixed order: callback, completion, finalizer.
    pub(crate) fn complete_with(mut self, event: Event, processed: bool) {
        self.run_tail(event, processed);
    }

    /// Completes an undispatched envelope as "not processed".
    pub(crate) fn reject(mut self) {
        if let Some(event) = self.event.take() {
            self.run_tail(event, false);
        }
    }

    fn run_tail(&mut self, event: Event, processed: bool) {
        if let Some(cb) = self.on_process.take() {
            cb(&event, processed);
        }
        if let Some(c) = self.completion.take() {
            c.release(processed);
        }
        match self.finalizer.take() {
            Some(f) => f(event),
            None => drop(event),
        }
    }
}

impl Drop for Envelope {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            self.run_tail(event, false);
        }
    }
}

impl From<Event> for Envelope {
    fn from(event: Event) -> Self {
        Self::new(event)
    }
}

//! Event dispatcher.
//!
//! Holds the handler registrations of one event loop and matches events
//! against them.  Owner-thread only: the handle is `!Send`.
//!
//! ## Matching rules
//!
//! 1. Handlers are scanned in registration order.
//! 2. A handler is *eligible* if its type equals the event's type, or if it
//!    is a class wildcard of the event's class.
//! 3. The first eligible handler returning `true` ends the scan
//!    ("processed"); eligible handlers returning `false` do not.
//! 4. After the scan the envelope tail runs: on-process callback,
//!    completion, finalizer.
//!
//! Handlers may register or remove handlers, and may call
//! [`Dispatcher::process_immediately`] re-entrantly.  A handler that is
//! already running further up the stack is skipped for the nested event.

use core::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use log::{trace, warn};

use crate::events::{Envelope, Event};
use crate::registry::EventType;

/// Returned by registration; used to remove the handler again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u32);

type HandlerFn = dyn FnMut(&Event) -> bool;

struct Registration {
    id: HandlerId,
    ty: EventType,
    handler: Rc<RefCell<HandlerFn>>,
}

struct DispatcherInner {
    handlers: RefCell<Vec<Registration>>,
    next_id: Cell<u32>,
    dispatched: Cell<u64>,
    unprocessed: Cell<u64>,
}

/// Owner-thread handle to the handler list.  Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Rc<DispatcherInner>,
}

/// Non-owning handle; does not keep the handlers alive.
#[derive(Clone)]
pub struct WeakDispatcher {
    inner: Weak<DispatcherInner>,
}

impl WeakDispatcher {
    pub fn upgrade(&self) -> Option<Dispatcher> {
        self.inner.upgrade().map(|inner| Dispatcher { inner })
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(DispatcherInner {
                handlers: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
                dispatched: Cell::new(0),
                unprocessed: Cell::new(0),
            }),
        }
    }

    /// Register `handler` for `ty` (exact type or class wildcard).
    pub fn on_event(
        &self,
        ty: EventType,
        handler: impl FnMut(&Event) -> bool + 'static,
    ) -> HandlerId {
        let id = HandlerId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);
        let handler: Rc<RefCell<HandlerFn>> = Rc::new(RefCell::new(handler));
        self.inner
            .handlers
            .borrow_mut()
            .push(Registration { id, ty, handler });
        trace!("dispatch: handler {:?} registered for {}", id, ty);
        id
    }

    /// Register `handler` for every event of `ty`'s class.
    pub fn on_class(
        &self,
        ty: EventType,
        handler: impl FnMut(&Event) -> bool + 'static,
    ) -> HandlerId {
        self.on_event(ty.class(), handler)
    }

    /// Remove a handler.  Returns `false` if it was not registered.
    pub fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.inner.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        handlers.len() != before
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers.borrow().len()
    }

    /// Match and complete one envelope.  Returns the processed flag.
    pub fn dispatch(&self, mut envelope: Envelope) -> bool {
        let Some(event) = envelope.take_event() else {
            return false;
        };
        let processed = self.match_handlers(&event);
        self.inner.dispatched.set(self.inner.dispatched.get() + 1);
        if !processed {
            self.inner.unprocessed.set(self.inner.unprocessed.get() + 1);
            trace!("dispatch: {} unprocessed", event.event_type());
        }
        envelope.complete_with(event, processed);
        processed
    }

    /// Synchronous dispatch on the calling (owner) thread.  Use this
    /// instead of posting when already running inside the loop, so the
    /// loop never waits on its own queue.
    pub fn process_immediately(&self, envelope: Envelope) -> bool {
        self.dispatch(envelope)
    }

    /// Shorthand for processing a bare event immediately.
    pub fn call(&self, event: Event) -> bool {
        self.process_immediately(Envelope::new(event))
    }

    /// Envelopes dispatched so far.
    pub fn dispatched_count(&self) -> u64 {
        self.inner.dispatched.get()
    }

    /// Envelopes no handler accepted.
    pub fn unprocessed_count(&self) -> u64 {
        self.inner.unprocessed.get()
    }

    // ── Internal ──────────────────────────────────────────────

    fn match_handlers(&self, event: &Event) -> bool {
        let ty = event.event_type();
        let eligible: Vec<(HandlerId, Rc<RefCell<HandlerFn>>)> = self
            .inner
            .handlers
            .borrow()
            .iter()
            .filter(|r| r.ty.matches(ty))
            .map(|r| (r.id, Rc::clone(&r.handler)))
            .collect();

        for (id, handler) in eligible {
            if !self.is_registered(id) {
                continue;
            }
            let Ok(mut f) = handler.try_borrow_mut() else {
                warn!("dispatch: handler {:?} busy, skipped for {}", id, ty);
                continue;
            };
            if f(event) {
                return true;
            }
        }
        false
    }

    fn is_registered(&self, id: HandlerId) -> bool {
        self.inner.handlers.borrow().iter().any(|r| r.id == id)
    }
}

//! Command execution through the event loop.
//!
//! The command line (serial console, remote shell) lives outside the
//! core.  It turns each line into a `command/exec` event carrying the
//! text and waits for the outcome.  Which path that takes depends on the
//! calling thread:
//!
//! ```text
//!   foreign thread ──post + wait on completion──▶ owner thread dispatch
//!   owner thread   ──process_immediately─────────▶ same-stack dispatch
//! ```
//!
//! A command handler that runs another command is on the owner thread,
//! so the nested call never waits on the queue it is draining.

use core::cell::RefCell;

use log::{debug, warn};

use crate::dispatch::{Dispatcher, HandlerId, WeakDispatcher};
use crate::error::{Error, Result};
use crate::event_loop::{EventLoop, EventSender};
use crate::events::{Envelope, Event};
use crate::registry::{self, EventType};

pub const COMMAND_CLASS: &str = "command";
pub const COMMAND_EXEC: &str = "exec";

thread_local! {
    /// Dispatchers of the loops owned by this thread, by loop id.
    static OWNER_DISPATCHERS: RefCell<Vec<(usize, WeakDispatcher)>> =
        const { RefCell::new(Vec::new()) };
}

fn owner_dispatcher(loop_id: usize) -> Option<Dispatcher> {
    OWNER_DISPATCHERS.with(|d| {
        d.borrow()
            .iter()
            .find(|(id, _)| *id == loop_id)
            .and_then(|(_, weak)| weak.upgrade())
    })
}

/// Cross-thread command entry point.  `Send`; clone freely.
#[derive(Clone)]
pub struct CommandBus {
    sender: EventSender,
    exec: EventType,
}

impl CommandBus {
    /// Must be created on the loop's owner thread.
    pub fn new(event_loop: &EventLoop) -> Self {
        let sender = event_loop.sender();
        let loop_id = sender.loop_id();
        let weak = event_loop.dispatcher().downgrade();
        OWNER_DISPATCHERS.with(|d| {
            let mut d = d.borrow_mut();
            d.retain(|(id, w)| *id != loop_id && w.upgrade().is_some());
            d.push((loop_id, weak));
        });
        Self {
            sender,
            exec: registry::event_type(COMMAND_CLASS, COMMAND_EXEC),
        }
    }

    pub fn exec_type(&self) -> EventType {
        self.exec
    }

    /// Run `line` and return whether some command accepted it.
    pub fn execute(&self, line: &str) -> Result<bool> {
        let event = Event::text(self.exec, line);
        if !self.sender.is_owner_thread() {
            return self.sender.call(event);
        }
        match owner_dispatcher(self.sender.loop_id()) {
            Some(d) => Ok(d.call(event)),
            None => Err(Error::WouldDeadlock),
        }
    }

    /// Fire-and-forget variant; the outcome is only logged.
    pub fn submit(&self, line: &str) -> bool {
        let text = String::from(line);
        self.sender.post(
            Envelope::new(Event::text(self.exec, line)).on_process(
                move |_, processed| {
                    if !processed {
                        warn!("command: '{}' not handled", text);
                    }
                },
            ),
        )
    }
}

/// Register `f` for lines whose first word is `name`.  `f` gets the rest
/// of the line, trimmed.
pub fn on_command(
    dispatcher: &Dispatcher,
    name: &'static str,
    mut f: impl FnMut(&str) -> bool + 'static,
) -> HandlerId {
    let exec = registry::event_type(COMMAND_CLASS, COMMAND_EXEC);
    dispatcher.on_event(exec, move |event| {
        let Some(line) = event.as_text() else {
            return false;
        };
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        if word != name {
            return false;
        }
        debug!("command: {}", line);
        f(rest.trim())
    })
}

//! Event type registry.
//!
//! Interns `(class, name)` string pairs into 32-bit [`EventType`] values:
//! the upper 16 bits are the class id, the lower 16 bits the name id.
//!
//! ```text
//!  "modem" ──▶ class 0x0003 ─┐
//!                            ├──▶ EventType 0x0003_0002
//!  "rx"    ──▶ name  0x0002 ─┘
//!
//!  name id 0 = class wildcard (matches every name in the class)
//! ```
//!
//! Ids are assigned on first use, monotonically, and never change or get
//! reused.  Creating and non-creating lookups all take the same short
//! critical-section lock, so any thread may register or resolve types.

use core::cell::RefCell;
use core::fmt;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::error;

use crate::error::{Error, Result};

/// Placeholder printed for ids that were never assigned.
const UNKNOWN_NAME: &str = "?";

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// A registered event type: 16-bit class id + 16-bit name id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventType(u32);

impl EventType {
    /// Sentinel returned by the non-creating lookups.
    pub const NOT_FOUND: Self = Self(0);

    pub const fn from_parts(class_id: u16, name_id: u16) -> Self {
        Self(((class_id as u32) << 16) | name_id as u32)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn class_id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn name_id(self) -> u16 {
        self.0 as u16
    }

    pub const fn is_found(self) -> bool {
        self.0 != Self::NOT_FOUND.0
    }

    /// True for a class-level type (name id 0).
    pub const fn is_class_wildcard(self) -> bool {
        self.name_id() == 0 && self.class_id() != 0
    }

    /// The class wildcard this type belongs to.
    pub const fn class(self) -> Self {
        Self::from_parts(self.class_id(), 0)
    }

    /// Handler eligibility: exact type, or class wildcard of the same class.
    pub const fn matches(self, event: EventType) -> bool {
        self.0 == event.0 || (self.is_class_wildcard() && self.class_id() == event.class_id())
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventType({:#010x} {})", self.0, self)
    }
}

/// `class/name`, resolved through the process-wide registry.  Types from
/// a private [`EventTypeRegistry`] format with
/// [`EventTypeRegistry::describe`] instead.
impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_class_wildcard() {
            write!(f, "{}/*", class_name(*self))
        } else {
            write!(f, "{}/{}", class_name(*self), event_name(*self))
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct ClassEntry {
    name: String,
    /// Index `i` holds name id `i + 1`.
    names: Vec<String>,
}

struct Tables {
    /// Index `i` holds class id `i + 1`.
    classes: Vec<ClassEntry>,
}

impl Tables {
    const fn new() -> Self {
        Self {
            classes: Vec::new(),
        }
    }

    fn find_class(&self, class: &str) -> Option<u16> {
        self.classes
            .iter()
            .position(|c| c.name == class)
            .map(|i| (i + 1) as u16)
    }

    fn intern_class(&mut self, class: &str) -> Result<u16> {
        if let Some(id) = self.find_class(class) {
            return Ok(id);
        }
        if self.classes.len() >= usize::from(u16::MAX) {
            return Err(Error::RegistryExhausted);
        }
        self.classes.push(ClassEntry {
            name: class.to_owned(),
            names: Vec::new(),
        });
        Ok(self.classes.len() as u16)
    }

    fn find_name(&self, class_id: u16, name: &str) -> Option<u16> {
        self.entry(class_id)?
            .names
            .iter()
            .position(|n| n == name)
            .map(|i| (i + 1) as u16)
    }

    fn intern_name(&mut self, class_id: u16, name: &str) -> Result<u16> {
        if let Some(id) = self.find_name(class_id, name) {
            return Ok(id);
        }
        let entry = self
            .classes
            .get_mut(usize::from(class_id).wrapping_sub(1))
            .ok_or(Error::RegistryExhausted)?;
        if entry.names.len() >= usize::from(u16::MAX) {
            return Err(Error::RegistryExhausted);
        }
        entry.names.push(name.to_owned());
        Ok(entry.names.len() as u16)
    }

    fn entry(&self, class_id: u16) -> Option<&ClassEntry> {
        self.classes.get(usize::from(class_id).checked_sub(1)?)
    }
}

/// Thread-safe interning table for event classes and names.
///
/// Most code uses the process-wide instance through the free functions
/// ([`class_type`], [`event_type`], ...); a private instance is handy in
/// tests that need predictable ids.
pub struct EventTypeRegistry {
    tables: Mutex<CriticalSectionRawMutex, RefCell<Tables>>,
}

impl EventTypeRegistry {
    pub const fn new() -> Self {
        Self {
            tables: Mutex::new(RefCell::new(Tables::new())),
        }
    }

    /// Class wildcard type for `class`, creating the class on first use.
    pub fn try_class_type(&self, class: &str) -> Result<EventType> {
        self.tables.lock(|t| {
            let class_id = t.borrow_mut().intern_class(class)?;
            Ok(EventType::from_parts(class_id, 0))
        })
    }

    /// Concrete type for `(class, name)`, creating either on first use.
    pub fn try_event_type(&self, class: &str, name: &str) -> Result<EventType> {
        self.tables.lock(|t| {
            let mut t = t.borrow_mut();
            let class_id = t.intern_class(class)?;
            let name_id = t.intern_name(class_id, name)?;
            Ok(EventType::from_parts(class_id, name_id))
        })
    }

    /// Like [`try_class_type`](Self::try_class_type); exhaustion yields
    /// [`EventType::NOT_FOUND`] so posting fails softly downstream.
    pub fn class_type(&self, class: &str) -> EventType {
        self.try_class_type(class).unwrap_or_else(|e| {
            error!("registry: class '{}' not registered: {}", class, e);
            EventType::NOT_FOUND
        })
    }

    pub fn event_type(&self, class: &str, name: &str) -> EventType {
        self.try_event_type(class, name).unwrap_or_else(|e| {
            error!("registry: event '{}/{}' not registered: {}", class, name, e);
            EventType::NOT_FOUND
        })
    }

    /// Non-creating class lookup.
    pub fn find_class_type(&self, class: &str) -> EventType {
        self.tables.lock(|t| {
            t.borrow()
                .find_class(class)
                .map_or(EventType::NOT_FOUND, |id| EventType::from_parts(id, 0))
        })
    }

    /// Non-creating `(class, name)` lookup.
    pub fn find_event_type(&self, class: &str, name: &str) -> EventType {
        self.tables.lock(|t| {
            let t = t.borrow();
            t.find_class(class)
                .and_then(|c| t.find_name(c, name).map(|n| EventType::from_parts(c, n)))
                .unwrap_or(EventType::NOT_FOUND)
        })
    }

    /// Class name of `ty`, or `"?"` for an unassigned id.
    pub fn class_name(&self, ty: EventType) -> String {
        self.tables.lock(|t| {
            t.borrow()
                .entry(ty.class_id())
                .map_or_else(|| UNKNOWN_NAME.to_owned(), |c| c.name.clone())
        })
    }

    /// Event name of `ty`, `"*"` for a class wildcard, `"?"` if unassigned.
    pub fn event_name(&self, ty: EventType) -> String {
        if ty.is_class_wildcard() {
            return "*".to_owned();
        }
        self.tables.lock(|t| {
            t.borrow()
                .entry(ty.class_id())
                .and_then(|c| c.names.get(usize::from(ty.name_id()).checked_sub(1)?))
                .map_or_else(|| UNKNOWN_NAME.to_owned(), Clone::clone)
        })
    }

    /// `class/name` (or `class/*`) of `ty` as this registry knows it.
    pub fn describe(&self, ty: EventType) -> String {
        format!("{}/{}", self.class_name(ty), self.event_name(ty))
    }

    /// Number of registered classes.
    pub fn class_count(&self) -> usize {
        self.tables.lock(|t| t.borrow().classes.len())
    }
}

impl Default for EventTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Process-wide registry
// ---------------------------------------------------------------------------

static REGISTRY: EventTypeRegistry = EventTypeRegistry::new();

/// The process-wide registry.
pub fn global() -> &'static EventTypeRegistry {
    &REGISTRY
}

pub fn class_type(class: &str) -> EventType {
    REGISTRY.class_type(class)
}

pub fn event_type(class: &str, name: &str) -> EventType {
    REGISTRY.event_type(class, name)
}

pub fn find_class_type(class: &str) -> EventType {
    REGISTRY.find_class_type(class)
}

pub fn find_event_type(class: &str, name: &str) -> EventType {
    REGISTRY.find_event_type(class, name)
}

pub fn class_name(ty: EventType) -> String {
    REGISTRY.class_name(ty)
}

pub fn event_name(ty: EventType) -> String {
    REGISTRY.event_name(ty)
}

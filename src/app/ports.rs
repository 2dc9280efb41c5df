//! Port traits: the boundary between the reference machines and the
//! device drivers.
//!
//! ```text
//!   Driver adapter ──▶ Port trait ──▶ Machine behavior (domain)
//!        ▲                                   │
//!        └──── events via EventSender ◀──────┘
//! ```
//!
//! Ports are called from inside machine handlers and must not block.
//! Anything slow is started here and reported back later as an event.
//! The power supervisor's load-enable line is a plain
//! [`embedded_hal::digital::OutputPin`] and needs no port of its own.

use core::fmt;

// ───────────────────────────────────────────────────────────────
// Modem port (domain → modem driver)
// ───────────────────────────────────────────────────────────────

/// Synchronous refusal by the modem driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemError {
    /// Another AT command is in flight.
    Busy,
    /// Not registered on the network.
    Offline,
}

impl fmt::Display for ModemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "modem busy"),
            Self::Offline => write!(f, "modem offline"),
        }
    }
}

/// Command side of the modem driver used by the confirmed-send flow.
///
/// After `send_chunk` returns `Ok`, the driver reports progress as
/// `modem/accepted` (or `modem/rejected`), then `modem/transmitted`, and
/// finally `modem/confirmed` once the server acknowledged the upload.
pub trait ModemPort {
    /// Start sending one chunk.
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), ModemError>;

    /// Drop whatever is in flight and return the driver to idle.
    fn abort(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Power rail port (domain → PMIC)
// ───────────────────────────────────────────────────────────────

/// Main supply rail of the power supervisor.
pub trait PowerRail {
    fn set_enabled(&mut self, on: bool);

    /// Power-good comparator.  Also reported as `power/rail_good`.
    fn is_good(&self) -> bool;
}

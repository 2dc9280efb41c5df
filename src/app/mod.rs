//! Reference subsystems built on the reactor core.
//!
//! Each subsystem expresses its control logic as one or more machines
//! and reaches hardware only through the port traits in [`ports`], so
//! everything here runs unchanged against mock adapters on the host.
//!
//! - [`modem`]: chunked confirmed send with retries.
//! - [`power`]: rail sequencing plus a cooperating load sub-flow.
//! - [`commands`]: command-line execution over the event loop.

pub mod commands;
pub mod modem;
pub mod ports;
pub mod power;

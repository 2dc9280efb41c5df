//! Host log backend.
//!
//! Implements [`log::Log`] by writing one line per record to stderr with
//! the uptime, level and target.  On the device the vendor logger takes
//! this role; the core only ever talks to the `log` facade.

use std::io::Write;

use log::{Level, Log, Metadata, Record};

use crate::adapters::time::MonotonicClock;
use crate::scheduler::Clock;

/// Environment variable holding the max level (`error` .. `trace`).
pub const LOG_LEVEL_ENV: &str = "REACTOR_LOG";

/// Stderr logger with a fixed max level.
pub struct StderrLogger {
    level: Level,
    clock: MonotonicClock,
}

impl StderrLogger {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            clock: MonotonicClock::new(),
        }
    }

    /// Install as the global logger, level from [`LOG_LEVEL_ENV`]
    /// (default `info`).
    pub fn init_from_env() -> Result<(), log::SetLoggerError> {
        let level = std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|v| v.parse::<Level>().ok())
            .unwrap_or(Level::Info);
        log::set_boxed_logger(Box::new(Self::new(level)))?;
        log::set_max_level(level.to_level_filter());
        Ok(())
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let us = self.clock.now_micros();
        let mut err = std::io::stderr().lock();
        let _ = writeln!(
            err,
            "[{:>6}.{:03}] {:<5} {}: {}",
            us / 1_000_000,
            (us / 1_000) % 1_000,
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

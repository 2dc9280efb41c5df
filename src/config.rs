//! Event loop and machine configuration parameters
//!
//! All tunable parameters of the reactor core.  Values can be overridden
//! from a JSON blob (command line / provisioning) or a postcard blob kept
//! by the persistence layer.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Depth of the bounded cross-thread event queue.
pub const EVENT_QUEUE_DEPTH: usize = 32;

/// Capacity of a machine's state-conditioned pending input list.
pub const MAX_PENDING_INPUTS: usize = 8;

/// Event loop configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// How long `post` waits for queue space before giving up (milliseconds)
    pub post_wait_ms: u32,
    /// Events pulled per `run_once` before timers get another turn
    pub max_events_per_run: u16,
    /// Defaults applied to machines created on this loop
    pub machine: MachineConfig,
}

/// What a machine does when its handler reports a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ViolationPolicy {
    /// Log the `(state, input)` pair and stay in the current state.
    #[default]
    Park,
    /// Log, then ignore every further input until `restart()`.
    Halt,
    /// Log, then transition back to the initial state.
    Restart,
}

/// Per-machine engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Chained transitions allowed inside one external input
    pub max_transition_chain: u32,
    /// Protocol violation handling
    pub violation_policy: ViolationPolicy,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            max_transition_chain: 1000,
            violation_policy: ViolationPolicy::Park,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            post_wait_ms: 20,
            max_events_per_run: 10,
            machine: MachineConfig::default(),
        }
    }
}

impl LoopConfig {
    /// Parse and validate a JSON configuration blob.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|_| Error::Config("malformed JSON"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would starve timers or block posters forever.
    pub fn validate(&self) -> Result<()> {
        if self.post_wait_ms == 0 {
            return Err(Error::Config("post_wait_ms must be > 0"));
        }
        if self.post_wait_ms > 1000 {
            return Err(Error::Config("post_wait_ms must be <= 1000"));
        }
        if self.max_events_per_run == 0 {
            return Err(Error::Config("max_events_per_run must be > 0"));
        }
        self.machine.validate()
    }
}

impl MachineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_transition_chain == 0 {
            return Err(Error::Config("max_transition_chain must be > 0"));
        }
        Ok(())
    }
}

//! Adapters: host implementations of the core's outward-facing ports.
//!
//! | Adapter    | Implements     | Connects to                      |
//! |------------|----------------|----------------------------------|
//! | `time`     | Clock          | embassy-time driver / test clock |
//! | `log_sink` | log::Log       | stderr (host simulation)         |

pub mod log_sink;
pub mod time;

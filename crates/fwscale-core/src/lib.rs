//! fwscale-core — shared types, settings, and helpers for the fwscale crates.

pub mod config;
pub mod poll;
pub mod types;

pub use config::{AutoscaleSettings, FwscaleConfig};
pub use poll::{wait_for, PollOptions, WaitError};
pub use types::*;

/// Current wall-clock time as epoch milliseconds.
///
/// Every timeout in the system is computed by comparing a stored epoch-ms
/// timestamp against this value; there are no background timers.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

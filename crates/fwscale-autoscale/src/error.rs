//! Orchestrator errors.
//!
//! Only failures that must abort a heartbeat request appear here.
//! Conditional-write conflicts and stale heartbeats are absorbed by the
//! orchestrator and never surface as errors.

use thiserror::Error;

use fwscale_state::StateError;

use crate::platform::PlatformError;

pub type AutoscaleResult<T> = Result<T, AutoscaleError>;

#[derive(Debug, Error)]
pub enum AutoscaleError {
    /// The calling VM is not a member of any known scaling group.
    #[error("vm not found: {0}")]
    VmNotFound(String),

    #[error("record store: {0}")]
    State(#[from] StateError),

    #[error("platform: {0}")]
    Platform(#[from] PlatformError),
}

//! fwscale-health — heartbeat-driven health evaluation.
//!
//! Classifies each inbound heartbeat against the VM's stored
//! `HealthCheckRecord` and produces the updated record. Evaluation is pure:
//! it reads no clock and touches no storage, so the orchestrator decides
//! what to persist.
//!
//! # Classification
//!
//! ```text
//! no stored record          → FirstHeartbeat
//! seq <= stored.seq         → Dropped (record untouched)
//! delay = arrival - expected - allowance
//!   delay <= 0              → OnTime
//!   delay <= stored interval→ Late
//!   otherwise               → TooLate
//! ```
//!
//! # Sync Recovery
//!
//! A VM whose loss count reaches the maximum goes `OutOfSync` and must
//! deliver an unbroken streak of `sync_recovery_threshold` on-time
//! heartbeats to return `InSync`. Any late heartbeat restarts the streak.
//! When `terminate_on_unhealthy` is set, recovery tracking is skipped and
//! the evaluation asks for the VM to be removed instead.

pub mod evaluator;
pub mod sync;

pub use evaluator::{evaluate, Classification, Evaluation, Heartbeat, HeartbeatSyncConfig};
pub use sync::{ConstantIntervalSync, HeartbeatSyncStrategy};

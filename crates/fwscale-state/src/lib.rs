//! fwscale-state — record store for cluster coordination.
//!
//! Holds the only two shared mutable resources of the system: one
//! `HealthCheckRecord` per VM and at most one live `PrimaryRecord` per
//! scaling-group cluster. Both are mutated exclusively through conditional
//! writes that carry an explicit precondition object describing the
//! expected prior state.
//!
//! # Architecture
//!
//! ```text
//! RecordStore (trait)
//!   └── StateStore (redb)
//!       ├── health_checks  vm_id              → HealthCheckRecord
//!       └── primaries      scaling_group_name → PrimaryRecord
//! ```
//!
//! redb serializes write transactions, so a precondition checked inside a
//! write transaction holds at commit time. No in-process locks are used.

pub mod conditions;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use conditions::{HealthCheckCondition, PrimaryCreateCondition, PrimaryUpdateCondition};
pub use error::{StateError, StateResult};
pub use store::{PrimaryFilter, RecordStore, StateStore};
pub use types::*;

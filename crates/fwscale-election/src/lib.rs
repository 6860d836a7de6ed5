//! fwscale-election — primary election for a scaling-group cluster.
//!
//! An election is a single conditional write of a `PrimaryRecord`. Many
//! invocations may attempt it at once; the record store lets exactly one
//! of them win and the rest observe a conflict and stand down.
//!
//! # Flow
//!
//! ```text
//! prepare(PrimaryElection)
//! apply(now)
//!   ├── candidate outside preferred group → ShouldContinue, no write
//!   ├── candidate known unhealthy         → ShouldContinue, no write
//!   ├── candidate healthy                 → write Done
//!   ├── otherwise                         → write Pending (confirmed later)
//!   └── conflict                          → ShouldStop, adopt the winner
//! result() → PrimaryElection with new_primary_record filled in
//! ```

pub mod election;
pub mod strategy;

pub use election::{ElectionOutcome, PrimaryElection};
pub use strategy::{ElectionStrategy, PreferredGroupElection};

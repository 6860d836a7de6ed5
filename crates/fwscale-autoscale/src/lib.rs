//! fwscale-autoscale — per-heartbeat orchestration.
//!
//! Each inbound heartbeat is handled by a fresh `HeartbeatSync` that owns
//! the request's working state and shares nothing with other requests.
//! Coordination with concurrent requests happens only through conditional
//! writes in the record store.
//!
//! # Request Lifecycle
//!
//! ```text
//! ResolveTarget ──(unknown vm)──▶ VmNotFound
//!   │
//!   ├── first heartbeat? → Platform::on_vm_launched
//!   ▼
//! EvaluateHealth ──(Dropped)──▶ empty response
//!   ▼
//! ResolvePrimary → RunElection → StampPrimaryIp → PersistHealthRecord
//!   │
//!   ├── unhealthy & terminate policy → remove from group + notify
//!   ▼
//! Respond
//! ```
//!
//! # Election Branches
//!
//! ```text
//! no primary vm or record → elect
//! record Pending          → target is candidate & healthy? finalize Done
//! record Timeout          → forget it, elect
//! record Done             → primary unhealthy? elect
//! ```

pub mod error;
pub mod heartbeat;
pub mod inventory;
pub mod platform;

pub use error::{AutoscaleError, AutoscaleResult};
pub use heartbeat::{HeartbeatRequest, HeartbeatResponse, HeartbeatSync};
pub use inventory::{InventoryPlatform, Notification};
pub use platform::{Platform, PlatformError, PlatformFuture};

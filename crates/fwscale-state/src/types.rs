//! Persisted record types.
//!
//! All times are epoch milliseconds. Timeouts are derived at read time by
//! comparing a stored timestamp with the caller's clock.

use serde::{Deserialize, Serialize};

use fwscale_core::{VirtualMachine, VmId};

// ── Health check ──────────────────────────────────────────────────

/// Whether a VM's heartbeats currently arrive within tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    InSync,
    OutOfSync,
}

/// Liveness tracking for one VM, mutated on every accepted heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckRecord {
    pub vm_id: VmId,
    pub scaling_group_name: String,
    pub ip: String,
    /// IP of the primary as last reported to this VM.
    pub primary_ip: Option<String>,
    /// Interval announced by the VM's latest accepted heartbeat.
    pub heartbeat_interval_ms: u64,
    pub heartbeat_loss_count: u32,
    /// When the next heartbeat is expected.
    pub next_heartbeat_time: u64,
    pub sync_state: SyncState,
    /// Remaining on-time heartbeats before an out-of-sync VM is back in sync.
    pub sync_recovery_count: u32,
    /// Sequence number of the latest accepted heartbeat.
    pub seq: u64,
    pub healthy: bool,
    pub up_to_date: bool,
}

impl HealthCheckRecord {
    /// Whether the VM counts as a live, fully synchronized cluster member.
    pub fn is_healthy_in_sync(&self) -> bool {
        self.healthy && self.sync_state == SyncState::InSync
    }

    /// Heartbeats the VM has failed to send as of `now`.
    ///
    /// Counts one miss as soon as the allowance past the expected arrival
    /// runs out, and one more per announced interval after that.
    pub fn missed_heartbeats(&self, now: u64, delay_allowance_ms: u64) -> u64 {
        let deadline = self.next_heartbeat_time.saturating_add(delay_allowance_ms);
        if now <= deadline {
            return 0;
        }
        (now - deadline).div_ceil(self.heartbeat_interval_ms.max(1))
    }

    /// Health as of `now`, counting heartbeats that never arrived.
    ///
    /// `healthy` is only recomputed when the VM itself checks in; a VM that
    /// went silent keeps its last stored verdict until read through here.
    pub fn is_healthy_at(&self, now: u64, delay_allowance_ms: u64, max_loss_count: u32) -> bool {
        let losses = u64::from(self.heartbeat_loss_count)
            .saturating_add(self.missed_heartbeats(now, delay_allowance_ms));
        self.healthy && losses < u64::from(max_loss_count)
    }
}

// ── Primary ───────────────────────────────────────────────────────

/// Progress of a primary election.
///
/// `Timeout` is normally not stored: a `Pending` record whose vote window
/// has ended reads as `Timeout` (see [`PrimaryRecord::effective_vote_state`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteState {
    Pending,
    Done,
    Timeout,
}

/// The elected (or candidate) primary of a scaling-group cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrimaryRecord {
    pub id: String,
    pub vm_id: VmId,
    pub ip: String,
    pub scaling_group_name: String,
    pub virtual_network_id: String,
    pub subnet_id: String,
    pub vote_end_time: u64,
    pub vote_state: VoteState,
}

impl PrimaryRecord {
    /// Build a record naming `vm` as primary.
    pub fn for_vm(vm: &VirtualMachine, vote_state: VoteState, vote_end_time: u64) -> Self {
        Self {
            id: Self::record_id(&vm.scaling_group_name, &vm.id),
            vm_id: vm.id.clone(),
            ip: vm.primary_private_ip.clone(),
            scaling_group_name: vm.scaling_group_name.clone(),
            virtual_network_id: vm.virtual_network_id.clone(),
            subnet_id: vm.subnet_id.clone(),
            vote_end_time,
            vote_state,
        }
    }

    /// Record id derived from scaling group and VM id.
    pub fn record_id(scaling_group_name: &str, vm_id: &str) -> String {
        format!("{scaling_group_name}:{vm_id}")
    }

    /// Vote state as observed at `now`.
    pub fn effective_vote_state(&self, now: u64) -> VoteState {
        match self.vote_state {
            VoteState::Pending if now >= self.vote_end_time => VoteState::Timeout,
            state => state,
        }
    }

    /// Whether this record still blocks a fresh election at `now`.
    pub fn is_live(&self, now: u64) -> bool {
        self.effective_vote_state(now) != VoteState::Timeout
    }

    /// Build the key for the primaries table.
    pub fn table_key(&self) -> &str {
        &self.scaling_group_name
    }
}

impl HealthCheckRecord {
    /// Build the key for the health checks table.
    pub fn table_key(&self) -> &str {
        &self.vm_id
    }
}

//! Heartbeat evaluation.
//!
//! Turns a stored health-check record plus one inbound heartbeat into the
//! next record and a classification of the heartbeat's timeliness.

use tracing::{debug, info, warn};

use fwscale_core::{AutoscaleSettings, VirtualMachine};
use fwscale_state::{HealthCheckRecord, SyncState};

/// One liveness call from a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub seq: u64,
    /// Interval the VM announces until its next heartbeat.
    pub interval_ms: u64,
    /// Epoch ms at which the heartbeat reached the orchestrator.
    pub arrival_time: u64,
}

/// Thresholds used to classify heartbeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatSyncConfig {
    pub delay_allowance_ms: u64,
    pub max_loss_count: u32,
    pub sync_recovery_threshold: u32,
    pub terminate_on_unhealthy: bool,
}

impl From<&AutoscaleSettings> for HeartbeatSyncConfig {
    fn from(settings: &AutoscaleSettings) -> Self {
        Self {
            delay_allowance_ms: settings.heartbeat_delay_allowance_ms,
            max_loss_count: settings.heartbeat_loss_count_max,
            sync_recovery_threshold: settings.sync_recovery_threshold,
            terminate_on_unhealthy: settings.terminate_unhealthy_vm,
        }
    }
}

/// Timeliness of a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The VM has no record yet.
    FirstHeartbeat,
    OnTime,
    /// Late by at most one stored interval.
    Late,
    /// Late by more than one stored interval.
    TooLate,
    /// Sequence did not advance; nothing may be persisted.
    Dropped,
}

/// Outcome of evaluating one heartbeat.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Updated record, or the stored record untouched when dropped.
    pub record: HealthCheckRecord,
    pub classification: Classification,
    /// Milliseconds past the expected arrival, after the allowance.
    /// Zero for first and dropped heartbeats.
    pub delay_ms: i64,
    /// The VM is unhealthy under the terminate-on-unhealthy policy.
    pub terminate: bool,
}

impl Evaluation {
    pub fn is_dropped(&self) -> bool {
        self.classification == Classification::Dropped
    }

    pub fn is_first_heartbeat(&self) -> bool {
        self.classification == Classification::FirstHeartbeat
    }
}

/// Evaluate `heartbeat` against the VM's stored record.
///
/// `vm` supplies identity for a first heartbeat only. Never fails: odd
/// timing degrades the record to unhealthy instead.
pub fn evaluate(
    stored: Option<&HealthCheckRecord>,
    vm: &VirtualMachine,
    heartbeat: &Heartbeat,
    config: &HeartbeatSyncConfig,
) -> Evaluation {
    let Some(stored) = stored else {
        debug!(vm_id = %vm.id, seq = heartbeat.seq, "first heartbeat");
        return Evaluation {
            record: HealthCheckRecord {
                vm_id: vm.id.clone(),
                scaling_group_name: vm.scaling_group_name.clone(),
                ip: vm.primary_private_ip.clone(),
                primary_ip: None,
                heartbeat_interval_ms: heartbeat.interval_ms,
                heartbeat_loss_count: 0,
                next_heartbeat_time: heartbeat.arrival_time.saturating_add(heartbeat.interval_ms),
                sync_state: SyncState::InSync,
                sync_recovery_count: 0,
                seq: heartbeat.seq,
                healthy: true,
                up_to_date: true,
            },
            classification: Classification::FirstHeartbeat,
            delay_ms: 0,
            terminate: false,
        };
    };

    if heartbeat.seq <= stored.seq {
        debug!(
            vm_id = %stored.vm_id,
            seq = heartbeat.seq,
            stored_seq = stored.seq,
            "heartbeat dropped"
        );
        return Evaluation {
            record: stored.clone(),
            classification: Classification::Dropped,
            delay_ms: 0,
            terminate: false,
        };
    }

    let delay_ms = clamp_i64(
        heartbeat.arrival_time as i128
            - stored.next_heartbeat_time as i128
            - config.delay_allowance_ms as i128,
    );
    let classification = if delay_ms <= 0 {
        Classification::OnTime
    } else if delay_ms <= clamp_i64(stored.heartbeat_interval_ms as i128) {
        Classification::Late
    } else {
        Classification::TooLate
    };

    let mut record = stored.clone();
    let was_in_sync = record.sync_state == SyncState::InSync;

    match classification {
        Classification::OnTime if was_in_sync => record.heartbeat_loss_count = 0,
        Classification::OnTime => {}
        _ => record.heartbeat_loss_count = record.heartbeat_loss_count.saturating_add(1),
    }
    record.healthy = record.heartbeat_loss_count < config.max_loss_count;

    if !config.terminate_on_unhealthy {
        track_sync_recovery(&mut record, was_in_sync, classification, config);
    }

    record.heartbeat_interval_ms = heartbeat.interval_ms;
    record.next_heartbeat_time = heartbeat.arrival_time.saturating_add(heartbeat.interval_ms);
    record.seq = heartbeat.seq;
    record.up_to_date = true;

    let terminate = config.terminate_on_unhealthy && !record.healthy;

    debug!(
        vm_id = %record.vm_id,
        seq = record.seq,
        ?classification,
        delay_ms,
        loss_count = record.heartbeat_loss_count,
        healthy = record.healthy,
        "heartbeat evaluated"
    );

    Evaluation {
        record,
        classification,
        delay_ms,
        terminate,
    }
}

fn clamp_i64(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

fn track_sync_recovery(
    record: &mut HealthCheckRecord,
    was_in_sync: bool,
    classification: Classification,
    config: &HeartbeatSyncConfig,
) {
    if was_in_sync {
        if !record.healthy {
            record.sync_state = SyncState::OutOfSync;
            record.sync_recovery_count = config.sync_recovery_threshold;
            warn!(
                vm_id = %record.vm_id,
                loss_count = record.heartbeat_loss_count,
                recovery_count = record.sync_recovery_count,
                "vm out of sync"
            );
        }
        return;
    }

    if classification == Classification::OnTime {
        record.sync_recovery_count = record.sync_recovery_count.saturating_sub(1);
        if record.sync_recovery_count == 0 {
            record.sync_state = SyncState::InSync;
            record.heartbeat_loss_count = 0;
            record.healthy = true;
            info!(vm_id = %record.vm_id, "vm back in sync");
            return;
        }
    } else {
        record.sync_recovery_count = config.sync_recovery_threshold;
    }
    record.healthy = false;
}

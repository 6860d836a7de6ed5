//! Heartbeat request handling.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use fwscale_core::{vm_equals, AutoscaleSettings, VirtualMachine, VmRole};
use fwscale_election::{ElectionStrategy, PreferredGroupElection, PrimaryElection};
use fwscale_health::{Classification, ConstantIntervalSync, Heartbeat, HeartbeatSyncStrategy};
use fwscale_state::{
    HealthCheckCondition, HealthCheckRecord, PrimaryFilter, PrimaryRecord, PrimaryUpdateCondition,
    RecordStore, StateError, VoteState,
};

use crate::error::{AutoscaleError, AutoscaleResult};
use crate::platform::Platform;

const UNHEALTHY_SUBJECT: &str = "FortiGate autoscale: unhealthy vm removed";

/// A heartbeat as extracted by the transport adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatRequest {
    pub vm_id: String,
    pub seq: u64,
    pub interval_ms: u64,
    /// Epoch ms at which the request arrived.
    pub arrival_time: u64,
}

/// What the calling VM is told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatResponse {
    pub classification: Classification,
    /// Private IP of the current primary, if one is known.
    pub primary_ip: Option<String>,
}

impl HeartbeatResponse {
    fn empty(classification: Classification) -> Self {
        Self {
            classification,
            primary_ip: None,
        }
    }
}

/// Orchestrates one heartbeat request.
///
/// Build one per request. Nothing learned here outlives the request; all
/// coordination with concurrent requests goes through conditional writes.
pub struct HeartbeatSync {
    store: Arc<dyn RecordStore>,
    platform: Arc<dyn Platform>,
    settings: AutoscaleSettings,
    sync: Box<dyn HeartbeatSyncStrategy>,
    election: Box<dyn ElectionStrategy>,
}

impl HeartbeatSync {
    /// Orchestrator with constant-interval health tracking and
    /// preferred-group elections.
    pub fn new(
        store: Arc<dyn RecordStore>,
        platform: Arc<dyn Platform>,
        settings: AutoscaleSettings,
    ) -> Self {
        let sync = Box::new(ConstantIntervalSync::from_settings(&settings));
        let election = Box::new(PreferredGroupElection::new(store.clone()));
        Self {
            store,
            platform,
            settings,
            sync,
            election,
        }
    }

    pub fn with_sync_strategy(mut self, sync: Box<dyn HeartbeatSyncStrategy>) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_election_strategy(mut self, election: Box<dyn ElectionStrategy>) -> Self {
        self.election = election;
        self
    }

    fn cluster(&self) -> PrimaryFilter {
        PrimaryFilter::cluster(&self.settings.preferred_scaling_group)
    }

    /// Run the full lifecycle for one heartbeat.
    ///
    /// Fails only when the VM is unknown or storage/platform calls fail
    /// outright. Conflicts with concurrent requests are logged and absorbed.
    pub async fn handle_heartbeat(
        &mut self,
        req: HeartbeatRequest,
    ) -> AutoscaleResult<HeartbeatResponse> {
        let now = req.arrival_time;

        let Some(target) = self.platform.get_vm(&req.vm_id).await? else {
            warn!(vm_id = %req.vm_id, "heartbeat from unknown vm");
            return Err(AutoscaleError::VmNotFound(req.vm_id));
        };

        let stored = self.store.get_health_check_record(&target.id)?;
        let first_heartbeat = stored.is_none();
        if first_heartbeat {
            if let Err(e) = self.platform.on_vm_launched(&target).await {
                warn!(vm_id = %target.id, error = %e, "launch hook failed");
            }
        }

        let heartbeat = Heartbeat {
            seq: req.seq,
            interval_ms: req.interval_ms,
            arrival_time: now,
        };
        let evaluation = self.sync.evaluate(stored.as_ref(), &target, &heartbeat);
        if evaluation.is_dropped() {
            return Ok(HeartbeatResponse::empty(Classification::Dropped));
        }
        let classification = evaluation.classification;
        let mut health = evaluation.record;
        debug!(
            vm_id = %target.id,
            seq = health.seq,
            ?classification,
            delay_ms = evaluation.delay_ms,
            healthy = health.healthy,
            "heartbeat evaluated"
        );

        let primary = self
            .sync_primary(&target, &health, first_heartbeat, now)
            .await?;

        health.primary_ip = match &primary {
            Some(p) if vm_equals(&target, p) => Some(target.primary_private_ip.clone()),
            Some(p) => Some(p.primary_private_ip.clone()),
            None => None,
        };

        let persisted = match &stored {
            None => self.store.create_health_check_record(&health),
            Some(prev) => self
                .store
                .update_health_check_record(&health, &HealthCheckCondition::unchanged_since(prev)),
        };
        match persisted {
            Ok(()) => {}
            Err(StateError::Conflict(reason)) => {
                warn!(vm_id = %target.id, seq = health.seq, %reason, "health check write lost a race");
            }
            Err(e) => return Err(e.into()),
        }

        if evaluation.terminate {
            self.remove_unhealthy(&target).await;
        }

        Ok(HeartbeatResponse {
            classification,
            primary_ip: health.primary_ip,
        })
    }

    /// Forget a VM that left the cluster. Returns true if it had a record.
    pub fn handle_vm_removed(&self, vm_id: &str) -> AutoscaleResult<bool> {
        let existed = self.store.delete_health_check_record(vm_id)?;
        if existed {
            info!(%vm_id, "health check record removed");
        }
        Ok(existed)
    }

    // ── Primary election ───────────────────────────────────────────

    /// Resolve the cluster primary, electing or finalizing one as needed.
    ///
    /// Returns the primary VM only while its record is live.
    async fn sync_primary(
        &mut self,
        target: &VirtualMachine,
        health: &HealthCheckRecord,
        first_heartbeat: bool,
        now: u64,
    ) -> AutoscaleResult<Option<VirtualMachine>> {
        let mut record = self.store.get_primary_record(&self.cluster())?;
        let mut vm = self.vm_for(target, record.as_ref()).await?;
        // A first heartbeat has proven nothing about the candidate yet.
        let candidate_health = (!first_heartbeat).then(|| health.clone());

        match (vm.clone(), record.clone()) {
            (Some(primary), Some(current)) => match current.effective_vote_state(now) {
                VoteState::Pending => {
                    if current.vm_id == target.id && health.is_healthy_in_sync() {
                        record = self.finalize_pending(&current, target, now).await?;
                        if record.as_ref().is_none_or(|r| r.vm_id != primary.id) {
                            vm = self.vm_for(target, record.as_ref()).await?;
                        }
                    }
                }
                VoteState::Timeout => {
                    info!(vm_id = %current.vm_id, "pending primary timed out");
                    (vm, record) = self.elect(target, candidate_health, None, None, now).await?;
                }
                VoteState::Done => {
                    if !self.primary_healthy(&primary, target, health, now)? {
                        warn!(vm_id = %primary.id, "primary unhealthy, electing a replacement");
                        (vm, record) = self
                            .elect(target, candidate_health, Some(primary), Some(current), now)
                            .await?;
                    }
                }
            },
            (old_vm, old_record) => {
                (vm, record) = self
                    .elect(target, candidate_health, old_vm, old_record, now)
                    .await?;
            }
        }

        Ok(vm.filter(|_| record.as_ref().is_some_and(|r| r.is_live(now))))
    }

    /// Run one election attempt with `target` as candidate and adopt
    /// whatever primary the store holds afterwards.
    async fn elect(
        &mut self,
        target: &VirtualMachine,
        candidate_health: Option<HealthCheckRecord>,
        old_vm: Option<VirtualMachine>,
        old_record: Option<PrimaryRecord>,
        now: u64,
    ) -> AutoscaleResult<(Option<VirtualMachine>, Option<PrimaryRecord>)> {
        let election = PrimaryElection::new(target.clone(), &self.settings)
            .with_old_primary(old_vm.clone(), old_record)
            .with_candidate_health_check(candidate_health);
        self.election.prepare(election);
        let outcome = self.election.apply(now)?;

        let result = self.election.result().cloned();
        let elected = result.as_ref().and_then(|r| r.new_primary.clone());
        // Even without a write of our own, a concurrent request may have
        // decided the election.
        let record = match result.and_then(|r| r.new_primary_record) {
            Some(record) => Some(record),
            None => self.store.get_primary_record(&self.cluster())?,
        };
        debug!(
            candidate = %target.id,
            ?outcome,
            primary = ?record.as_ref().map(|r| &r.vm_id),
            "election finished"
        );

        if let Some(new_primary) = &elected {
            self.tag_role(new_primary, VmRole::Primary).await;
            if let Some(old) = old_vm.as_ref().filter(|old| old.id != new_primary.id) {
                self.tag_role(old, VmRole::Secondary).await;
            }
        }

        let vm = self.vm_for(target, record.as_ref()).await?;
        Ok((vm, record))
    }

    /// Flip a pending record to `Done` once its candidate proved liveness.
    async fn finalize_pending(
        &self,
        pending: &PrimaryRecord,
        target: &VirtualMachine,
        now: u64,
    ) -> AutoscaleResult<Option<PrimaryRecord>> {
        let done = PrimaryRecord {
            vote_state: VoteState::Done,
            ..pending.clone()
        };
        let condition = PrimaryUpdateCondition::still_pending(pending, now);
        match self.store.update_primary_record(&done, &condition) {
            Ok(()) => {
                info!(vm_id = %done.vm_id, "primary election finalized");
                self.tag_role(target, VmRole::Primary).await;
                Ok(Some(done))
            }
            Err(StateError::Conflict(reason)) => {
                warn!(vm_id = %pending.vm_id, %reason, "pending primary changed concurrently");
                Ok(self.store.get_primary_record(&self.cluster())?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A primary without a health-check record counts as unhealthy, and so
    /// does one that has stayed silent for too many intervals.
    fn primary_healthy(
        &self,
        primary: &VirtualMachine,
        target: &VirtualMachine,
        target_health: &HealthCheckRecord,
        now: u64,
    ) -> AutoscaleResult<bool> {
        if primary.id == target.id {
            return Ok(target_health.healthy);
        }
        let record = self.store.get_health_check_record(&primary.id)?;
        Ok(record.is_some_and(|r| {
            r.is_healthy_at(
                now,
                self.settings.heartbeat_delay_allowance_ms,
                self.settings.heartbeat_loss_count_max,
            )
        }))
    }

    /// The VM a primary record names, reusing the target's snapshot.
    async fn vm_for(
        &self,
        target: &VirtualMachine,
        record: Option<&PrimaryRecord>,
    ) -> AutoscaleResult<Option<VirtualMachine>> {
        match record {
            None => Ok(None),
            Some(r) if r.vm_id == target.id => Ok(Some(target.clone())),
            Some(r) => Ok(self.platform.get_vm(&r.vm_id).await?),
        }
    }

    // ── Side effects ───────────────────────────────────────────────

    async fn tag_role(&self, vm: &VirtualMachine, role: VmRole) {
        if let Err(e) = self.platform.tag_vm_role(vm, role).await {
            error!(vm_id = %vm.id, ?role, error = %e, "role tagging failed");
        }
    }

    /// Best-effort: a failure here is retried on the VM's next heartbeat.
    async fn remove_unhealthy(&self, vm: &VirtualMachine) {
        warn!(vm_id = %vm.id, group = %vm.scaling_group_name, "removing unhealthy vm");
        if let Err(e) = self.platform.delete_vm_from_scaling_group(&vm.id).await {
            error!(vm_id = %vm.id, error = %e, "unhealthy vm removal failed");
            return;
        }
        if let Err(e) = self.handle_vm_removed(&vm.id) {
            error!(vm_id = %vm.id, error = %e, "health check cleanup failed");
        }
        let message = format!(
            "vm {} in scaling group {} missed too many heartbeats and was removed",
            vm.id, vm.scaling_group_name
        );
        if let Err(e) = self
            .platform
            .send_autoscale_notifications(vm, &message, UNHEALTHY_SUBJECT)
            .await
        {
            error!(vm_id = %vm.id, error = %e, "autoscale notification failed");
        }
    }
}

//! Election strategies.

use std::sync::Arc;

use tracing::{debug, info, warn};

use fwscale_state::{
    PrimaryCreateCondition, PrimaryFilter, PrimaryRecord, RecordStore, StateError, StateResult,
    VoteState,
};

use crate::election::{ElectionOutcome, PrimaryElection};

/// Decides whether and how to write a new primary record.
pub trait ElectionStrategy: Send + Sync {
    /// Load the context for one election attempt.
    fn prepare(&mut self, election: PrimaryElection);

    /// Attempt the election. Conflicts are an outcome, not an error; only
    /// storage failures are returned as `Err`.
    fn apply(&mut self, now: u64) -> StateResult<ElectionOutcome>;

    /// The prepared context with the outcome filled in.
    fn result(&self) -> Option<&PrimaryElection>;
}

/// Only candidates from the preferred scaling group may become primary.
pub struct PreferredGroupElection {
    store: Arc<dyn RecordStore>,
    election: Option<PrimaryElection>,
}

impl PreferredGroupElection {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            election: None,
        }
    }
}

impl ElectionStrategy for PreferredGroupElection {
    fn prepare(&mut self, election: PrimaryElection) {
        self.election = Some(election);
    }

    fn apply(&mut self, now: u64) -> StateResult<ElectionOutcome> {
        let Some(election) = self.election.as_mut() else {
            warn!("election applied without a prepared context");
            return Ok(ElectionOutcome::ShouldContinue);
        };
        election.sign(now);

        if !election.candidate_eligible() {
            info!(
                signature = %election.signature,
                candidate = %election.candidate.id,
                group = %election.candidate.scaling_group_name,
                preferred = %election.preferred_scaling_group,
                "candidate outside preferred scaling group, not electing"
            );
            return Ok(ElectionOutcome::ShouldContinue);
        }

        if election
            .candidate_health_check
            .as_ref()
            .is_some_and(|hc| !hc.healthy)
        {
            info!(
                signature = %election.signature,
                candidate = %election.candidate.id,
                "candidate unhealthy, not electing"
            );
            return Ok(ElectionOutcome::ShouldContinue);
        }

        // A candidate with proven liveness needs no confirmation round.
        let vote_state = if election.candidate_healthy() {
            VoteState::Done
        } else {
            VoteState::Pending
        };
        let record = PrimaryRecord::for_vm(
            &election.candidate,
            vote_state,
            now.saturating_add(election.election_duration_ms),
        );
        let condition = PrimaryCreateCondition::new(election.old_primary_record.as_ref(), now);

        match self.store.create_primary_record(&record, &condition) {
            Ok(()) => {
                info!(
                    signature = %election.signature,
                    vm_id = %record.vm_id,
                    ?vote_state,
                    replaced = ?condition.replaces,
                    "primary record written"
                );
                election.new_primary = Some(election.candidate.clone());
                election.new_primary_record = Some(record);
                Ok(ElectionOutcome::ShouldContinue)
            }
            Err(StateError::Conflict(reason)) => {
                warn!(
                    signature = %election.signature,
                    candidate = %election.candidate.id,
                    %reason,
                    "election lost to a concurrent writer"
                );
                let winner = self
                    .store
                    .get_primary_record(&PrimaryFilter::cluster(&election.preferred_scaling_group))?;
                debug!(
                    signature = %election.signature,
                    winner = ?winner.as_ref().map(|r| &r.vm_id),
                    "adopting concurrent election result"
                );
                election.new_primary_record = winner;
                Ok(ElectionOutcome::ShouldStop)
            }
            Err(e) => Err(e),
        }
    }

    fn result(&self) -> Option<&PrimaryElection> {
        self.election.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    use fwscale_core::{AutoscaleSettings, VirtualMachine, VmState};
    use fwscale_state::{HealthCheckRecord, StateStore, SyncState};

    const NOW: u64 = 1_000_000;

    fn vm(id: &str, group: &str) -> VirtualMachine {
        VirtualMachine {
            id: id.to_string(),
            scaling_group_name: group.to_string(),
            primary_private_ip: format!("10.0.1.{}", id.len()),
            primary_public_ip: None,
            virtual_network_id: "vpc-1".to_string(),
            subnet_id: "subnet-a".to_string(),
            state: VmState::Running,
        }
    }

    fn settings() -> AutoscaleSettings {
        AutoscaleSettings {
            preferred_scaling_group: "fgt-byol".to_string(),
            election_timeout_secs: 90,
            ..AutoscaleSettings::default()
        }
    }

    fn health(vm_id: &str, healthy: bool) -> HealthCheckRecord {
        HealthCheckRecord {
            vm_id: vm_id.to_string(),
            scaling_group_name: "fgt-byol".to_string(),
            ip: "10.0.1.3".to_string(),
            primary_ip: None,
            heartbeat_interval_ms: 30_000,
            heartbeat_loss_count: if healthy { 0 } else { 3 },
            next_heartbeat_time: NOW + 30_000,
            sync_state: if healthy {
                SyncState::InSync
            } else {
                SyncState::OutOfSync
            },
            sync_recovery_count: 0,
            seq: 4,
            healthy,
            up_to_date: true,
        }
    }

    fn stored_primary(store: &StateStore) -> Option<PrimaryRecord> {
        store
            .get_primary_record(&PrimaryFilter::cluster("fgt-byol"))
            .unwrap()
    }

    #[test]
    fn fresh_candidate_writes_pending() {
        let store = StateStore::open_in_memory().unwrap();
        let mut strategy = PreferredGroupElection::new(Arc::new(store.clone()));
        strategy.prepare(PrimaryElection::new(vm("i-1", "fgt-byol"), &settings()));

        assert_eq!(strategy.apply(NOW).unwrap(), ElectionOutcome::ShouldContinue);

        let result = strategy.result().unwrap();
        let record = result.new_primary_record.as_ref().unwrap();
        assert_eq!(record.vm_id, "i-1");
        assert_eq!(record.vote_state, VoteState::Pending);
        assert_eq!(record.vote_end_time, NOW + 90_000);
        assert_eq!(result.new_primary.as_ref().unwrap().id, "i-1");
        assert!(!result.signature.is_empty());
        assert_eq!(stored_primary(&store).as_ref(), Some(record));
    }

    #[test]
    fn healthy_candidate_fast_finalizes() {
        let store = StateStore::open_in_memory().unwrap();
        let mut strategy = PreferredGroupElection::new(Arc::new(store.clone()));
        strategy.prepare(
            PrimaryElection::new(vm("i-1", "fgt-byol"), &settings())
                .with_candidate_health_check(Some(health("i-1", true))),
        );

        strategy.apply(NOW).unwrap();
        let record = stored_primary(&store).unwrap();
        assert_eq!(record.vote_state, VoteState::Done);
        assert_eq!(record.vote_end_time, NOW + 90_000);
    }

    #[test]
    fn candidate_outside_preferred_group_never_writes() {
        let store = StateStore::open_in_memory().unwrap();
        let mut strategy = PreferredGroupElection::new(Arc::new(store.clone()));
        strategy.prepare(
            PrimaryElection::new(vm("i-9", "fgt-payg"), &settings())
                .with_candidate_health_check(Some(health("i-9", true))),
        );

        assert_eq!(strategy.apply(NOW).unwrap(), ElectionOutcome::ShouldContinue);
        assert!(strategy.result().unwrap().new_primary_record.is_none());
        assert!(stored_primary(&store).is_none());
    }

    #[test]
    fn unhealthy_candidate_never_writes() {
        let store = StateStore::open_in_memory().unwrap();
        let mut strategy = PreferredGroupElection::new(Arc::new(store.clone()));
        strategy.prepare(
            PrimaryElection::new(vm("i-1", "fgt-byol"), &settings())
                .with_candidate_health_check(Some(health("i-1", false))),
        );

        assert_eq!(strategy.apply(NOW).unwrap(), ElectionOutcome::ShouldContinue);
        assert!(stored_primary(&store).is_none());
    }

    #[test]
    fn losing_candidate_stops_and_adopts_winner() {
        let store = StateStore::open_in_memory().unwrap();

        let mut first = PreferredGroupElection::new(Arc::new(store.clone()));
        first.prepare(PrimaryElection::new(vm("i-1", "fgt-byol"), &settings()));
        first.apply(NOW).unwrap();

        let mut second = PreferredGroupElection::new(Arc::new(store.clone()));
        second.prepare(PrimaryElection::new(vm("i-22", "fgt-byol"), &settings()));
        assert_eq!(second.apply(NOW + 1).unwrap(), ElectionOutcome::ShouldStop);

        let result = second.result().unwrap();
        assert!(result.new_primary.is_none());
        assert_eq!(result.new_primary_record.as_ref().unwrap().vm_id, "i-1");
    }

    #[test]
    fn replaces_the_old_primary_it_read() {
        let store = StateStore::open_in_memory().unwrap();
        let old = PrimaryRecord::for_vm(&vm("i-1", "fgt-byol"), VoteState::Done, NOW);
        store
            .create_primary_record(&old, &PrimaryCreateCondition::new(None, NOW))
            .unwrap();

        let mut strategy = PreferredGroupElection::new(Arc::new(store.clone()));
        strategy.prepare(
            PrimaryElection::new(vm("i-22", "fgt-byol"), &settings())
                .with_old_primary(Some(vm("i-1", "fgt-byol")), Some(old))
                .with_candidate_health_check(Some(health("i-22", true))),
        );

        assert_eq!(strategy.apply(NOW).unwrap(), ElectionOutcome::ShouldContinue);
        assert_eq!(stored_primary(&store).unwrap().vm_id, "i-22");
    }

    #[test]
    fn apply_without_prepare_is_a_noop() {
        let store = StateStore::open_in_memory().unwrap();
        let mut strategy = PreferredGroupElection::new(Arc::new(store.clone()));
        assert_eq!(strategy.apply(NOW).unwrap(), ElectionOutcome::ShouldContinue);
        assert!(strategy.result().is_none());
    }

    #[test]
    fn concurrent_attempts_elect_exactly_one() {
        let store = StateStore::open_in_memory().unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = ["i-1", "i-22"]
            .into_iter()
            .map(|id| {
                let store = store.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let mut strategy = PreferredGroupElection::new(Arc::new(store.clone()));
                    strategy.prepare(PrimaryElection::new(vm(id, "fgt-byol"), &settings()));
                    barrier.wait();
                    strategy.apply(NOW).unwrap()
                })
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let stops = outcomes
            .iter()
            .filter(|o| **o == ElectionOutcome::ShouldStop)
            .count();
        assert_eq!(stops, 1);
        assert!(stored_primary(&store).is_some());
    }
}

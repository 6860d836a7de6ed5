//! Election context.

use sha2::{Digest, Sha256};

use fwscale_core::{AutoscaleSettings, VirtualMachine};
use fwscale_state::{HealthCheckRecord, PrimaryRecord};

/// What the caller should do after an election attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// Proceed with the request; the election either wrote or had nothing
    /// to do.
    ShouldContinue,
    /// Another invocation won the race. Do not retry in this request.
    ShouldStop,
}

/// Per-request election state. Only `new_primary_record` is ever persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryElection {
    pub old_primary: Option<VirtualMachine>,
    pub old_primary_record: Option<PrimaryRecord>,
    pub new_primary: Option<VirtualMachine>,
    pub new_primary_record: Option<PrimaryRecord>,
    pub candidate: VirtualMachine,
    /// Candidate's health as of this request, if it had a record before.
    pub candidate_health_check: Option<HealthCheckRecord>,
    pub preferred_scaling_group: String,
    pub election_duration_ms: u64,
    /// Correlates the log lines of one election attempt.
    pub signature: String,
}

impl PrimaryElection {
    pub fn new(candidate: VirtualMachine, settings: &AutoscaleSettings) -> Self {
        Self {
            old_primary: None,
            old_primary_record: None,
            new_primary: None,
            new_primary_record: None,
            candidate,
            candidate_health_check: None,
            preferred_scaling_group: settings.preferred_scaling_group.clone(),
            election_duration_ms: settings.election_duration_ms(),
            signature: String::new(),
        }
    }

    pub fn with_old_primary(
        mut self,
        vm: Option<VirtualMachine>,
        record: Option<PrimaryRecord>,
    ) -> Self {
        self.old_primary = vm;
        self.old_primary_record = record;
        self
    }

    pub fn with_candidate_health_check(mut self, record: Option<HealthCheckRecord>) -> Self {
        self.candidate_health_check = record;
        self
    }

    /// Stamp the signature for an attempt made at `now`.
    pub fn sign(&mut self, now: u64) {
        let mut hasher = Sha256::new();
        hasher.update(self.candidate.id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.candidate.scaling_group_name.as_bytes());
        hasher.update(b"|");
        hasher.update(now.to_be_bytes());
        self.signature = hex::encode(&hasher.finalize()[..8]);
    }

    /// Whether the candidate may ever hold the primary role.
    pub fn candidate_eligible(&self) -> bool {
        self.candidate.scaling_group_name == self.preferred_scaling_group
    }

    /// Whether the candidate's own liveness is already proven.
    pub fn candidate_healthy(&self) -> bool {
        self.candidate_health_check
            .as_ref()
            .is_some_and(|hc| hc.healthy)
    }
}

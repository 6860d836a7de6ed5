//! Preconditions for conditional writes.
//!
//! Each write that depends on a prior read carries one of these objects.
//! The store evaluates it against the currently stored record inside the
//! same write transaction and rejects the write with
//! [`StateError::Conflict`](crate::StateError::Conflict) when it fails.

use crate::types::{HealthCheckRecord, PrimaryRecord, VoteState};

/// Expected prior state of a health-check record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckCondition {
    pub vm_id: String,
    pub scaling_group_name: String,
    pub ip: String,
    /// Sequence number the writer read before computing its update.
    pub expected_seq: u64,
}

impl HealthCheckCondition {
    /// Condition asserting that `record` is still what is stored.
    pub fn unchanged_since(record: &HealthCheckRecord) -> Self {
        Self {
            vm_id: record.vm_id.clone(),
            scaling_group_name: record.scaling_group_name.clone(),
            ip: record.ip.clone(),
            expected_seq: record.seq,
        }
    }

    pub(crate) fn check(&self, current: Option<&HealthCheckRecord>) -> Result<(), String> {
        let current = current.ok_or_else(|| format!("health check for {} is gone", self.vm_id))?;
        if current.vm_id != self.vm_id
            || current.scaling_group_name != self.scaling_group_name
            || current.ip != self.ip
        {
            return Err(format!(
                "health check for {} now belongs to {}/{}",
                self.vm_id, current.scaling_group_name, current.ip
            ));
        }
        if current.seq != self.expected_seq {
            return Err(format!(
                "health check for {} moved to seq {} (expected {})",
                self.vm_id, current.seq, self.expected_seq
            ));
        }
        Ok(())
    }
}

/// Precondition for creating a primary record.
///
/// The write succeeds when no live record exists for the cluster, or when
/// the stored record is the one the writer intends to replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryCreateCondition {
    /// Id of the record being replaced, if the writer read one.
    pub replaces: Option<String>,
    /// Clock used to decide whether a pending record has timed out.
    pub now: u64,
}

impl PrimaryCreateCondition {
    pub fn new(old: Option<&PrimaryRecord>, now: u64) -> Self {
        Self {
            replaces: old.map(|r| r.id.clone()),
            now,
        }
    }

    pub(crate) fn check(&self, current: Option<&PrimaryRecord>) -> Result<(), String> {
        match current {
            None => Ok(()),
            Some(c) if !c.is_live(self.now) => Ok(()),
            Some(c) if self.replaces.as_deref() == Some(c.id.as_str()) => Ok(()),
            Some(c) => Err(format!(
                "cluster {} already has primary record {} ({:?})",
                c.scaling_group_name,
                c.id,
                c.effective_vote_state(self.now)
            )),
        }
    }
}

/// Precondition for updating a primary record in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryUpdateCondition {
    pub id: String,
    /// Vote state the stored record must still carry.
    pub vote_state: VoteState,
    /// The stored record's vote window must not have ended at this instant.
    pub now: u64,
}

impl PrimaryUpdateCondition {
    /// Condition for finalizing a pending election before it times out.
    pub fn still_pending(record: &PrimaryRecord, now: u64) -> Self {
        Self {
            id: record.id.clone(),
            vote_state: VoteState::Pending,
            now,
        }
    }

    pub(crate) fn check(&self, current: Option<&PrimaryRecord>) -> Result<(), String> {
        let current = current.ok_or_else(|| format!("primary record {} is gone", self.id))?;
        if current.id != self.id {
            return Err(format!(
                "primary record {} was replaced by {}",
                self.id, current.id
            ));
        }
        if current.vote_state != self.vote_state {
            return Err(format!(
                "primary record {} is {:?} (expected {:?})",
                self.id, current.vote_state, self.vote_state
            ));
        }
        if current.effective_vote_state(self.now) == VoteState::Timeout {
            return Err(format!("primary record {} vote window ended", self.id));
        }
        Ok(())
    }
}

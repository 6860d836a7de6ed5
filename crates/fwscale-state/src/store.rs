//! StateStore — redb-backed record store.
//!
//! Provides reads and conditional writes over health-check and primary
//! records. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::conditions::{HealthCheckCondition, PrimaryCreateCondition, PrimaryUpdateCondition};
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Selects the primary record of one scaling-group cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryFilter {
    pub scaling_group_name: String,
    /// Only match a record naming this VM.
    pub vm_id: Option<String>,
}

impl PrimaryFilter {
    pub fn cluster(scaling_group_name: &str) -> Self {
        Self {
            scaling_group_name: scaling_group_name.to_string(),
            vm_id: None,
        }
    }

    pub fn with_vm(mut self, vm_id: &str) -> Self {
        self.vm_id = Some(vm_id.to_string());
        self
    }
}

/// Durable storage for coordination records.
///
/// Implementations own conflict resolution: every write that depends on a
/// prior read takes a precondition and fails with
/// [`StateError::Conflict`] when the stored state no longer satisfies it.
pub trait RecordStore: Send + Sync {
    fn get_health_check_record(&self, vm_id: &str) -> StateResult<Option<HealthCheckRecord>>;

    fn list_health_check_records(&self) -> StateResult<Vec<HealthCheckRecord>>;

    /// Insert a record for a VM that has none yet.
    fn create_health_check_record(&self, record: &HealthCheckRecord) -> StateResult<()>;

    /// Replace a record that still matches `condition`.
    fn update_health_check_record(
        &self,
        record: &HealthCheckRecord,
        condition: &HealthCheckCondition,
    ) -> StateResult<()>;

    /// Remove a VM's record. Returns true if it existed.
    fn delete_health_check_record(&self, vm_id: &str) -> StateResult<bool>;

    fn get_primary_record(&self, filter: &PrimaryFilter) -> StateResult<Option<PrimaryRecord>>;

    /// Create a primary record, atomically replacing a timed-out record or
    /// the record named by `condition.replaces`.
    fn create_primary_record(
        &self,
        record: &PrimaryRecord,
        condition: &PrimaryCreateCondition,
    ) -> StateResult<()>;

    /// Update a primary record in place, e.g. `Pending` → `Done`.
    fn update_primary_record(
        &self,
        record: &PrimaryRecord,
        condition: &PrimaryUpdateCondition,
    ) -> StateResult<()>;
}

/// Thread-safe record store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent record store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "record store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory record store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory record store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(HEALTH_CHECKS).map_err(map_err!(Table))?;
        txn.open_table(PRIMARIES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Write `value` under `key` only if `check` accepts the stored value.
    ///
    /// The check runs inside the write transaction, so it observes the
    /// state the write commits over. A rejected check aborts the
    /// transaction and surfaces as [`StateError::Conflict`].
    fn put_if<T, F>(&self, table: JsonTable, key: &str, value: &T, check: F) -> StateResult<()>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<&T>) -> Result<(), String>,
    {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let verdict = {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            let current: Option<T> = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            match check(current.as_ref()) {
                Ok(()) => {
                    table
                        .insert(key, bytes.as_slice())
                        .map_err(map_err!(Write))?;
                    Ok(())
                }
                Err(reason) => Err(reason),
            }
        };
        match verdict {
            Ok(()) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(())
            }
            Err(reason) => {
                txn.abort().map_err(map_err!(Transaction))?;
                debug!(%key, %reason, "conditional write rejected");
                Err(StateError::Conflict(reason))
            }
        }
    }
}

impl RecordStore for StateStore {
    // ── Health checks ──────────────────────────────────────────────

    fn get_health_check_record(&self, vm_id: &str) -> StateResult<Option<HealthCheckRecord>> {
        self.read(HEALTH_CHECKS, vm_id)
    }

    fn list_health_check_records(&self) -> StateResult<Vec<HealthCheckRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HEALTH_CHECKS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: HealthCheckRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    fn create_health_check_record(&self, record: &HealthCheckRecord) -> StateResult<()> {
        self.put_if(HEALTH_CHECKS, record.table_key(), record, |current| match current {
            None => Ok(()),
            Some(c) => Err(format!(
                "health check for {} already exists (seq {})",
                c.vm_id, c.seq
            )),
        })?;
        debug!(vm_id = %record.vm_id, seq = record.seq, "health check record created");
        Ok(())
    }

    fn update_health_check_record(
        &self,
        record: &HealthCheckRecord,
        condition: &HealthCheckCondition,
    ) -> StateResult<()> {
        if record.vm_id != condition.vm_id {
            return Err(StateError::Conflict(format!(
                "record for {} written under condition for {}",
                record.vm_id, condition.vm_id
            )));
        }
        if record.seq <= condition.expected_seq {
            return Err(StateError::Conflict(format!(
                "stale write for {}: seq {} does not advance {}",
                record.vm_id, record.seq, condition.expected_seq
            )));
        }
        self.put_if(HEALTH_CHECKS, record.table_key(), record, |current| {
            condition.check(current)
        })?;
        debug!(vm_id = %record.vm_id, seq = record.seq, "health check record updated");
        Ok(())
    }

    fn delete_health_check_record(&self, vm_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(HEALTH_CHECKS).map_err(map_err!(Table))?;
            existed = table.remove(vm_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%vm_id, existed, "health check record deleted");
        Ok(existed)
    }

    // ── Primary ────────────────────────────────────────────────────

    fn get_primary_record(&self, filter: &PrimaryFilter) -> StateResult<Option<PrimaryRecord>> {
        let record: Option<PrimaryRecord> = self.read(PRIMARIES, &filter.scaling_group_name)?;
        Ok(record.filter(|r| filter.vm_id.as_ref().is_none_or(|vm_id| &r.vm_id == vm_id)))
    }

    fn create_primary_record(
        &self,
        record: &PrimaryRecord,
        condition: &PrimaryCreateCondition,
    ) -> StateResult<()> {
        self.put_if(PRIMARIES, record.table_key(), record, |current| {
            condition.check(current)
        })?;
        debug!(
            id = %record.id,
            vm_id = %record.vm_id,
            vote_state = ?record.vote_state,
            "primary record created"
        );
        Ok(())
    }

    fn update_primary_record(
        &self,
        record: &PrimaryRecord,
        condition: &PrimaryUpdateCondition,
    ) -> StateResult<()> {
        if record.id != condition.id {
            return Err(StateError::Conflict(format!(
                "record {} written under condition for {}",
                record.id, condition.id
            )));
        }
        self.put_if(PRIMARIES, record.table_key(), record, |current| {
            condition.check(current)
        })?;
        debug!(id = %record.id, vote_state = ?record.vote_state, "primary record updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn health(vm_id: &str, seq: u64) -> HealthCheckRecord {
        HealthCheckRecord {
            vm_id: vm_id.to_string(),
            scaling_group_name: "fgt-byol".to_string(),
            ip: "10.0.1.10".to_string(),
            primary_ip: None,
            heartbeat_interval_ms: 30_000,
            heartbeat_loss_count: 0,
            next_heartbeat_time: 1_030_000,
            sync_state: SyncState::InSync,
            sync_recovery_count: 0,
            seq,
            healthy: true,
            up_to_date: true,
        }
    }

    fn primary(vm_id: &str, vote_state: VoteState, vote_end_time: u64) -> PrimaryRecord {
        PrimaryRecord {
            id: PrimaryRecord::record_id("fgt-byol", vm_id),
            vm_id: vm_id.to_string(),
            ip: "10.0.1.10".to_string(),
            scaling_group_name: "fgt-byol".to_string(),
            virtual_network_id: "vpc-1".to_string(),
            subnet_id: "subnet-a".to_string(),
            vote_end_time,
            vote_state,
        }
    }

    // ── Health checks ──────────────────────────────────────────────

    #[test]
    fn health_check_create_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let rec = health("i-1", 1);

        store.create_health_check_record(&rec).unwrap();
        assert_eq!(store.get_health_check_record("i-1").unwrap(), Some(rec));
    }

    #[test]
    fn health_check_create_twice_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_health_check_record(&health("i-1", 1)).unwrap();

        let err = store.create_health_check_record(&health("i-1", 2)).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get_health_check_record("i-1").unwrap().unwrap().seq, 1);
    }

    #[test]
    fn health_check_update_with_matching_condition() {
        let store = StateStore::open_in_memory().unwrap();
        let rec = health("i-1", 1);
        store.create_health_check_record(&rec).unwrap();

        let cond = HealthCheckCondition::unchanged_since(&rec);
        let mut next = rec.clone();
        next.seq = 2;
        next.heartbeat_loss_count = 1;
        store.update_health_check_record(&next, &cond).unwrap();

        assert_eq!(store.get_health_check_record("i-1").unwrap(), Some(next));
    }

    #[test]
    fn health_check_update_after_concurrent_write_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        let rec = health("i-1", 1);
        store.create_health_check_record(&rec).unwrap();
        let cond = HealthCheckCondition::unchanged_since(&rec);

        // Another invocation wins first.
        store
            .update_health_check_record(&health("i-1", 2), &cond)
            .unwrap();

        let err = store
            .update_health_check_record(&health("i-1", 3), &cond)
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get_health_check_record("i-1").unwrap().unwrap().seq, 2);
    }

    #[test]
    fn health_check_update_must_advance_seq() {
        let store = StateStore::open_in_memory().unwrap();
        let rec = health("i-1", 5);
        store.create_health_check_record(&rec).unwrap();

        let cond = HealthCheckCondition::unchanged_since(&rec);
        let err = store
            .update_health_check_record(&health("i-1", 5), &cond)
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn health_check_update_missing_record_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        let cond = HealthCheckCondition::unchanged_since(&health("i-1", 1));
        let err = store
            .update_health_check_record(&health("i-1", 2), &cond)
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(store.get_health_check_record("i-1").unwrap().is_none());
    }

    #[test]
    fn health_check_list_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_health_check_record(&health("i-1", 1)).unwrap();
        store.create_health_check_record(&health("i-2", 1)).unwrap();
        assert_eq!(store.list_health_check_records().unwrap().len(), 2);

        assert!(store.delete_health_check_record("i-1").unwrap());
        assert!(!store.delete_health_check_record("i-1").unwrap());
        assert_eq!(store.list_health_check_records().unwrap().len(), 1);
    }

    // ── Primary ────────────────────────────────────────────────────

    #[test]
    fn primary_create_when_absent() {
        let store = StateStore::open_in_memory().unwrap();
        let rec = primary("i-1", VoteState::Pending, 100_000);
        store
            .create_primary_record(&rec, &PrimaryCreateCondition::new(None, 10_000))
            .unwrap();

        let filter = PrimaryFilter::cluster("fgt-byol");
        assert_eq!(store.get_primary_record(&filter).unwrap(), Some(rec));
    }

    #[test]
    fn primary_filter_by_vm() {
        let store = StateStore::open_in_memory().unwrap();
        let rec = primary("i-1", VoteState::Done, 0);
        store
            .create_primary_record(&rec, &PrimaryCreateCondition::new(None, 0))
            .unwrap();

        let hit = PrimaryFilter::cluster("fgt-byol").with_vm("i-1");
        let miss = PrimaryFilter::cluster("fgt-byol").with_vm("i-2");
        assert!(store.get_primary_record(&hit).unwrap().is_some());
        assert!(store.get_primary_record(&miss).unwrap().is_none());
        assert!(store
            .get_primary_record(&PrimaryFilter::cluster("other"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn primary_create_over_live_record_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        let first = primary("i-1", VoteState::Pending, 100_000);
        store
            .create_primary_record(&first, &PrimaryCreateCondition::new(None, 10_000))
            .unwrap();

        let second = primary("i-2", VoteState::Pending, 100_000);
        let err = store
            .create_primary_record(&second, &PrimaryCreateCondition::new(None, 20_000))
            .unwrap_err();
        assert!(err.is_conflict());

        let stored = store
            .get_primary_record(&PrimaryFilter::cluster("fgt-byol"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.vm_id, "i-1");
    }

    #[test]
    fn primary_create_purges_timed_out_record() {
        let store = StateStore::open_in_memory().unwrap();
        let stale = primary("i-1", VoteState::Pending, 100_000);
        store
            .create_primary_record(&stale, &PrimaryCreateCondition::new(None, 10_000))
            .unwrap();

        let fresh = primary("i-2", VoteState::Pending, 300_000);
        store
            .create_primary_record(&fresh, &PrimaryCreateCondition::new(None, 200_000))
            .unwrap();

        let stored = store
            .get_primary_record(&PrimaryFilter::cluster("fgt-byol"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.vm_id, "i-2");
    }

    #[test]
    fn primary_create_replaces_named_old_record() {
        let store = StateStore::open_in_memory().unwrap();
        let old = primary("i-1", VoteState::Done, 0);
        store
            .create_primary_record(&old, &PrimaryCreateCondition::new(None, 0))
            .unwrap();

        let new = primary("i-2", VoteState::Done, 0);
        store
            .create_primary_record(&new, &PrimaryCreateCondition::new(Some(&old), 50_000))
            .unwrap();

        // A second replacer still holding the old record loses.
        let other = primary("i-3", VoteState::Done, 0);
        let err = store
            .create_primary_record(&other, &PrimaryCreateCondition::new(Some(&old), 50_000))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn primary_update_pending_to_done() {
        let store = StateStore::open_in_memory().unwrap();
        let pending = primary("i-1", VoteState::Pending, 100_000);
        store
            .create_primary_record(&pending, &PrimaryCreateCondition::new(None, 10_000))
            .unwrap();

        let mut done = pending.clone();
        done.vote_state = VoteState::Done;
        store
            .update_primary_record(&done, &PrimaryUpdateCondition::still_pending(&pending, 20_000))
            .unwrap();

        let stored = store
            .get_primary_record(&PrimaryFilter::cluster("fgt-byol"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.vote_state, VoteState::Done);
    }

    #[test]
    fn primary_update_after_timeout_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        let pending = primary("i-1", VoteState::Pending, 100_000);
        store
            .create_primary_record(&pending, &PrimaryCreateCondition::new(None, 10_000))
            .unwrap();

        let mut done = pending.clone();
        done.vote_state = VoteState::Done;
        let err = store
            .update_primary_record(&done, &PrimaryUpdateCondition::still_pending(&pending, 150_000))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn concurrent_elections_yield_one_primary() {
        let store = StateStore::open_in_memory().unwrap();
        let contenders = 8;
        let barrier = Arc::new(Barrier::new(contenders));

        let handles: Vec<_> = (0..contenders)
            .map(|i| {
                let store = store.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let rec = primary(&format!("i-{i}"), VoteState::Pending, 100_000);
                    barrier.wait();
                    store.create_primary_record(&rec, &PrimaryCreateCondition::new(None, 10_000))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_conflict()))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(conflicts, contenders - 1);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.create_health_check_record(&health("i-1", 7)).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let rec = store.get_health_check_record("i-1").unwrap();
        assert_eq!(rec.map(|r| r.seq), Some(7));
    }
}

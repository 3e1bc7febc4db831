//! Persistent store backed by redb.
//!
//! # Table design
//!
//! `JOBS` maps the job id to the JSON-encoded job. `ACTIONS` uses a composite
//! key:
//! ```text
//! [ job_id bytes | 0x00 | action_number: u64 big-endian (8 bytes) ]
//! ```
//!
//! The big-endian number keeps byte order equal to action-number order, so a
//! single range scan `lower_bound(job)..=upper_bound(job)` returns a job's
//! actions already sorted.
//!
//! redb admits one write transaction at a time, which serializes conflicting
//! transitions; the row-version check catches stale copies carried in from an
//! earlier transaction.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};

use super::{check_version, Store, StoreTxn};
use crate::action::{ActionId, CoordinatorAction};
use crate::error::{CoordError, Result};
use crate::job::CoordinatorJob;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");
const ACTIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("actions");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn action_key(job_id: &str, number: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(job_id.len() + 9);
    key.extend_from_slice(job_id.as_bytes());
    key.push(0);
    key.extend_from_slice(&number.to_be_bytes());
    key
}

fn lower_bound(job_id: &str) -> Vec<u8> {
    action_key(job_id, 0)
}

fn upper_bound(job_id: &str) -> Vec<u8> {
    action_key(job_id, u64::MAX)
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the database at `path`, creating both tables.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(CoordError::store)?;
        let wt = db.begin_write().map_err(CoordError::store)?;
        wt.open_table(JOBS).map_err(CoordError::store)?;
        wt.open_table(ACTIONS).map_err(CoordError::store)?;
        wt.commit().map_err(CoordError::store)?;
        Ok(Self { db })
    }
}

impl Store for RedbStore {
    fn begin(&self) -> Result<Box<dyn StoreTxn + '_>> {
        let txn = self.db.begin_write().map_err(CoordError::store)?;
        Ok(Box::new(RedbTxn { txn }))
    }
}

struct RedbTxn {
    txn: WriteTransaction,
}

impl StoreTxn for RedbTxn {
    fn get_job(&self, id: &str) -> Result<Option<CoordinatorJob>> {
        let table = self.txn.open_table(JOBS).map_err(CoordError::store)?;
        let value = table.get(id).map_err(CoordError::store)?;
        match value {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    fn put_job(&mut self, job: &mut CoordinatorJob) -> Result<()> {
        let stored = self.get_job(&job.id)?.map(|j| j.version);
        check_version(format!("job {}", job.id), stored, job.version)?;
        job.version += 1;
        let value = serde_json::to_vec(job)?;
        let mut table = self.txn.open_table(JOBS).map_err(CoordError::store)?;
        table
            .insert(job.id.as_str(), value.as_slice())
            .map_err(CoordError::store)?;
        Ok(())
    }

    fn list_jobs(&self) -> Result<Vec<CoordinatorJob>> {
        let table = self.txn.open_table(JOBS).map_err(CoordError::store)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(CoordError::store)? {
            let (_, v) = entry.map_err(CoordError::store)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    fn get_action(&self, id: &ActionId) -> Result<Option<CoordinatorAction>> {
        let key = action_key(&id.job_id, id.number);
        let table = self.txn.open_table(ACTIONS).map_err(CoordError::store)?;
        let value = table.get(key.as_slice()).map_err(CoordError::store)?;
        match value {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    fn put_action(&mut self, action: &mut CoordinatorAction) -> Result<()> {
        let stored = self.get_action(&action.id)?.map(|a| a.version);
        check_version(format!("action {}", action.id), stored, action.version)?;
        action.version += 1;
        let key = action_key(&action.id.job_id, action.id.number);
        let value = serde_json::to_vec(action)?;
        let mut table = self.txn.open_table(ACTIONS).map_err(CoordError::store)?;
        table
            .insert(key.as_slice(), value.as_slice())
            .map_err(CoordError::store)?;
        Ok(())
    }

    fn actions_for_job(&self, job_id: &str) -> Result<Vec<CoordinatorAction>> {
        let lower = lower_bound(job_id);
        let upper = upper_bound(job_id);
        let table = self.txn.open_table(ACTIONS).map_err(CoordError::store)?;
        let mut result = Vec::new();
        for entry in table
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(CoordError::store)?
        {
            let (_, v) = entry.map_err(CoordError::store)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let RedbTxn { txn } = *self;
        txn.commit().map_err(CoordError::store)
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        let RedbTxn { txn } = *self;
        txn.abort().map_err(CoordError::store)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::transact;
    use crate::types::ActionStatus;
    use chrono::Utc;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, RedbStore) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(&dir.path().join("coord.db")).unwrap();
        (dir, store)
    }

    fn waiting(job_id: &str, number: u64) -> CoordinatorAction {
        let now = Utc::now();
        CoordinatorAction::new_waiting(
            ActionId::new(job_id, number),
            now,
            Vec::new(),
            vec![format!("/data/{number}")],
            now,
        )
    }

    #[test]
    fn actions_scan_in_number_order_per_job() {
        let (_dir, store) = open_tmp();
        transact(&store, |txn| {
            for n in [3, 1, 256, 2] {
                txn.put_action(&mut waiting("job-a", n))?;
            }
            txn.put_action(&mut waiting("job-ab", 1))?;
            txn.put_action(&mut waiting("job", 9))?;
            Ok(())
        })
        .unwrap();

        let txn = store.begin().unwrap();
        let numbers: Vec<u64> = txn
            .actions_for_job("job-a")
            .unwrap()
            .iter()
            .map(|a| a.id.number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 256]);
        assert_eq!(txn.actions_for_job("job").unwrap().len(), 1);
        txn.rollback().unwrap();
    }

    #[test]
    fn reads_see_own_writes_and_rollback_discards_them() {
        let (_dir, store) = open_tmp();
        let mut txn = store.begin().unwrap();
        let mut action = waiting("j", 1);
        txn.put_action(&mut action).unwrap();
        assert_eq!(action.version, 1);
        assert!(txn.get_action(&action.id).unwrap().is_some());
        txn.rollback().unwrap();

        let txn = store.begin().unwrap();
        assert!(txn.get_action(&ActionId::new("j", 1)).unwrap().is_none());
        txn.rollback().unwrap();
    }

    #[test]
    fn stale_copy_is_a_conflict() {
        let (_dir, store) = open_tmp();
        let mut action = waiting("j", 1);
        transact(&store, |txn| txn.put_action(&mut action)).unwrap();

        let mut first = action.clone();
        let mut second = action.clone();
        first.status = ActionStatus::Ready;
        transact(&store, |txn| txn.put_action(&mut first)).unwrap();

        second.status = ActionStatus::TimedOut;
        let err = transact(&store, |txn| txn.put_action(&mut second)).unwrap_err();
        assert!(matches!(err, CoordError::Conflict { expected: 1, actual: 2, .. }), "{err}");

        let txn = store.begin().unwrap();
        let stored = txn.action(&action.id).unwrap();
        assert_eq!(stored.status, ActionStatus::Ready);
        txn.rollback().unwrap();
    }

    #[test]
    fn duplicate_insert_is_a_conflict() {
        let (_dir, store) = open_tmp();
        transact(&store, |txn| txn.put_action(&mut waiting("j", 1))).unwrap();
        let err = transact(&store, |txn| txn.put_action(&mut waiting("j", 1))).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn missing_job_is_not_found() {
        let (_dir, store) = open_tmp();
        let txn = store.begin().unwrap();
        assert!(matches!(txn.job("nope"), Err(CoordError::JobNotFound(_))));
        txn.rollback().unwrap();
    }
}

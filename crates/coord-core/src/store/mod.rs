//! Transactional persistence for jobs and actions.
//!
//! Every record carries a row `version`. `put_*` succeeds only when the
//! caller's copy has the version currently stored, then bumps it; a stale
//! copy fails with [`CoordError::Conflict`]. Together with serialized write
//! transactions this guarantees a status transition commits at most once.
//!
//! Reads inside an open transaction observe that transaction's own writes.

pub mod db;
pub mod memory;

pub use db::RedbStore;
pub use memory::MemoryStore;

use crate::action::{ActionId, CoordinatorAction};
use crate::error::{CoordError, Result};
use crate::job::CoordinatorJob;

/// One open transaction. Dropping it without `commit` discards its writes.
pub trait StoreTxn {
    fn get_job(&self, id: &str) -> Result<Option<CoordinatorJob>>;

    /// Insert or replace a job. Bumps `job.version` on success.
    fn put_job(&mut self, job: &mut CoordinatorJob) -> Result<()>;

    fn list_jobs(&self) -> Result<Vec<CoordinatorJob>>;

    fn get_action(&self, id: &ActionId) -> Result<Option<CoordinatorAction>>;

    /// Insert or replace an action. Bumps `action.version` on success.
    fn put_action(&mut self, action: &mut CoordinatorAction) -> Result<()>;

    /// All actions of a job in ascending action-number order.
    fn actions_for_job(&self, job_id: &str) -> Result<Vec<CoordinatorAction>>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;

    fn job(&self, id: &str) -> Result<CoordinatorJob> {
        self.get_job(id)?
            .ok_or_else(|| CoordError::JobNotFound(id.to_string()))
    }

    fn action(&self, id: &ActionId) -> Result<CoordinatorAction> {
        self.get_action(id)?
            .ok_or_else(|| CoordError::ActionNotFound(id.to_string()))
    }
}

/// A handle that opens transactions. Passed explicitly to every component.
pub trait Store: Send + Sync {
    fn begin(&self) -> Result<Box<dyn StoreTxn + '_>>;
}

/// Run `f` in a transaction: commit on `Ok`, roll back on `Err`.
pub fn transact<T>(
    store: &dyn Store,
    f: impl FnOnce(&mut dyn StoreTxn) -> Result<T>,
) -> Result<T> {
    let mut txn = store.begin()?;
    match f(txn.as_mut()) {
        Ok(value) => {
            txn.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = txn.rollback() {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(e)
        }
    }
}

/// Run `f` against a snapshot and discard the transaction.
pub fn read<T>(store: &dyn Store, f: impl FnOnce(&dyn StoreTxn) -> Result<T>) -> Result<T> {
    let txn = store.begin()?;
    let result = f(txn.as_ref());
    txn.rollback()?;
    result
}

/// Version check shared by the store implementations.
pub(crate) fn check_version(entity: impl Into<String>, stored: Option<u64>, given: u64) -> Result<()> {
    let actual = stored.unwrap_or(0);
    if actual != given {
        return Err(CoordError::Conflict {
            entity: entity.into(),
            expected: given,
            actual,
        });
    }
    Ok(())
}

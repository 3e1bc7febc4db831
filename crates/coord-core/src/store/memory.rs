//! In-memory store.
//!
//! Transactions hold the store's lock from `begin` to `commit`/`rollback`, so
//! they are fully serialized. Writes go to a private working copy that
//! replaces the shared tables on commit.
//!
//! ## Limitations
//!
//! - No durability: all state is lost when the process exits
//! - Single-process only

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{check_version, Store, StoreTxn};
use crate::action::{ActionId, CoordinatorAction};
use crate::error::{CoordError, Result};
use crate::job::CoordinatorJob;

#[derive(Debug, Clone, Default)]
struct Tables {
    jobs: BTreeMap<String, CoordinatorJob>,
    actions: BTreeMap<(String, u64), CoordinatorAction>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failing_commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit` fail with a store error, discarding its writes.
    pub fn fail_next_commit(&self) {
        self.fail_next_commits(1);
    }

    /// Make the next `n` commits fail.
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> Result<Box<dyn StoreTxn + '_>> {
        let guard = self
            .tables
            .lock()
            .map_err(|_| CoordError::Store("lock poisoned".to_string()))?;
        let working = guard.clone();
        Ok(Box::new(MemoryTxn {
            guard,
            working,
            fail_commit: &self.failing_commits,
        }))
    }
}

struct MemoryTxn<'a> {
    guard: MutexGuard<'a, Tables>,
    working: Tables,
    fail_commit: &'a AtomicUsize,
}

impl StoreTxn for MemoryTxn<'_> {
    fn get_job(&self, id: &str) -> Result<Option<CoordinatorJob>> {
        Ok(self.working.jobs.get(id).cloned())
    }

    fn put_job(&mut self, job: &mut CoordinatorJob) -> Result<()> {
        let stored = self.working.jobs.get(&job.id).map(|j| j.version);
        check_version(format!("job {}", job.id), stored, job.version)?;
        job.version += 1;
        self.working.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn list_jobs(&self) -> Result<Vec<CoordinatorJob>> {
        Ok(self.working.jobs.values().cloned().collect())
    }

    fn get_action(&self, id: &ActionId) -> Result<Option<CoordinatorAction>> {
        Ok(self
            .working
            .actions
            .get(&(id.job_id.clone(), id.number))
            .cloned())
    }

    fn put_action(&mut self, action: &mut CoordinatorAction) -> Result<()> {
        let key = (action.id.job_id.clone(), action.id.number);
        let stored = self.working.actions.get(&key).map(|a| a.version);
        check_version(format!("action {}", action.id), stored, action.version)?;
        action.version += 1;
        self.working.actions.insert(key, action.clone());
        Ok(())
    }

    fn actions_for_job(&self, job_id: &str) -> Result<Vec<CoordinatorAction>> {
        let lower = (job_id.to_string(), 0);
        let upper = (job_id.to_string(), u64::MAX);
        Ok(self
            .working
            .actions
            .range(lower..=upper)
            .map(|(_, a)| a.clone())
            .collect())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTxn {
            mut guard,
            working,
            fail_commit,
        } = *self;
        let injected = fail_commit
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(CoordError::Store("injected commit failure".to_string()));
        }
        *guard = working;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

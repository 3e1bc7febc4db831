//! One handle over the store, the existence oracle and the submitter.
//!
//! Every operation takes `now` explicitly; nothing here reads the clock.

use crate::action::{ActionId, CoordinatorAction};
use crate::admission::{AdmissionController, RejectionBacklog, Submitter};
use crate::dependency::ExistenceOracle;
use crate::error::{CoordError, Result};
use crate::input_check::{CheckOutcome, InputChecker};
use crate::job::CoordinatorJob;
use crate::lifecycle;
use crate::materialize;
use crate::store::{read, transact, Store};
use crate::types::{ActionStatus, JobStatus};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn Store>,
    oracle: Arc<dyn ExistenceOracle>,
    submitter: Arc<dyn Submitter>,
    rejections: Arc<RejectionBacklog>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn Store>,
        oracle: Arc<dyn ExistenceOracle>,
        submitter: Arc<dyn Submitter>,
    ) -> Self {
        Self {
            store,
            oracle,
            submitter,
            rejections: Arc::default(),
        }
    }

    fn admission(&self) -> AdmissionController<'_> {
        AdmissionController::new(self.store.as_ref(), self.submitter.as_ref())
            .with_backlog(&self.rejections)
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    /// Store a new job. Fails with [`CoordError::JobExists`] on an id clash.
    pub fn submit_job(&self, mut job: CoordinatorJob) -> Result<CoordinatorJob> {
        transact(self.store.as_ref(), |txn| {
            if txn.get_job(&job.id)?.is_some() {
                return Err(CoordError::JobExists(job.id.clone()));
            }
            txn.put_job(&mut job)
        })?;
        tracing::info!(job_id = %job.id, name = %job.name, "job submitted");
        Ok(job)
    }

    pub fn job(&self, id: &str) -> Result<CoordinatorJob> {
        read(self.store.as_ref(), |txn| txn.job(id))
    }

    pub fn jobs(&self) -> Result<Vec<CoordinatorJob>> {
        read(self.store.as_ref(), |txn| txn.list_jobs())
    }

    pub fn kill_job(&self, id: &str, now: DateTime<Utc>) -> Result<usize> {
        lifecycle::kill_job(self.store.as_ref(), id, now)
    }

    // -----------------------------------------------------------------------
    // Materialization
    // -----------------------------------------------------------------------

    pub fn materialize(
        &self,
        job_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<CoordinatorAction>> {
        let created =
            materialize::materialize(self.store.as_ref(), job_id, window_start, window_end, now)?;
        self.admit_created(job_id, &created, now);
        Ok(created)
    }

    pub fn materialize_due(
        &self,
        job_id: &str,
        lookahead: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<CoordinatorAction>> {
        let created = materialize::materialize_due(self.store.as_ref(), job_id, lookahead, now)?;
        self.admit_created(job_id, &created, now);
        Ok(created)
    }

    /// Actions with no inputs are created READY; hand them to admission.
    fn admit_created(&self, job_id: &str, created: &[CoordinatorAction], now: DateTime<Utc>) {
        if !created.iter().any(|a| a.status == ActionStatus::Ready) {
            return;
        }
        if let Err(e) = self.admit(job_id, now) {
            tracing::warn!(job_id = %job_id, error = %e, "admission deferred");
        }
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    pub fn action(&self, id: &ActionId) -> Result<CoordinatorAction> {
        read(self.store.as_ref(), |txn| txn.action(id))
    }

    pub fn actions(&self, job_id: &str) -> Result<Vec<CoordinatorAction>> {
        read(self.store.as_ref(), |txn| {
            txn.job(job_id)?;
            txn.actions_for_job(job_id)
        })
    }

    /// WAITING actions of every RUNNING job, in job then action-number order.
    pub fn waiting_actions(&self) -> Result<Vec<ActionId>> {
        read(self.store.as_ref(), |txn| {
            let mut ids = Vec::new();
            for job in txn.list_jobs()? {
                if job.status != JobStatus::Running {
                    continue;
                }
                ids.extend(
                    txn.actions_for_job(&job.id)?
                        .into_iter()
                        .filter(|a| a.status == ActionStatus::Waiting)
                        .map(|a| a.id),
                );
            }
            Ok(ids)
        })
    }

    pub fn check_inputs(&self, id: &ActionId, now: DateTime<Utc>) -> Result<CheckOutcome> {
        InputChecker::new(self.store.as_ref(), self.oracle.as_ref(), self.admission())
            .check_inputs(id, now)
    }

    pub fn admit(&self, job_id: &str, now: DateTime<Utc>) -> Result<Vec<ActionId>> {
        self.admission().admit(job_id, now)
    }

    pub fn release(
        &self,
        id: &ActionId,
        outcome: ActionStatus,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActionId>> {
        self.admission().release(id, outcome, now)
    }

    pub fn mark_running(&self, id: &ActionId, now: DateTime<Utc>) -> Result<()> {
        self.admission().mark_running(id, now)
    }

    pub fn kill_action(&self, id: &ActionId, now: DateTime<Utc>) -> Result<bool> {
        lifecycle::kill_action(self.store.as_ref(), &self.admission(), id, now)
    }
}

//! Admission control: how many READY actions of a job may proceed, and which.
//!
//! The admitted count is derived from the actions themselves (SUBMITTED or
//! RUNNING) inside the same transaction that selects and marks new ones, and
//! the job row is rewritten in that transaction. Two admissions for the same
//! job therefore serialize on the job row and can never exceed the ceiling.
//!
//! An action is marked SUBMITTED before the submitter sees it. When the
//! submitter rejects it, the FAILED write is retried a few times; if the store
//! still refuses, the id waits in a [`RejectionBacklog`] and is written on the
//! next admission, so a rejected action never keeps its slot.

use crate::action::{ActionId, ActionPayload, CoordinatorAction};
use crate::error::{CoordError, Result};
use crate::lifecycle::settle_job;
use crate::store::{transact, Store, StoreTxn};
use crate::types::{ActionStatus, ExecutionOrder};
use chrono::{DateTime, Utc};
use std::sync::Mutex;

const REJECTION_WRITE_ATTEMPTS: usize = 3;

/// Receives admitted actions. Whatever happens after acceptance is reported
/// back through [`AdmissionController::release`].
pub trait Submitter: Send + Sync {
    fn submit(&self, action: &CoordinatorAction, payload: &ActionPayload) -> Result<()>;
}

/// Rejected actions whose FAILED status has not reached the store yet.
#[derive(Debug, Default)]
pub struct RejectionBacklog(Mutex<Vec<ActionId>>);

impl RejectionBacklog {
    fn push(&self, ids: Vec<ActionId>) {
        if let Ok(mut pending) = self.0.lock() {
            pending.extend(ids);
        }
    }

    fn take(&self) -> Vec<ActionId> {
        self.0.lock().map(|mut p| std::mem::take(&mut *p)).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct AdmissionController<'a> {
    store: &'a dyn Store,
    submitter: &'a dyn Submitter,
    backlog: Option<&'a RejectionBacklog>,
}

impl<'a> AdmissionController<'a> {
    pub fn new(store: &'a dyn Store, submitter: &'a dyn Submitter) -> Self {
        Self {
            store,
            submitter,
            backlog: None,
        }
    }

    /// Keep rejections the store could not record in `backlog` instead of
    /// dropping them.
    pub fn with_backlog(mut self, backlog: &'a RejectionBacklog) -> Self {
        self.backlog = Some(backlog);
        self
    }

    /// Admit READY actions of `job_id` up to its concurrency ceiling.
    ///
    /// Returns the ids handed to the submitter, in admission order.
    pub fn admit(&self, job_id: &str, now: DateTime<Utc>) -> Result<Vec<ActionId>> {
        self.flush_backlog(now);
        let batch = transact(self.store, |txn| select_and_mark(txn, job_id, now))?;
        Ok(self.submit_all(job_id, batch, now))
    }

    /// Record the external outcome of an admitted action, freeing its slot,
    /// and admit whatever may now proceed.
    pub fn release(
        &self,
        id: &ActionId,
        outcome: ActionStatus,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActionId>> {
        if !matches!(outcome, ActionStatus::Succeeded | ActionStatus::Failed) {
            return Err(CoordError::InvalidTransition {
                from: "admitted".to_string(),
                to: outcome.to_string(),
            });
        }
        self.flush_backlog(now);
        let batch = transact(self.store, |txn| {
            finish(txn, id, outcome, now)?;
            select_and_mark(txn, &id.job_id, now)
        })?;
        tracing::info!(action_id = %id, outcome = %outcome, "action released");
        Ok(self.submit_all(&id.job_id, batch, now))
    }

    /// SUBMITTED → RUNNING, as reported by the submission side.
    pub fn mark_running(&self, id: &ActionId, now: DateTime<Utc>) -> Result<()> {
        transact(self.store, |txn| {
            let mut action = txn.action(id)?;
            action.transition(ActionStatus::Running, now)?;
            txn.put_action(&mut action)
        })
    }

    fn submit_all(&self, job_id: &str, mut batch: Vec<CoordinatorAction>, now: DateTime<Utc>) -> Vec<ActionId> {
        let mut submitted = Vec::new();
        while !batch.is_empty() {
            let mut rejected = Vec::new();
            for action in &batch {
                let result = match &action.payload {
                    Some(payload) => self.submitter.submit(action, payload),
                    None => Err(CoordError::Submission {
                        action_id: action.id.to_string(),
                        reason: "action has no resolved payload".to_string(),
                    }),
                };
                match result {
                    Ok(()) => {
                        tracing::info!(action_id = %action.id, "action admitted");
                        submitted.push(action.id.clone());
                    }
                    Err(e) => {
                        tracing::warn!(action_id = %action.id, error = %e, "submission failed");
                        rejected.push(action.id.clone());
                    }
                }
            }
            if rejected.is_empty() {
                break;
            }
            batch = match self.record_rejections(job_id, &rejected, now) {
                Ok(next) => next,
                Err(e) => {
                    self.defer(rejected, &e);
                    break;
                }
            };
        }
        submitted
    }

    /// Mark `rejected` FAILED and pick replacements for their slots.
    fn record_rejections(
        &self,
        job_id: &str,
        rejected: &[ActionId],
        now: DateTime<Utc>,
    ) -> Result<Vec<CoordinatorAction>> {
        let mut attempt = 1;
        loop {
            let result = transact(self.store, |txn| {
                for id in rejected {
                    fail_rejected(txn, id, now)?;
                }
                select_and_mark(txn, job_id, now)
            });
            match result {
                Err(e) if e.is_retryable() && attempt < REJECTION_WRITE_ATTEMPTS => {
                    tracing::debug!(job_id = %job_id, attempt, error = %e, "retrying rejection write");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn defer(&self, rejected: Vec<ActionId>, cause: &CoordError) {
        match self.backlog {
            Some(backlog) => {
                tracing::warn!(count = rejected.len(), error = %cause, "rejections deferred to next admission");
                backlog.push(rejected);
            }
            None => {
                for id in &rejected {
                    tracing::error!(action_id = %id, error = %cause, "rejected action left SUBMITTED");
                }
            }
        }
    }

    /// Write FAILED for rejections an earlier call could not record.
    fn flush_backlog(&self, now: DateTime<Utc>) {
        let Some(backlog) = self.backlog else {
            return;
        };
        let pending = backlog.take();
        if pending.is_empty() {
            return;
        }
        let result = transact(self.store, |txn| {
            for id in &pending {
                fail_rejected(txn, id, now)?;
            }
            Ok(())
        });
        match result {
            Ok(()) => tracing::info!(count = pending.len(), "deferred rejections recorded"),
            Err(e) => {
                tracing::warn!(count = pending.len(), error = %e, "deferred rejections still pending");
                backlog.push(pending);
            }
        }
    }
}

/// Pick the READY actions that fit under the ceiling, mark them SUBMITTED and
/// rewrite the job row. Returns the marked actions.
pub(crate) fn select_and_mark(
    txn: &mut dyn StoreTxn,
    job_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<CoordinatorAction>> {
    let mut job = txn.job(job_id)?;
    if job.status.is_terminal() {
        return Ok(Vec::new());
    }
    let actions = txn.actions_for_job(job_id)?;
    let mut admitted = actions.iter().filter(|a| a.status.is_admitted()).count();

    let mut ready: Vec<CoordinatorAction> = actions
        .into_iter()
        .filter(|a| a.status == ActionStatus::Ready)
        .collect();
    if job.execution == ExecutionOrder::Lifo {
        ready.reverse();
    }

    let mut marked = Vec::new();
    for mut action in ready {
        if !job.concurrency.has_capacity(admitted) {
            break;
        }
        action.transition(ActionStatus::Submitted, now)?;
        txn.put_action(&mut action)?;
        admitted += 1;
        marked.push(action);
    }

    job.updated_at = now;
    txn.put_job(&mut job)?;
    Ok(marked)
}

/// Move an admitted action to its terminal outcome and settle the job.
fn finish(
    txn: &mut dyn StoreTxn,
    id: &ActionId,
    outcome: ActionStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut action = txn.action(id)?;
    action.transition(outcome, now)?;
    txn.put_action(&mut action)?;
    settle_job(txn, &id.job_id, now)
}

/// FAILED for a rejected submission, unless something else (a kill) already
/// moved the action on.
fn fail_rejected(txn: &mut dyn StoreTxn, id: &ActionId, now: DateTime<Utc>) -> Result<()> {
    if txn.action(id)?.status != ActionStatus::Submitted {
        return Ok(());
    }
    finish(txn, id, ActionStatus::Failed, now)
}

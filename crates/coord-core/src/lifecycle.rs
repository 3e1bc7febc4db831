//! Cancellation and job completion.

use crate::action::ActionId;
use crate::admission::AdmissionController;
use crate::error::Result;
use crate::store::{transact, Store, StoreTxn};
use crate::types::{ActionStatus, JobStatus};
use chrono::{DateTime, Utc};

/// Close out a job once materialization is done and every action is
/// terminal: SUCCEEDED if all actions succeeded, DONEWITHERROR otherwise.
pub(crate) fn settle_job(txn: &mut dyn StoreTxn, job_id: &str, now: DateTime<Utc>) -> Result<()> {
    let mut job = txn.job(job_id)?;
    if job.status.is_terminal() || !job.done_materialization {
        return Ok(());
    }
    let actions = txn.actions_for_job(job_id)?;
    if actions.is_empty() || !actions.iter().all(|a| a.status.is_terminal()) {
        return Ok(());
    }
    job.status = if actions.iter().all(|a| a.status == ActionStatus::Succeeded) {
        JobStatus::Succeeded
    } else {
        JobStatus::DoneWithError
    };
    job.updated_at = now;
    txn.put_job(&mut job)?;
    tracing::info!(job_id = %job_id, status = %job.status, "job finished");
    Ok(())
}

/// Kill one action. Returns `false` when it had already reached a terminal
/// status. Killing an admitted action frees its slot for the next one.
pub fn kill_action(
    store: &dyn Store,
    admission: &AdmissionController<'_>,
    id: &ActionId,
    now: DateTime<Utc>,
) -> Result<bool> {
    let freed_slot = transact(store, |txn| {
        let mut action = txn.action(id)?;
        if action.status.is_terminal() {
            return Ok(None);
        }
        let was_admitted = action.status.is_admitted();
        action.transition(ActionStatus::Killed, now)?;
        txn.put_action(&mut action)?;
        settle_job(txn, &id.job_id, now)?;
        Ok(Some(was_admitted))
    })?;

    match freed_slot {
        None => Ok(false),
        Some(was_admitted) => {
            tracing::info!(action_id = %id, "action killed");
            if was_admitted {
                admission.admit(&id.job_id, now)?;
            }
            Ok(true)
        }
    }
}

/// Kill a job and every action that has not finished. Returns the number of
/// actions killed; a job that already finished is left alone.
pub fn kill_job(store: &dyn Store, job_id: &str, now: DateTime<Utc>) -> Result<usize> {
    let killed = transact(store, |txn| {
        let mut job = txn.job(job_id)?;
        if job.status.is_terminal() {
            return Ok(0);
        }
        let mut killed = 0;
        for mut action in txn.actions_for_job(job_id)? {
            if action.status.is_terminal() {
                continue;
            }
            action.transition(ActionStatus::Killed, now)?;
            txn.put_action(&mut action)?;
            killed += 1;
        }
        job.status = JobStatus::Killed;
        job.updated_at = now;
        txn.put_job(&mut job)?;
        Ok(killed)
    })?;
    tracing::info!(job_id = %job_id, killed, "job killed");
    Ok(killed)
}

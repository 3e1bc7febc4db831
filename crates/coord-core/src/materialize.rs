//! Job materialization: one WAITING action per nominal time in a window.
//!
//! Action numbers are assigned strictly in nominal-time order starting at
//! `last_action_number + 1`, so they stay gap-free. A window is written in a
//! single transaction together with the job's advanced counters; on any
//! failure nothing from the window is visible.
//!
//! An action with nothing to probe has nothing to wait for and is written
//! READY, payload included, so a WAITING action always has a missing list.

use crate::action::{ActionId, CoordinatorAction};
use crate::error::{CoordError, Result};
use crate::input_check::build_payload;
use crate::store::{read, transact, Store, StoreTxn};
use crate::types::{ActionStatus, JobStatus};
use chrono::{DateTime, Duration, Utc};

/// Materialize every nominal time of `job_id` in `[window_start, window_end)`,
/// clipped to the job's own bounds.
///
/// Fails with [`CoordError::AlreadyMaterialized`] when the window lies
/// entirely inside the already-materialized range and with
/// [`CoordError::WindowGap`] when it starts after the next unmaterialized
/// nominal time.
pub fn materialize(
    store: &dyn Store,
    job_id: &str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<CoordinatorAction>> {
    let created = transact(store, |txn| {
        materialize_in(txn, job_id, window_start, window_end, now)
    })?;
    if !created.is_empty() {
        tracing::info!(
            job_id = %job_id,
            count = created.len(),
            first = %created[0].id,
            "materialized actions"
        );
    }
    Ok(created)
}

/// Materialize from the job's next unmaterialized nominal time up to
/// `now + lookahead`. Returns an empty list when nothing is due.
pub fn materialize_due(
    store: &dyn Store,
    job_id: &str,
    lookahead: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<CoordinatorAction>> {
    let job = read(store, |txn| txn.job(job_id))?;
    if job.done_materialization || job.status.is_terminal() {
        return Ok(Vec::new());
    }
    let start = match job.next_materialized_time {
        Some(t) => t,
        None => job.start,
    };
    let end = now + lookahead;
    if start >= end {
        return Ok(Vec::new());
    }
    match materialize(store, job_id, start, end, now) {
        Err(CoordError::AlreadyMaterialized { .. }) => Ok(Vec::new()),
        other => other,
    }
}

fn materialize_in(
    txn: &mut dyn StoreTxn,
    job_id: &str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<CoordinatorAction>> {
    let mut job = txn.job(job_id)?;
    if job.status.is_terminal() {
        return Err(CoordError::InvalidTransition {
            from: job.status.to_string(),
            to: JobStatus::Running.to_string(),
        });
    }

    let mut number = job.last_action_number + 1;
    let mut nominal = job.nominal_time(number)?;

    if nominal < window_end && job.within_end(nominal) && nominal < window_start {
        return Err(CoordError::WindowGap {
            job_id: job.id.clone(),
            expected_next: nominal,
        });
    }

    let mut created = Vec::new();
    while nominal < window_end && job.within_end(nominal) {
        let inputs = job.bind(&job.inputs, nominal)?;
        let missing = job.probe_targets(&inputs)?;
        let mut action = CoordinatorAction::new_waiting(
            ActionId::new(job.id.clone(), number),
            nominal,
            inputs,
            missing,
            now,
        );
        if action.missing_dependencies.is_empty() {
            let outputs = job.bind(&job.outputs, nominal)?;
            action.payload = Some(build_payload(&job, &action, &action.inputs, &outputs));
            action.transition(ActionStatus::Ready, now)?;
        }
        txn.put_action(&mut action)?;
        created.push(action);
        number += 1;
        nominal = job.nominal_time(number)?;
    }

    if created.is_empty() {
        let overlaps_materialized = job.last_action_number > 0
            && window_end > job.start
            && window_start <= job.nominal_time(job.last_action_number)?;
        if overlaps_materialized {
            return Err(CoordError::AlreadyMaterialized {
                job_id: job.id.clone(),
                window_start,
            });
        }
        return Ok(created);
    }

    job.last_action_number = number - 1;
    job.next_materialized_time = Some(nominal);
    job.done_materialization = !job.within_end(nominal);
    if matches!(job.status, JobStatus::Prep | JobStatus::Premater) {
        job.status = JobStatus::Running;
    }
    job.updated_at = now;
    txn.put_job(&mut job)?;
    Ok(created)
}

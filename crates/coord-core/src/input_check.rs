//! The input-check cycle for one action.
//!
//! A check reads the action, probes its inputs with no transaction open, and
//! then writes the outcome in a second transaction only if the action is
//! still WAITING at the version first observed. A concurrent check, a kill
//! or any other write in between turns this check into a no-op, so the
//! WAITING → READY transition commits at most once and a cancelled action is
//! never written back to WAITING or READY.
//!
//! The check is safe to invoke repeatedly; when to invoke it is up to the
//! caller.

use crate::action::{ActionId, ActionPayload, CoordinatorAction};
use crate::admission::AdmissionController;
use crate::dataset::BoundDependency;
use crate::dependency::{check_all, ExistenceOracle};
use crate::error::Result;
use crate::expr::{expand_all, PayloadScope};
use crate::job::CoordinatorJob;
use crate::lifecycle::settle_job;
use crate::store::{read, transact, Store};
use crate::types::{ActionStatus, TimeoutBasis};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// What one invocation of [`InputChecker::check_inputs`] did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// The action was not WAITING; nothing was done.
    Skipped { status: ActionStatus },
    /// Another writer changed the action while its inputs were being probed.
    Superseded,
    /// Still waiting on `missing`.
    Waiting { missing: Vec<String> },
    /// All inputs present; the action is READY and `admitted` were admitted.
    Ready { admitted: Vec<ActionId> },
    /// The timeout elapsed before the inputs appeared.
    TimedOut,
}

pub struct InputChecker<'a> {
    store: &'a dyn Store,
    oracle: &'a dyn ExistenceOracle,
    admission: AdmissionController<'a>,
}

impl<'a> InputChecker<'a> {
    pub fn new(
        store: &'a dyn Store,
        oracle: &'a dyn ExistenceOracle,
        admission: AdmissionController<'a>,
    ) -> Self {
        Self {
            store,
            oracle,
            admission,
        }
    }

    pub fn check_inputs(&self, id: &ActionId, now: DateTime<Utc>) -> Result<CheckOutcome> {
        let (job, observed) =
            read(self.store, |txn| Ok((txn.job(&id.job_id)?, txn.action(id)?)))?;
        if observed.status != ActionStatus::Waiting {
            return Ok(CheckOutcome::Skipped {
                status: observed.status,
            });
        }

        if timed_out(&job, &observed, now) {
            let outcome = self.commit_if_unchanged(&observed, now, |action| {
                action.transition(ActionStatus::TimedOut, now)
            })?;
            if outcome.is_none() {
                tracing::info!(action_id = %id, "action timed out waiting for inputs");
            }
            return Ok(outcome.unwrap_or(CheckOutcome::TimedOut));
        }

        let inputs = job.bind(&job.inputs, observed.nominal_time)?;
        let targets = job.probe_targets(&inputs)?;
        let report = check_all(self.oracle, &targets);

        if !report.is_complete() {
            let missing = report.missing;
            let outcome = self.commit_if_unchanged(&observed, now, |action| {
                action.missing_dependencies = missing.clone();
                action.updated_at = now;
                Ok(())
            })?;
            tracing::debug!(action_id = %id, missing = missing.len(), "inputs still missing");
            return Ok(outcome.unwrap_or(CheckOutcome::Waiting { missing }));
        }

        let outputs = job.bind(&job.outputs, observed.nominal_time)?;
        let payload = build_payload(&job, &observed, &inputs, &outputs);
        let outcome = self.commit_if_unchanged(&observed, now, |action| {
            action.transition(ActionStatus::Ready, now)?;
            action.payload = Some(payload);
            Ok(())
        })?;
        if let Some(outcome) = outcome {
            return Ok(outcome);
        }
        tracing::info!(action_id = %id, "inputs satisfied, action ready");

        let admitted = match self.admission.admit(&id.job_id, now) {
            Ok(admitted) => admitted,
            Err(e) => {
                tracing::warn!(action_id = %id, error = %e, "admission deferred");
                Vec::new()
            }
        };
        Ok(CheckOutcome::Ready { admitted })
    }

    /// Apply `update` to the stored action if it is still the WAITING row we
    /// observed. Returns `Some(outcome)` describing why nothing was written.
    fn commit_if_unchanged(
        &self,
        observed: &CoordinatorAction,
        now: DateTime<Utc>,
        update: impl FnOnce(&mut CoordinatorAction) -> Result<()>,
    ) -> Result<Option<CheckOutcome>> {
        transact(self.store, |txn| {
            let mut action = txn.action(&observed.id)?;
            if action.status != ActionStatus::Waiting {
                return Ok(Some(CheckOutcome::Skipped {
                    status: action.status,
                }));
            }
            if action.version != observed.version {
                tracing::debug!(action_id = %observed.id, "action changed during check");
                return Ok(Some(CheckOutcome::Superseded));
            }
            update(&mut action)?;
            txn.put_action(&mut action)?;
            if action.status.is_terminal() {
                settle_job(txn, &action.id.job_id, now)?;
            }
            Ok(None)
        })
    }
}

fn timed_out(job: &CoordinatorJob, action: &CoordinatorAction, now: DateTime<Utc>) -> bool {
    let Some(timeout) = job.timeout() else {
        return false;
    };
    let since = match job.timeout_basis {
        TimeoutBasis::NominalTime => action.nominal_time,
        TimeoutBasis::CreatedTime => action.created_at,
    };
    now - since > timeout
}

fn by_name(bound: &[BoundDependency]) -> BTreeMap<String, Vec<String>> {
    bound
        .iter()
        .map(|b| (b.name.clone(), b.locations.clone()))
        .collect()
}

/// The payload handed to the submitter once every input is present.
pub(crate) fn build_payload(
    job: &CoordinatorJob,
    action: &CoordinatorAction,
    inputs: &[BoundDependency],
    outputs: &[BoundDependency],
) -> ActionPayload {
    let inputs = by_name(inputs);
    let outputs = by_name(outputs);
    let action_id = action.id.to_string();
    let properties = expand_all(
        &job.properties,
        &PayloadScope {
            action_id: &action_id,
            nominal_time: action.nominal_time,
            inputs: &inputs,
            outputs: &outputs,
        },
    );
    ActionPayload {
        action_id: action.id.clone(),
        nominal_time: action.nominal_time,
        inputs,
        outputs,
        properties,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::Submitter;
    use crate::dependency::OracleError;
    use crate::job::tests::{reference_job, utc};
    use crate::lifecycle::kill_job;
    use crate::materialize::materialize;
    use crate::store::MemoryStore;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Present(Mutex<HashSet<String>>);

    impl Present {
        fn add(&self, location: &str) {
            self.0.lock().unwrap().insert(location.to_string());
        }
    }

    impl ExistenceOracle for Present {
        fn exists(&self, location: &str) -> std::result::Result<bool, OracleError> {
            Ok(self.0.lock().unwrap().contains(location))
        }
    }

    #[derive(Default)]
    struct Accept(Mutex<Vec<ActionPayload>>);

    impl Submitter for Accept {
        fn submit(&self, _: &CoordinatorAction, payload: &ActionPayload) -> Result<()> {
            self.0.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    const ALL: [&str; 4] = [
        "file:///data/2009/08/",
        "file:///data/2009/15/",
        "file:///data/2009/22/",
        "file:///data/2009/29/",
    ];

    fn setup(timeout_minutes: Option<u32>) -> (MemoryStore, ActionId) {
        let mut job = reference_job("/data");
        job.timeout_minutes = timeout_minutes;
        let id = job.id.clone();
        let store = MemoryStore::new();
        transact(&store, |txn| txn.put_job(&mut job)).unwrap();
        materialize(&store, &id, job.start, job.end, utc("2009-02-01T00:00:00Z")).unwrap();
        (store, ActionId::new(id, 1))
    }

    fn stored(store: &MemoryStore, id: &ActionId) -> CoordinatorAction {
        let txn = store.begin().unwrap();
        let action = txn.action(id).unwrap();
        txn.rollback().unwrap();
        action
    }

    fn check(store: &MemoryStore, oracle: &Present, submitter: &Accept, id: &ActionId, now: &str) -> CheckOutcome {
        let checker = InputChecker::new(store, oracle, AdmissionController::new(store, submitter));
        checker.check_inputs(id, utc(now)).unwrap()
    }

    #[test]
    fn partial_inputs_keep_action_waiting() {
        let (store, id) = setup(None);
        let oracle = Present::default();
        oracle.add(ALL[3]);
        let submitter = Accept::default();

        let outcome = check(&store, &oracle, &submitter, &id, "2009-02-02T00:00:00Z");
        let expected = vec![ALL[0].to_string(), ALL[1].to_string(), ALL[2].to_string()];
        assert_eq!(outcome, CheckOutcome::Waiting { missing: expected.clone() });

        let action = stored(&store, &id);
        assert_eq!(action.status, ActionStatus::Waiting);
        assert_eq!(action.missing_dependencies, expected);

        // Unchanged oracle, same answer.
        let again = check(&store, &oracle, &submitter, &id, "2009-02-02T01:00:00Z");
        assert_eq!(again, CheckOutcome::Waiting { missing: expected.clone() });
        assert_eq!(stored(&store, &id).missing_dependencies, expected);
    }

    #[test]
    fn stale_missing_entries_are_replaced() {
        let (store, id) = setup(None);
        let oracle = Present::default();
        let submitter = Accept::default();
        check(&store, &oracle, &submitter, &id, "2009-02-02T00:00:00Z");
        assert_eq!(stored(&store, &id).missing_dependencies.len(), 4);

        oracle.add(ALL[0]);
        oracle.add(ALL[2]);
        check(&store, &oracle, &submitter, &id, "2009-02-02T00:10:00Z");
        assert_eq!(
            stored(&store, &id).missing_dependencies,
            vec![ALL[1].to_string(), ALL[3].to_string()]
        );
    }

    #[test]
    fn all_inputs_present_makes_action_ready_and_admits_it() {
        let (store, id) = setup(None);
        let oracle = Present::default();
        ALL.iter().for_each(|l| oracle.add(l));
        let submitter = Accept::default();

        let outcome = check(&store, &oracle, &submitter, &id, "2009-02-02T00:00:00Z");
        assert_eq!(outcome, CheckOutcome::Ready { admitted: vec![id.clone()] });

        let action = stored(&store, &id);
        assert_eq!(action.status, ActionStatus::Submitted);
        assert!(action.missing_dependencies.is_empty());

        let payloads = submitter.0.lock().unwrap();
        let payload = &payloads[0];
        assert_eq!(payload.inputs["A"], ALL.to_vec());
        assert_eq!(payload.outputs["LOCAL_A"], vec!["file:///data/2009/29/".to_string()]);
        assert_eq!(payload.properties["inputA"], ALL.join(","));
        assert_eq!(payload.properties["inputB"], "file:///data/2009/29/");
    }

    #[test]
    fn check_on_non_waiting_action_is_a_no_op() {
        let (store, id) = setup(None);
        let oracle = Present::default();
        ALL.iter().for_each(|l| oracle.add(l));
        let submitter = Accept::default();
        check(&store, &oracle, &submitter, &id, "2009-02-02T00:00:00Z");

        let before = stored(&store, &id);
        let outcome = check(&store, &oracle, &submitter, &id, "2009-02-02T00:05:00Z");
        assert_eq!(outcome, CheckOutcome::Skipped { status: ActionStatus::Submitted });
        assert_eq!(stored(&store, &id).version, before.version);
        assert_eq!(submitter.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn timeout_wins_even_when_inputs_arrive() {
        let (store, id) = setup(Some(10));
        let oracle = Present::default();
        let submitter = Accept::default();

        let early = check(&store, &oracle, &submitter, &id, "2009-02-02T00:05:00Z");
        assert!(matches!(early, CheckOutcome::Waiting { .. }));

        ALL.iter().for_each(|l| oracle.add(l));
        let late = check(&store, &oracle, &submitter, &id, "2009-02-02T00:30:00Z");
        assert_eq!(late, CheckOutcome::TimedOut);

        let action = stored(&store, &id);
        assert_eq!(action.status, ActionStatus::TimedOut);
        assert!(action.missing_dependencies.is_empty());
        assert!(submitter.0.lock().unwrap().is_empty());

        let txn = store.begin().unwrap();
        let job = txn.job(&id.job_id).unwrap();
        txn.rollback().unwrap();
        assert_eq!(job.status, crate::types::JobStatus::DoneWithError);
    }

    #[test]
    fn store_failure_leaves_action_waiting() {
        let (store, id) = setup(None);
        let oracle = Present::default();
        ALL.iter().for_each(|l| oracle.add(l));
        let submitter = Accept::default();

        store.fail_next_commit();
        let checker = InputChecker::new(&store, &oracle, AdmissionController::new(&store, &submitter));
        let err = checker.check_inputs(&id, utc("2009-02-02T00:00:00Z")).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(stored(&store, &id).status, ActionStatus::Waiting);

        let retry = check(&store, &oracle, &submitter, &id, "2009-02-02T00:01:00Z");
        assert!(matches!(retry, CheckOutcome::Ready { .. }));
    }

    /// Kills the job the first time it is asked about a location.
    struct KillingOracle<'a> {
        store: &'a MemoryStore,
        job_id: String,
        fired: Mutex<bool>,
    }

    impl ExistenceOracle for KillingOracle<'_> {
        fn exists(&self, _: &str) -> std::result::Result<bool, OracleError> {
            let mut fired = self.fired.lock().unwrap();
            if !*fired {
                *fired = true;
                kill_job(self.store, &self.job_id, Utc::now()).unwrap();
            }
            Ok(true)
        }
    }

    #[test]
    fn kill_during_probe_is_not_overwritten() {
        let (store, id) = setup(None);
        let oracle = KillingOracle {
            store: &store,
            job_id: id.job_id.clone(),
            fired: Mutex::new(false),
        };
        let submitter = Accept::default();
        let checker = InputChecker::new(&store, &oracle, AdmissionController::new(&store, &submitter));

        let outcome = checker.check_inputs(&id, utc("2009-02-02T00:00:00Z")).unwrap();
        assert_eq!(outcome, CheckOutcome::Skipped { status: ActionStatus::Killed });
        assert_eq!(stored(&store, &id).status, ActionStatus::Killed);
        assert!(submitter.0.lock().unwrap().is_empty());
    }
}

use chrono::{DateTime, Duration, Utc};
use coord_core::config::JobDefinition;
use coord_core::materialize::{materialize, materialize_due};
use coord_core::store::{read, transact, RedbStore};
use coord_core::types::{ActionStatus, JobStatus};
use coord_core::CoordError;
use tempfile::TempDir;

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

const HOURLY: &str = r#"
name: hourly
frequency: 1
unit: hour
timezone: America/New_York
start: 2021-06-01T00:00:00Z
end: 2021-06-02T00:00:00Z
datasets:
  - name: logs
    frequency: 1
    unit: hour
    timezone: America/New_York
    initial_instance: 2021-01-01T05:00:00Z
    uri_template: file:///logs/${YEAR}/${MONTH}/${DAY}/${HOUR}
    done_flag: _SUCCESS
inputs:
  - name: LOGS
    dataset: logs
    start_instance: -1
    end_instance: 0
"#;

fn seeded(dir: &TempDir) -> (RedbStore, String) {
    let store = RedbStore::open(&dir.path().join("coord.db")).unwrap();
    let mut job = JobDefinition::from_yaml(HOURLY)
        .unwrap()
        .into_job(utc("2021-06-01T00:00:00Z"))
        .unwrap();
    transact(&store, |txn| txn.put_job(&mut job)).unwrap();
    (store, job.id)
}

#[test]
fn repeated_window_creates_nothing() {
    let dir = TempDir::new().unwrap();
    let (store, job_id) = seeded(&dir);
    let now = utc("2021-06-01T00:00:00Z");
    let (from, to) = (utc("2021-06-01T00:00:00Z"), utc("2021-06-01T06:00:00Z"));

    let created = materialize(&store, &job_id, from, to, now).unwrap();
    assert_eq!(created.len(), 6);

    let err = materialize(&store, &job_id, from, to, now).unwrap_err();
    assert!(matches!(err, CoordError::AlreadyMaterialized { .. }));

    let actions = read(&store, |txn| txn.actions_for_job(&job_id)).unwrap();
    assert_eq!(actions.len(), 6);
}

#[test]
fn adjacent_windows_number_contiguously() {
    let dir = TempDir::new().unwrap();
    let (store, job_id) = seeded(&dir);
    let now = utc("2021-06-01T00:00:00Z");

    materialize(&store, &job_id, utc("2021-06-01T00:00:00Z"), utc("2021-06-01T03:00:00Z"), now).unwrap();
    materialize(&store, &job_id, utc("2021-06-01T03:00:00Z"), utc("2021-06-01T05:00:00Z"), now).unwrap();

    let actions = read(&store, |txn| txn.actions_for_job(&job_id)).unwrap();
    let numbers: Vec<u64> = actions.iter().map(|a| a.id.number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    assert!(actions.windows(2).all(|w| w[0].nominal_time < w[1].nominal_time));
    assert!(actions.iter().all(|a| a.status == ActionStatus::Waiting));

    // Two hourly instances, each behind its done flag.
    assert_eq!(
        actions[0].missing_dependencies,
        vec![
            "file:///logs/2021/05/31/19/_SUCCESS".to_string(),
            "file:///logs/2021/05/31/20/_SUCCESS".to_string(),
        ]
    );
}

#[test]
fn skipping_ahead_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (store, job_id) = seeded(&dir);
    let now = utc("2021-06-01T00:00:00Z");
    let err = materialize(&store, &job_id, utc("2021-06-01T04:00:00Z"), utc("2021-06-01T06:00:00Z"), now)
        .unwrap_err();
    assert!(matches!(err, CoordError::WindowGap { .. }));
    assert!(read(&store, |txn| txn.actions_for_job(&job_id)).unwrap().is_empty());
}

#[test]
fn state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let job_id = {
        let (store, job_id) = seeded(&dir);
        let created = materialize_due(&store, &job_id, Duration::hours(2), utc("2021-06-01T00:30:00Z")).unwrap();
        assert_eq!(created.len(), 3);
        job_id
    };

    let store = RedbStore::open(&dir.path().join("coord.db")).unwrap();
    let job = read(&store, |txn| txn.job(&job_id)).unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.last_action_number, 3);
    assert_eq!(job.next_materialized_time, Some(utc("2021-06-01T03:00:00Z")));

    let more = materialize_due(&store, &job_id, Duration::hours(2), utc("2021-06-01T01:30:00Z")).unwrap();
    assert_eq!(more.iter().map(|a| a.id.number).collect::<Vec<_>>(), vec![4]);
}

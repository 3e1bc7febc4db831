#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn coord(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("coord").unwrap();
    cmd.current_dir(dir.path()).env("COORD_ROOT", dir.path());
    cmd
}

fn json(cmd: &mut Command) -> Value {
    let out = cmd.arg("--json").assert().success().get_output().stdout.clone();
    serde_json::from_slice(&out).unwrap()
}

/// Initialize, submit the two-day job and materialize both actions.
/// Returns the job id.
fn seeded(dir: &TempDir) -> String {
    coord(dir).arg("init").assert().success();
    let data = dir.path().join("data");
    let def = format!(
        r#"
name: daily
frequency: 1
unit: day
start: 2009-02-01T23:59:00Z
end: 2009-02-03T23:59:00Z
controls:
  concurrency: 1
datasets:
  - name: a
    frequency: 7
    unit: day
    initial_instance: 2009-01-01T01:00:00Z
    uri_template: file://{}/${{YEAR}}/${{DAY}}/
inputs:
  - name: A
    dataset: a
    start_instance: ${{coord:current(-1)}}
    end_instance: ${{coord:current(0)}}
properties:
  input: ${{coord:dataIn('A')}}
"#,
        data.display()
    );
    let file = dir.path().join("daily.yaml");
    std::fs::write(&file, def).unwrap();

    let job = json(coord(dir).args(["job", "submit"]).arg(&file));
    let id = job["id"].as_str().unwrap().to_string();

    coord(dir)
        .args(["materialize", &id, "--start", "2009-02-01T00:00:00Z", "--end", "2009-02-04T00:00:00Z"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("{id}@2")));
    id
}

fn add_instance(dir: &TempDir, day: &str) {
    std::fs::create_dir_all(dir.path().join("data/2009").join(day)).unwrap();
}

// ---------------------------------------------------------------------------
// coord init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_layout_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    coord(&dir).arg("init").assert().success();
    coord(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .coord/coord.db"));

    assert!(dir.path().join(".coord/coord.db").exists());
    assert!(dir.path().join(".coord/config.yaml").exists());
    assert!(dir.path().join(".coord/submissions").is_dir());
}

#[test]
fn commands_before_init_fail() {
    let dir = TempDir::new().unwrap();
    coord(&dir)
        .args(["job", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

// ---------------------------------------------------------------------------
// coord job
// ---------------------------------------------------------------------------

#[test]
fn invalid_definition_is_rejected() {
    let dir = TempDir::new().unwrap();
    coord(&dir).arg("init").assert().success();
    let file = dir.path().join("bad.yaml");
    std::fs::write(
        &file,
        "name: bad\nfrequency: 1\nunit: day\nstart: 2009-02-01T00:00:00Z\nend: 2009-01-01T00:00:00Z\n",
    )
    .unwrap();
    coord(&dir)
        .args(["job", "submit"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid job definition"));
}

#[test]
fn job_list_and_show() {
    let dir = TempDir::new().unwrap();
    let id = seeded(&dir);

    coord(&dir)
        .args(["job", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&id).and(predicate::str::contains("RUNNING")));

    let shown = json(coord(&dir).args(["job", "show", &id]));
    assert_eq!(shown["job"]["status"], "RUNNING");
    assert_eq!(shown["action_counts"]["WAITING"], 2);
}

#[test]
fn rematerializing_a_window_fails() {
    let dir = TempDir::new().unwrap();
    let id = seeded(&dir);
    coord(&dir)
        .args(["materialize", &id, "--start", "2009-02-01T00:00:00Z", "--end", "2009-02-04T00:00:00Z"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already materialized"));
}

// ---------------------------------------------------------------------------
// coord check / action
// ---------------------------------------------------------------------------

#[test]
fn check_reports_missing_then_ready() {
    let dir = TempDir::new().unwrap();
    let id = seeded(&dir);
    let first = format!("{id}@1");

    add_instance(&dir, "29");
    let outcome = json(coord(&dir).args(["check", &first]));
    assert_eq!(outcome["outcome"], "waiting");
    let missing = outcome["missing"].as_array().unwrap();
    assert_eq!(missing.len(), 1);
    assert!(missing[0].as_str().unwrap().contains("/2009/22/"));

    add_instance(&dir, "22");
    let outcome = json(coord(&dir).args(["check", &first]));
    assert_eq!(outcome["outcome"], "ready");
    assert_eq!(outcome["admitted"][0], first.as_str());

    let dropped = dir.path().join(".coord/submissions").join(format!("{first}.json"));
    let payload: Value = serde_json::from_str(&std::fs::read_to_string(dropped).unwrap()).unwrap();
    assert!(payload["properties"]["input"].as_str().unwrap().contains("/2009/22/,file://"));
}

#[test]
fn finishing_frees_the_slot_and_completes_the_job() {
    let dir = TempDir::new().unwrap();
    let id = seeded(&dir);
    for day in ["22", "29"] {
        add_instance(&dir, day);
    }
    let (first, second) = (format!("{id}@1"), format!("{id}@2"));

    coord(&dir).args(["check", &first]).assert().success();
    let outcome = json(coord(&dir).args(["check", &second]));
    assert_eq!(outcome["admitted"].as_array().unwrap().len(), 0);

    coord(&dir).args(["action", "start", &first]).assert().success();
    let finished = json(coord(&dir).args(["action", "finish", &first, "--outcome", "succeeded"]));
    assert_eq!(finished["admitted"][0], second.as_str());

    coord(&dir)
        .args(["action", "finish", &second, "--outcome", "failed"])
        .assert()
        .success();
    let shown = json(coord(&dir).args(["job", "show", &id]));
    assert_eq!(shown["job"]["status"], "DONEWITHERROR");
}

#[test]
fn action_list_filters_by_status() {
    let dir = TempDir::new().unwrap();
    let id = seeded(&dir);
    coord(&dir).args(["action", "kill", &format!("{id}@2")]).assert().success();

    let waiting = json(coord(&dir).args(["action", "list", &id, "--status", "waiting"]));
    assert_eq!(waiting.as_array().unwrap().len(), 1);
    let killed = json(coord(&dir).args(["action", "list", &id, "--status", "killed"]));
    assert_eq!(killed[0]["status"], "KILLED");
}

#[test]
fn malformed_action_id_is_rejected() {
    let dir = TempDir::new().unwrap();
    seeded(&dir);
    coord(&dir)
        .args(["check", "no-number-here"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid action id"));
}

#[test]
fn job_kill_stops_everything() {
    let dir = TempDir::new().unwrap();
    let id = seeded(&dir);
    let killed = json(coord(&dir).args(["job", "kill", &id]));
    assert_eq!(killed["killed_actions"], 2);

    let outcome = json(coord(&dir).args(["check", &format!("{id}@1")]));
    assert_eq!(outcome["outcome"], "skipped");
    assert_eq!(outcome["status"], "KILLED");
}

// ---------------------------------------------------------------------------
// coord run
// ---------------------------------------------------------------------------

#[test]
fn run_once_checks_every_waiting_action() {
    let dir = TempDir::new().unwrap();
    seeded(&dir);
    for day in ["22", "29"] {
        add_instance(&dir, day);
    }

    let summary = json(coord(&dir).args(["run", "--once"]));
    assert_eq!(summary["checked"], 2);
    assert_eq!(summary["ready"], 2);
    assert_eq!(summary["waiting"], 0);

    let dropped = std::fs::read_dir(dir.path().join(".coord/submissions")).unwrap().count();
    assert_eq!(dropped, 1, "concurrency 1 admits a single action");
}

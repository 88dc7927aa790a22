//! Smoke tests for the `memogarden` binary. Each test points
//! `MEMOGARDEN_DATA_DIR` at a fresh temporary directory so invocations don't
//! see each other's state and don't touch a real operator's `~/.memogarden`.
use assert_cmd::Command;
use predicates::prelude::*;

fn isolated_bin(data_dir: &std::path::Path) -> Command {
    let mut bin = Command::cargo_bin("memogarden").unwrap();
    bin.env("MEMOGARDEN_DATA_DIR", data_dir);
    bin
}

#[test]
fn status_reports_an_empty_garden() {
    let dir = tempfile::tempdir().unwrap();
    isolated_bin(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Facts:     0"))
        .stdout(predicate::str::contains("Entities:  0"));
}

#[test]
fn create_then_get_round_trips_through_the_cli() {
    let dir = tempfile::tempdir().unwrap();
    isolated_bin(dir.path())
        .args(["create", "artifact", r#"{"title": "first note"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"))
        .stdout(predicate::str::contains("first note"));
}

#[test]
fn create_rejects_invalid_json_payload() {
    let dir = tempfile::tempdir().unwrap();
    isolated_bin(dir.path())
        .args(["create", "artifact", "not json"])
        .assert()
        .failure();
}

#[test]
fn diagnose_reports_clean_state_for_a_fresh_garden() {
    let dir = tempfile::tempdir().unwrap();
    isolated_bin(dir.path())
        .arg("diagnose")
        .assert()
        .success()
        .stdout(predicate::str::contains("clean"));
}

#[test]
fn get_on_unknown_id_fails_with_not_found() {
    let dir = tempfile::tempdir().unwrap();
    isolated_bin(dir.path())
        .args(["get", "core_does_not_exist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not_found"));
}

#[test]
fn persists_entities_across_separate_invocations() {
    let dir = tempfile::tempdir().unwrap();

    let create_output = isolated_bin(dir.path())
        .args(["create", "artifact", r#"{"title": "durable note"}"#])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(create_output).unwrap();
    let json_start = stdout.find('{').expect("create prints a JSON entity body");
    let entity: serde_json::Value = serde_json::from_str(stdout[json_start..].trim()).unwrap();
    let id = entity["id"].as_str().unwrap().to_string();

    // A second, separate process invocation against the same data dir must
    // see the entity the first process wrote to its journal.
    isolated_bin(dir.path())
        .args(["get", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("durable note"));

    isolated_bin(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Entities:  1"));
}

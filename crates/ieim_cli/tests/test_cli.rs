use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn demos_dir() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos")
}

#[test]
fn ingest_then_process_runs_the_full_pipeline_for_one_message() {
    let tmp = tempfile::tempdir().unwrap();
    let pack_root = tmp.path().join("pack");
    let audit_root = tmp.path().join("audit");
    let mail_dir = tmp.path().join("mail");
    std::fs::create_dir_all(&pack_root).unwrap();
    std::fs::create_dir_all(&mail_dir).unwrap();

    std::fs::copy(demos_dir().join("routing_ruleset.json"), pack_root.join("routing_ruleset.json")).unwrap();
    std::fs::copy(demos_dir().join("sample_message.eml"), mail_dir.join("sample_message.eml")).unwrap();
    let config_path = demos_dir().join("config.yaml");

    let ingest_output = Command::cargo_bin("ieimctl")
        .unwrap()
        .args([
            "ingest",
            "--repo-root",
            tmp.path().to_str().unwrap(),
            "--config",
            config_path.to_str().unwrap(),
            "--pack-root",
            pack_root.to_str().unwrap(),
            "--audit-root",
            audit_root.to_str().unwrap(),
            "--mail-dir",
            mail_dir.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("ingested=1"))
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(ingest_output).unwrap();
    let message_id = stdout
        .lines()
        .find_map(|line| line.strip_prefix("ingested ").and_then(|rest| rest.split_whitespace().next()))
        .expect("ingest output names the new message id");

    Command::cargo_bin("ieimctl")
        .unwrap()
        .args([
            "process",
            "--repo-root",
            tmp.path().to_str().unwrap(),
            "--config",
            config_path.to_str().unwrap(),
            "--pack-root",
            pack_root.to_str().unwrap(),
            "--audit-root",
            audit_root.to_str().unwrap(),
            "--message-id",
            message_id,
        ])
        .assert()
        .code(predicate::in_iter([0i32, 30i32, 60i32]))
        .stdout(predicate::str::contains("queue_id"));
}

#[test]
fn verify_audit_walks_every_log_under_the_audit_root_and_reports_the_chain() {
    let tmp = tempfile::tempdir().unwrap();
    let pack_root = tmp.path().join("pack");
    let audit_root = tmp.path().join("audit");
    let mail_dir = tmp.path().join("mail");
    std::fs::create_dir_all(&pack_root).unwrap();
    std::fs::create_dir_all(&mail_dir).unwrap();
    std::fs::copy(demos_dir().join("routing_ruleset.json"), pack_root.join("routing_ruleset.json")).unwrap();
    std::fs::copy(demos_dir().join("sample_message.eml"), mail_dir.join("sample_message.eml")).unwrap();
    let config_path = demos_dir().join("config.yaml");

    Command::cargo_bin("ieimctl")
        .unwrap()
        .args([
            "ingest",
            "--repo-root",
            tmp.path().to_str().unwrap(),
            "--config",
            config_path.to_str().unwrap(),
            "--pack-root",
            pack_root.to_str().unwrap(),
            "--audit-root",
            audit_root.to_str().unwrap(),
            "--mail-dir",
            mail_dir.to_str().unwrap(),
        ])
        .assert()
        .success();

    Command::cargo_bin("ieimctl")
        .unwrap()
        .args(["verify-audit", "--audit-root", audit_root.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("lines_checked"));
}

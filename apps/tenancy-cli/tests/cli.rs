use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn tenancy(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tenancy").unwrap();
    cmd.current_dir(root)
        .env_remove("TENANCY__DATABASE__URL")
        .env_remove("RUST_LOG")
        .env("TENANCY__STORAGE__BASE_PATH", root.join("storage"))
        .env("TENANCY__CONFIG__CONFIG_PATH", root.join("config/tenants"))
        .env("TENANCY__STATE__PATH", root.join("state"))
        .arg("--no-color");
    cmd
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("tenancy")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("provision"))
        .stdout(predicate::str::contains("deprovision"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn test_provision_status_deprovision() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let descriptor = root.join("acme.json");
    std::fs::write(
        &descriptor,
        r#"{
            "id": "acme",
            "name": "Acme Inc",
            "databaseConfig": { "strategy": "prefix" },
            "resourceQuotas": { "quotas": { "storage": "5GB" } }
        }"#,
    )
    .unwrap();

    tenancy(root)
        .arg("provision")
        .arg(&descriptor)
        .assert()
        .success()
        .stdout(predicate::str::contains("Provisioned tenant acme"));
    assert!(root.join("storage/tenants/acme/uploads").is_dir());
    assert!(root.join("config/tenants/acme/tenant.json").is_file());

    tenancy(root)
        .args(["--format", "json", "status", "acme"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"storage\""))
        .stdout(predicate::str::contains("\"quota\": \"5GB\""));

    tenancy(root)
        .args(["deprovision", "acme", "--backup"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deprovisioned tenant acme"));
    assert!(!root.join("storage/tenants/acme").exists());
    assert!(root.join("storage/backups").is_dir());
}

#[test]
fn test_provision_rejects_invalid_id() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let descriptor = root.join("bad.yaml");
    std::fs::write(&descriptor, "id: \"bad id!\"\nname: Bad\n").unwrap();

    tenancy(root)
        .arg("provision")
        .arg(&descriptor)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid tenant id"));
    assert!(!root.join("storage").exists());
}

use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Minimal valid config: fast simulator, file-backed database in the tempdir.
fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let db = dir.path().join("line.db");
    let toml = format!(
        r#"
[line]
line_id = "line1"
fill_mode = "SIM"

[database]
path = "{}"

[simulator]
cans = 12
can_interval_ms = 0
seed = 7
flow_ml_per_ms = 0.3
noise_sigma_ml = 1.0

[[recipe]]
sku = "CIDER_500"
name = "Dry Cider 500ml"
target_ml = 500.0
base_valve_ms = 1480.0
"#,
        db.display()
    );
    let path = dir.path().join("canline.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn canline() -> Command {
    Command::cargo_bin("canline").unwrap()
}

#[test]
fn help_names_the_subcommands() {
    canline()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("spc"));
}

#[test]
fn self_check_passes() {
    canline()
        .arg("self-check")
        .assert()
        .success()
        .stdout(predicate::str::contains("self-check ok"));
}

#[test]
fn run_emits_status_events_and_spc_reads_them_back() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    canline()
        .arg("--config")
        .arg(&cfg)
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"type\":\"arrival\""))
        .stdout(predicate::str::contains("\"type\":\"fill_requested\""))
        .stdout(predicate::str::contains("\"type\":\"fill_result\""));

    // The same database now carries errors for the SPC report.
    canline()
        .arg("--config")
        .arg(&cfg)
        .arg("spc")
        .arg("--sku")
        .arg("CIDER_500")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"sku\": \"CIDER_500\""))
        .stdout(predicate::str::contains("\"state\""))
        .stdout(predicate::str::is_match("\"samples\": [1-9]").unwrap());
}

#[test]
fn spc_on_an_unknown_product_reports_unknown() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    canline()
        .arg("--config")
        .arg(&cfg)
        .arg("spc")
        .arg("--sku")
        .arg("NOT_A_SKU")
        .assert()
        .success()
        .stdout(predicate::str::contains("UNKNOWN"));
}

#[test]
fn corr_emits_a_corr_issued_event() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    canline()
        .arg("--config")
        .arg(&cfg)
        .arg("corr")
        .arg("--sku")
        .arg("CIDER_500")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"type\":\"corr_issued\""));
}

#[rstest]
#[case("gain = -1.0", "control.gain")]
#[case("window = 0", "control.window")]
#[case("max_valve_ms = 50.0", "control.max_valve_ms")]
fn invalid_control_config_is_rejected(#[case] line: &str, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let toml = format!("[control]\n{line}\n");
    let path = dir.path().join("bad.toml");
    fs::write(&path, toml).unwrap();

    canline()
        .arg("--config")
        .arg(&path)
        .arg("self-check")
        .assert()
        .failure()
        .stderr(predicate::str::contains(needle));
}

#[test]
fn run_without_recipes_fails_with_a_clear_message() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.toml");
    fs::write(&path, "[simulator]\ncans = 1\n").unwrap();

    canline()
        .arg("--config")
        .arg(&path)
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("recipe"));
}

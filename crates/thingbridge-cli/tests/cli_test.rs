//! CLI smoke tests

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

const GATEWAY_FILE: &str = r#"
[gateway]
name = "bench"

[[resources]]
device = "t1"
technology = "memory"

[resources.property]
name = "temperature"
data_type = "number"
config = "sensors/t1/temperature"

[resources.action]
name = "setTemperature"
data_type = "number"
config = "sensors/t1/set"
"#;

fn gateway_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(GATEWAY_FILE.as_bytes()).unwrap();
    file
}

fn thingbridge() -> Command {
    let mut cmd = Command::cargo_bin("thingbridge").unwrap();
    cmd.env_remove("THINGBRIDGE_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_technologies() {
    thingbridge()
        .arg("technologies")
        .assert()
        .success()
        .stdout(predicate::str::contains("memory"));
}

#[test]
fn test_check_lists_endpoints() {
    let file = gateway_file();
    thingbridge()
        .arg("check")
        .arg("--config")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("things/t1/properties/temperature"))
        .stdout(predicate::str::contains("things/t1/actions/setTemperature"))
        .stdout(predicate::str::contains("2 endpoint(s) OK"));
}

#[test]
fn test_write_to_memory_action() {
    let file = gateway_file();
    thingbridge()
        .args(["write", "things/t1/actions/setTemperature"])
        .arg(r#"{"setTemperature": 21.0}"#)
        .arg("--config")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("SUCCESS"));
}

#[test]
fn test_invalid_write_fails() {
    let file = gateway_file();
    thingbridge()
        .args(["write", "things/t1/actions/setTemperature", r#"{"mode": "eco"}"#])
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("FAILURE"));
}

#[test]
fn test_read_without_value_fails() {
    let file = gateway_file();
    thingbridge()
        .args(["read", "things/t1/properties/temperature"])
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("no value available"));
}

#[test]
fn test_missing_config_file() {
    thingbridge()
        .args(["check", "--config", "/nonexistent/thingbridge.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load gateway file"));
}

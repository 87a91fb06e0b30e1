//! End-to-end runs of the binary that fail before any network access.

use std::io::Write;
use std::process::{Command, Output};

use serde_json::Value;

fn run(subcommand: &str, args: &str) -> (Output, Value) {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "log_level = \"error\"\n").unwrap();

    let mut file = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
    file.write_all(args.as_bytes()).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_hwmctl"))
        .arg(subcommand)
        .arg("--args")
        .arg(file.path())
        .env("HWM_CONFIG", &config)
        .env_remove("RUST_LOG")
        .output()
        .unwrap();

    let stdout = String::from_utf8(output.stdout.clone()).unwrap();
    let value = serde_json::from_str(stdout.trim()).unwrap();
    (output, value)
}

#[test]
fn test_malformed_arguments() {
    let (output, value) = run("server-profile", "{not json");

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(value["failed"], true);
    assert_eq!(value["error"], "invalid_arguments");
}

#[test]
fn test_incomplete_static_addressing() {
    let (output, value) = run(
        "appliance-settings",
        r#"{
            "initial_ip": "192.0.2.10",
            "username": "Administrator",
            "password": "s3cret",
            "ipv4_type": "STATIC",
            "ipv4_address": "192.0.2.20",
            "hostname": "ov.example.com"
        }"#,
    );

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(value["error"], "invalid_desired_state");
    assert!(value["msg"].as_str().unwrap().contains("ipv4_subnet, ipv4_gateway"));
}

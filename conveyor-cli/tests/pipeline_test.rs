//! End-to-end runs of the `conveyor` binary

use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn conveyor() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_conveyor"));
    cmd.env_remove("RUST_LOG").env_remove("CONVEYOR_LOG_LEVEL");
    cmd
}

fn write_config(dir: &Path, engine: &str) -> PathBuf {
    let path = dir.join("conveyor.yaml");
    let yaml = format!(
        "orchestrator:\n  tick_interval_ms: 50\n  status_line: false\nengine:\n{}",
        engine
    );
    std::fs::write(&path, yaml).unwrap();
    path
}

fn run(config: &Path, cpus: &str) -> Output {
    conveyor()
        .arg("--config")
        .arg(config)
        .args(["run", "--cpus", cpus])
        .output()
        .unwrap()
}

fn event_numbers(stdout: &[u8]) -> Vec<u64> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| {
            let event: JsonValue = serde_json::from_str(line).unwrap();
            event["number"].as_u64().unwrap()
        })
        .collect()
}

#[test]
fn test_local_run_with_two_workers_completes() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "  source:\n    type: generate\n    count: 25\n  sink:\n    type: stdout\n  encoder: json\n",
    );

    let output = run(&config, "2");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(event_numbers(&output.stdout), (0..25).collect::<Vec<_>>());
}

#[test]
fn test_worker_fault_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "  source:\n    type: generate\n    count: 25\n  sink:\n    type: discard\n  fault:\n    event_number: 7\n    kind: ValueError\n    message: bad event\n",
    );

    let output = run(&config, "2");
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Run local crashed with ValueError"), "stderr: {}", stderr);
    assert!(stderr.contains("bad event"), "stderr: {}", stderr);
}

#[test]
fn test_single_process_run_with_file_source() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("events.txt");
    std::fs::write(&source, "{\"e\": 1}\n{\"e\": 2}\n{\"e\": 3}\n").unwrap();
    let sink = dir.path().join("out.jsonl");
    let config = write_config(
        dir.path(),
        &format!(
            "  source:\n    type: file\n    path: {}\n  sink:\n    type: file\n    path: {}\n  decoder: json\n",
            source.display(),
            sink.display()
        ),
    );

    let output = run(&config, "1");
    assert!(output.status.success());

    let written = std::fs::read(&sink).unwrap();
    assert_eq!(event_numbers(&written), vec![0, 1, 2]);
    let first: JsonValue =
        serde_json::from_str(String::from_utf8_lossy(&written).lines().next().unwrap()).unwrap();
    assert_eq!(first["data"], serde_json::json!({"e": 1}));
}

#[test]
fn test_zero_cpus_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "  sink:\n    type: discard\n");
    let output = run(&config, "0");
    assert!(!output.status.success());
}

#[test]
fn test_role_process_records_setup_failure() {
    let dir = tempfile::tempdir().unwrap();
    let slot = dir.path().join("worker.fault");

    let output = conveyor()
        .args(["--role-process", "--pipeline-config", "/nonexistent/conveyor/role.json"])
        .arg("--fault-slot")
        .arg(&slot)
        .output()
        .unwrap();
    assert!(!output.status.success());

    let record: JsonValue = serde_json::from_slice(&std::fs::read(&slot).unwrap()).unwrap();
    assert_eq!(record["exception_kind"], "IoError");
    assert!(record["traceback"]
        .as_str()
        .unwrap()
        .contains("Failed to read pipeline config"));
}

#[test]
fn test_config_validate_command() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_config(dir.path(), "  sink:\n    type: discard\n");
    let output = conveyor()
        .args(["config", "validate", "--config-file"])
        .arg(&good)
        .output()
        .unwrap();
    assert!(output.status.success());

    let bad = dir.path().join("bad.yaml");
    std::fs::write(&bad, "engine:\n  decoder: pickle\n").unwrap();
    let output = conveyor()
        .args(["config", "validate", "--config-file"])
        .arg(&bad)
        .output()
        .unwrap();
    assert!(!output.status.success());
}

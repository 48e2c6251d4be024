// tests/cli_test.rs
use std::{fs, path::PathBuf};

use anyhow::Result;
use assert_cmd::Command;
use predicates::str::contains;
use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};

fn write_pipeline(body: Value) -> Result<(TempDir, PathBuf)> {
    let dir = tempdir()?;
    let path = dir.path().join("pipeline.json");
    fs::write(&path, body.to_string())?;
    Ok((dir, path))
}

fn cloudsweep(dir: &TempDir) -> Result<Command> {
    let mut cmd = Command::cargo_bin("cloudsweep")?;
    cmd.current_dir(dir.path())
        .env_remove("CLOUDSWEEP_CONFIG")
        .args(["--log-level", "info"]);
    Ok(cmd)
}

#[test]
fn run_exits_zero_when_a_plugin_fails() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path().join("resources.jsonl");
    let summary = dir.path().join("summary.json");
    let (_pipeline_dir, pipeline) = write_pipeline(json!({
        "layers": {
            "enumerate": {"kind": "origin", "queue": "raw", "plugins": ["static-inventory"]},
            "persist": {"kind": "terminal", "dequeue": "raw", "plugins": ["jsonl-file"]}
        },
        "plugins": {
            "static-inventory": {"config": {
                "resources": [{"kind": "aws.s3.bucket", "payload": {"name": "logs"}}],
                "file": dir.path().join("missing-export.json")
            }},
            "jsonl-file": {"config": {"path": out}}
        },
        "engine": {"grace_period_ms": 100, "idle_delay_ms": 10}
    }))?;

    cloudsweep(&dir)?
        .arg("--config")
        .arg(&pipeline)
        .arg("run")
        .arg("--summary")
        .arg(&summary)
        .assert()
        .success()
        .stderr(contains("discover failed"));

    assert_eq!(fs::read_to_string(&out)?.lines().count(), 1);
    let report: Value = serde_json::from_str(&fs::read_to_string(&summary)?)?;
    let tallies = report["tallies"].as_array().cloned().unwrap_or_default();
    let enumerate = tallies
        .iter()
        .find(|entry| entry[0] == "enumerate")
        .expect("enumerate tally");
    assert_eq!(enumerate[1]["plugin_failures"], 1);
    Ok(())
}

#[test]
fn run_exits_one_when_no_plugin_is_enabled() -> Result<()> {
    let dir = tempdir()?;
    let (_pipeline_dir, pipeline) = write_pipeline(json!({
        "layers": {"out": {"kind": "terminal", "plugins": ["stdout"]}},
        "plugins": {"stdout": {"enabled": false}}
    }))?;

    cloudsweep(&dir)?
        .arg("--config")
        .arg(&pipeline)
        .arg("run")
        .assert()
        .code(1)
        .stderr(contains("no plugins were loaded"));
    Ok(())
}

#[test]
fn run_exits_one_on_distributed_fifo_without_url() -> Result<()> {
    let dir = tempdir()?;
    let (_pipeline_dir, pipeline) = write_pipeline(json!({
        "layers": {"out": {"kind": "terminal", "dequeue": "remote", "plugins": ["stdout"]}},
        "fifos": {"remote": {"type": "distributed"}},
        "plugins": {"stdout": {}}
    }))?;

    cloudsweep(&dir)?
        .arg("--config")
        .arg(&pipeline)
        .arg("run")
        .assert()
        .code(1)
        .stderr(contains("no broker `url` configured"));
    Ok(())
}

#[test]
fn validate_exits_one_for_a_missing_pipeline() -> Result<()> {
    let dir = tempdir()?;
    cloudsweep(&dir)?
        .arg("--config")
        .arg(dir.path().join("nope.yaml"))
        .arg("validate")
        .assert()
        .code(1);
    Ok(())
}

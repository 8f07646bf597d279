//! Process-level tests for the hostwatch binary

use chrono::{Duration, TimeZone, Utc};
use hostwatch_lib::models::MetricsSample;
use hostwatch_lib::storage::{HistoryStore, ModelStore};
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn hostwatch(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_hostwatch"))
        .args(args)
        .env_remove("HOSTWATCH_CONFIG")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run hostwatch")
}

fn write_config(dir: &Path) -> String {
    let path = dir.join("hostwatch.toml");
    let content = format!(
        "node_name = \"cli-test\"\ndata_dir = \"{}\"\n",
        dir.join("data").display()
    );
    std::fs::write(&path, content).unwrap();
    path.display().to_string()
}

#[test]
fn test_help_lists_flags() {
    let output = hostwatch(&["--help"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--train"));
    assert!(stdout.contains("--config"));
    assert!(stdout.contains("--interval"));
}

#[test]
fn test_train_with_empty_history_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    let output = hostwatch(&["--train", "--config", &config, "--log-format", "text"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not enough history"), "stderr: {}", stderr);
    assert!(!dir.path().join("data").join("model.bin").exists());
}

#[test]
fn test_train_from_history_writes_model() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    let history = HistoryStore::new(dir.path().join("data").join("history.csv"));
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    for i in 0..40 {
        let jitter = (i as f64 * 0.7).sin();
        history
            .append(&MetricsSample::from_values(
                start + Duration::minutes(i),
                [
                    12.0 + jitter * 3.0,
                    45.0 + jitter,
                    60.0,
                    180.0 + (i % 5) as f64,
                    0.9 + jitter * 0.2,
                    1500.0 + i as f64,
                    2200.0 + i as f64 * 2.0,
                    700.0 + i as f64 * 0.5,
                    650.0 + i as f64 * 0.3,
                ],
            ))
            .unwrap();
    }

    let output = hostwatch(&["--train", "--config", &config]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Model trained on 40 samples"));

    let model = ModelStore::new(dir.path().join("data").join("model.bin"))
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(model.sample_count, 40);
}

#[test]
fn test_missing_config_file_fails() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");

    let output = hostwatch(&["--train", "--config", &missing.display().to_string()]);
    assert!(!output.status.success());
}

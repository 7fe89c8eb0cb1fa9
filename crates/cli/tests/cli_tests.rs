//! CLI integration tests

use chrono::{Duration, FixedOffset, TimeZone, Utc};
use forecast_lib::{
    predictor::{FeatureBuilder, IncrementalTrainer, ScaledLinearRegression, TrainerConfig},
    storage::{FileModelStore, ModelStore},
    SensorKey, SeriesPoint,
};
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn sfp(model_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sfp"))
        .arg("--model-dir")
        .arg(model_dir)
        .args(args)
        .env_remove("SFP_MODEL_DIR")
        .output()
        .expect("Failed to execute sfp")
}

fn key() -> SensorKey {
    SensorKey::new("gw-1", "s-42", "temperature")
}

/// Train a model on two days of hourly readings and persist it
fn seed_model(dir: &Path) {
    let zone = FixedOffset::east_opt(9 * 3600).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 5, 1, 15, 0, 0).unwrap();
    let points: Vec<SeriesPoint> = (0..48)
        .map(|i| {
            let ts = end - Duration::hours(48 - i);
            SeriesPoint::new(ts, 20.0 + (i % 24) as f64 * 0.25)
        })
        .collect();

    let batch = FeatureBuilder::new(zone).observations(&points, None);
    let trainer = IncrementalTrainer::new(TrainerConfig::default()).unwrap();
    let outcome = trainer
        .update::<ScaledLinearRegression>(&key(), None, &batch)
        .unwrap();

    let store = FileModelStore::new(dir).unwrap();
    store.save(&key(), &outcome.state, end).unwrap();
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_sfp"))
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Sensor Forecast"), "Should show app name");
    assert!(stdout.contains("models"), "Should show models command");
    assert!(stdout.contains("forecast"), "Should show forecast command");
    assert!(stdout.contains("--model-dir"), "Should show model dir option");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_sfp"))
        .arg("--version")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("sfp"), "Should show binary name");
}

#[test]
fn test_forecast_help_lists_options() {
    let output = Command::new(env!("CARGO_BIN_EXE_sfp"))
        .args(["forecast", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("--days"));
    assert!(stdout.contains("--start"));
}

#[test]
fn test_models_list_empty_directory() {
    let temp_dir = TempDir::new().unwrap();

    let output = sfp(temp_dir.path(), &["models", "list"]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No models found"));
}

#[test]
fn test_missing_model_directory_fails() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope");

    let output = sfp(&missing, &["models", "list"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Model directory not found"));
}

#[test]
fn test_models_list_json() {
    let temp_dir = TempDir::new().unwrap();
    seed_model(temp_dir.path());

    let output = sfp(temp_dir.path(), &["--format", "json", "models", "list"]);

    assert!(output.status.success());
    let models: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let models = models.as_array().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0]["sensor_id"], "s-42");
    assert_eq!(models[0]["model_name"], "StandardScaler|LinearRegression");
}

#[test]
fn test_models_list_table() {
    let temp_dir = TempDir::new().unwrap();
    seed_model(temp_dir.path());

    let output = sfp(temp_dir.path(), &["models", "list"]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("s-42"));
    assert!(stdout.contains("Total: 1 models"));
}

#[test]
fn test_models_show_json() {
    let temp_dir = TempDir::new().unwrap();
    seed_model(temp_dir.path());

    let output = sfp(
        temp_dir.path(),
        &["--format", "json", "models", "show", "gw-1", "s-42", "temperature"],
    );

    assert!(output.status.success());
    let details: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(details["last_trained_at"], "2024-05-01T15:00:00Z");
    assert_eq!(details["metadata"]["format_version"], 1);
    // last reading was at 14:00 UTC, 23:00 in +09:00
    assert_eq!(details["last_feature_vector"]["hour"], 23.0);
    assert!(details["last_feature_vector"]["prev_target"].is_number());
}

#[test]
fn test_forecast_json() {
    let temp_dir = TempDir::new().unwrap();
    seed_model(temp_dir.path());

    let output = sfp(
        temp_dir.path(),
        &[
            "--format",
            "json",
            "forecast",
            "gw-1",
            "s-42",
            "temperature",
            "--days",
            "1",
            "--start",
            "2024-05-02T00:00:00+09:00",
        ],
    );

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let payload: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let predictions = payload["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), 24);

    let first = Utc.with_ymd_and_hms(2024, 5, 1, 15, 0, 0).unwrap();
    assert_eq!(predictions[0]["predicted_at"], first.timestamp_millis());
    assert_eq!(
        predictions[23]["predicted_at"],
        (first + Duration::hours(23)).timestamp_millis()
    );
    assert_eq!(payload["trained_at"], first.timestamp_millis());
}

#[test]
fn test_forecast_local_start_uses_utc_offset() {
    let temp_dir = TempDir::new().unwrap();
    seed_model(temp_dir.path());

    let output = sfp(
        temp_dir.path(),
        &[
            "--format",
            "json",
            "--utc-offset",
            "+00:00",
            "forecast",
            "gw-1",
            "s-42",
            "temperature",
            "--days",
            "1",
            "--start",
            "2024-05-02T00:00:00",
        ],
    );

    assert!(output.status.success());
    let payload: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let start = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
    assert_eq!(payload["predictions"][0]["predicted_at"], start.timestamp_millis());
}

#[test]
fn test_forecast_unknown_sensor_fails() {
    let temp_dir = TempDir::new().unwrap();
    seed_model(temp_dir.path());

    let output = sfp(temp_dir.path(), &["forecast", "gw-1", "s-404", "temperature"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No model stored"));
}

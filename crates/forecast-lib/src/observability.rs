//! Observability infrastructure for the forecast service
//!
//! Provides:
//! - Prometheus metrics (tick and training latency, per-sensor outcomes)
//! - Structured JSON logging of domain events with tracing

use crate::models::SensorKey;
use anyhow::{Context, Result};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Buckets for whole-tick durations (in seconds)
const TICK_BUCKETS: &[f64] = &[0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0];

/// Buckets for single training updates (in seconds)
const TRAINING_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ForecastMetricsInner> = OnceLock::new();

struct ForecastMetricsInner {
    tick_duration_seconds: Histogram,
    training_duration_seconds: Histogram,
    sensors_processed: IntCounter,
    models_accepted: IntCounter,
    models_rejected: IntCounter,
    sensors_skipped: IntCounter,
    sensors_failed: IntCounterVec,
    deliveries: IntCounterVec,
    prediction_step_failures: IntCounter,
    cached_models: IntGauge,
}

impl ForecastMetricsInner {
    fn new() -> Self {
        Self {
            tick_duration_seconds: register_histogram!(
                "sensor_forecast_tick_duration_seconds",
                "Time spent on one pass over all eligible sensors",
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),

            training_duration_seconds: register_histogram!(
                "sensor_forecast_training_duration_seconds",
                "Time spent on one incremental training update",
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register training_duration_seconds"),

            sensors_processed: register_int_counter!(
                "sensor_forecast_sensors_processed_total",
                "Sensors visited by the run coordinator"
            )
            .expect("Failed to register sensors_processed"),

            models_accepted: register_int_counter!(
                "sensor_forecast_models_accepted_total",
                "Training updates accepted, cold starts included"
            )
            .expect("Failed to register models_accepted"),

            models_rejected: register_int_counter!(
                "sensor_forecast_models_rejected_total",
                "Retrained models discarded by the performance gate"
            )
            .expect("Failed to register models_rejected"),

            sensors_skipped: register_int_counter!(
                "sensor_forecast_sensors_skipped_total",
                "Sensors skipped for lack of new data"
            )
            .expect("Failed to register sensors_skipped"),

            sensors_failed: register_int_counter_vec!(
                "sensor_forecast_sensors_failed_total",
                "Sensors whose tick failed, by error kind",
                &["kind"]
            )
            .expect("Failed to register sensors_failed"),

            deliveries: register_int_counter_vec!(
                "sensor_forecast_deliveries_total",
                "Forecast deliveries to the sink, by outcome",
                &["outcome"]
            )
            .expect("Failed to register deliveries"),

            prediction_step_failures: register_int_counter!(
                "sensor_forecast_prediction_step_failures_total",
                "Forecast steps that produced no value"
            )
            .expect("Failed to register prediction_step_failures"),

            cached_models: register_int_gauge!(
                "sensor_forecast_cached_models",
                "Models held in the coordinator cache"
            )
            .expect("Failed to register cached_models"),
        }
    }
}

/// Forecast metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ForecastMetrics {
    _private: (),
}

impl Default for ForecastMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ForecastMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ForecastMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ForecastMetricsInner {
        GLOBAL_METRICS.get_or_init(ForecastMetricsInner::new)
    }

    pub fn observe_tick_duration(&self, duration_secs: f64) {
        self.inner().tick_duration_seconds.observe(duration_secs);
    }

    pub fn observe_training_duration(&self, duration_secs: f64) {
        self.inner().training_duration_seconds.observe(duration_secs);
    }

    pub fn inc_sensors_processed(&self) {
        self.inner().sensors_processed.inc();
    }

    pub fn inc_models_accepted(&self) {
        self.inner().models_accepted.inc();
    }

    pub fn inc_models_rejected(&self) {
        self.inner().models_rejected.inc();
    }

    pub fn inc_sensors_skipped(&self) {
        self.inner().sensors_skipped.inc();
    }

    pub fn inc_sensors_failed(&self, kind: &str) {
        self.inner().sensors_failed.with_label_values(&[kind]).inc();
    }

    pub fn inc_delivery(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.inner().deliveries.with_label_values(&[outcome]).inc();
    }

    pub fn add_prediction_step_failures(&self, count: u64) {
        self.inner().prediction_step_failures.inc_by(count);
    }

    pub fn set_cached_models(&self, count: i64) {
        self.inner().cached_models.set(count);
    }
}

/// Encode every registered metric in the Prometheus text format
pub fn encode_metrics() -> Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    Ok(buffer)
}

/// Structured logger for forecast events
///
/// Every event carries a stable `event` field so log pipelines can filter
/// on it without parsing messages.
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn log_tick_started(&self, sensors: usize) {
        info!(
            event = "tick_started",
            service = %self.service,
            sensors = sensors,
            "Forecast tick started"
        );
    }

    /// Log an accepted training update
    pub fn log_model_trained(
        &self,
        key: &SensorKey,
        cold_start: bool,
        samples: usize,
        baseline_mae: Option<f64>,
        candidate_mae: f64,
        candidate_rmse: f64,
    ) {
        info!(
            event = "model_trained",
            service = %self.service,
            sensor = %key,
            cold_start = cold_start,
            samples = samples,
            baseline_mae = ?baseline_mae,
            candidate_mae = candidate_mae,
            candidate_rmse = candidate_rmse,
            "Model updated"
        );
    }

    /// Log a retrain discarded by the gate
    pub fn log_model_rejected(&self, key: &SensorKey, baseline_mae: f64, candidate_mae: f64) {
        info!(
            event = "model_rejected",
            service = %self.service,
            sensor = %key,
            baseline_mae = baseline_mae,
            candidate_mae = candidate_mae,
            "Retrained model not better, keeping incumbent"
        );
    }

    pub fn log_sensor_skipped(&self, key: &SensorKey, reason: &str) {
        info!(
            event = "sensor_skipped",
            service = %self.service,
            sensor = %key,
            reason = %reason,
            "Sensor skipped"
        );
    }

    pub fn log_sensor_failed(&self, key: &SensorKey, kind: &str, error: &str) {
        error!(
            event = "sensor_failed",
            service = %self.service,
            sensor = %key,
            kind = %kind,
            error = %error,
            "Sensor failed"
        );
    }

    pub fn log_forecast_delivered(&self, key: &SensorKey, points: usize, failed_steps: usize) {
        info!(
            event = "forecast_delivered",
            service = %self.service,
            sensor = %key,
            points = points,
            failed_steps = failed_steps,
            "Forecast delivered"
        );
    }

    pub fn log_delivery_failed(&self, key: &SensorKey, error: &str) {
        warn!(
            event = "delivery_failed",
            service = %self.service,
            sensor = %key,
            error = %error,
            "Forecast delivery failed"
        );
    }

    pub fn log_startup(&self, version: &str, model_dir: &str) {
        info!(
            event = "service_started",
            service = %self.service,
            version = %version,
            model_dir = %model_dir,
            "Sensor forecaster started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service,
            reason = %reason,
            "Sensor forecaster shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handles_share_registry() {
        let metrics = ForecastMetrics::new();
        let other = metrics.clone();

        metrics.observe_tick_duration(1.5);
        metrics.observe_training_duration(0.01);
        metrics.inc_sensors_processed();
        other.inc_models_accepted();
        other.inc_sensors_failed("source_failure");
        other.inc_delivery(true);
        other.add_prediction_step_failures(2);
        other.set_cached_models(3);

        let text = String::from_utf8(encode_metrics().unwrap()).unwrap();
        assert!(text.contains("sensor_forecast_tick_duration_seconds"));
        assert!(text.contains("sensor_forecast_sensors_failed_total{kind=\"source_failure\"}"));
        assert!(text.contains("sensor_forecast_deliveries_total{outcome=\"success\"}"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("sensor-forecaster");
        assert_eq!(logger.service, "sensor-forecaster");
        logger.log_tick_started(0);
    }
}

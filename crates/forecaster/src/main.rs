//! Sensor Forecaster - per-sensor incremental forecasting service
//!
//! Once per tick, retrains each eligible sensor's model on its newest
//! readings and delivers a fresh hourly forecast.

use anyhow::{Context, Result};
use forecast_lib::{
    api,
    health::HealthRegistry,
    observability::{ForecastMetrics, StructuredLogger},
    predictor::{
        Collaborators, CoordinatorConfig, FeatureBuilder, IncrementalTrainer, OutputConfig,
        OutputFormatter, RunCoordinator, ScaledLinearRegression, TrainerConfig,
    },
    remote::{HttpForecastSink, HttpSensorRegistry, InfluxConfig, InfluxSource},
    storage::FileModelStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::info;

mod config;
mod logging;

const FORECASTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::ForecastConfig::load()?;

    let _log_guard = logging::init(&config.log_level, config.log_file.as_deref())?;

    let logger = StructuredLogger::new("sensor-forecaster");
    logger.log_startup(FORECASTER_VERSION, &config.model_dir.display().to_string());

    let health_registry = HealthRegistry::with_components().await;
    let metrics = ForecastMetrics::new();

    let timeout = config.http_timeout();
    let registry = HttpSensorRegistry::new(&config.registry_url, &config.registry_status, timeout)?;
    let source = InfluxSource::new(InfluxConfig {
        url: config.influx_url.clone(),
        token: config.influx_token.clone(),
        org: config.influx_org.clone(),
        bucket: config.influx_bucket.clone(),
        timeout,
    })?;
    let sink = HttpForecastSink::new(&config.sink_url, timeout)?;
    let store = FileModelStore::<ScaledLinearRegression>::new(&config.model_dir)
        .context("Failed to open model directory")?;

    let trainer = IncrementalTrainer::new(TrainerConfig {
        seed: config.augment_seed,
        ..Default::default()
    })?;
    let formatter = OutputFormatter::with_config(OutputConfig {
        decimals: config.output_decimals,
    });

    let mut coordinator = RunCoordinator::new(
        Collaborators {
            registry: Arc::new(registry),
            source: Arc::new(source),
            sink: Arc::new(sink),
            store: Arc::new(store),
        },
        trainer,
        FeatureBuilder::new(config.zone()?),
        formatter,
        CoordinatorConfig {
            lookback: chrono::Duration::days(config.lookback_days as i64),
            horizon_days: config.horizon_days,
        },
    )
    .with_health(health_registry.clone())
    .with_logger(logger.clone());

    if config.run_once {
        let summary = coordinator.run_tick().await;
        info!(
            delivered = summary.delivered(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "Single tick complete"
        );
        logger.log_shutdown("run_once complete");
        return Ok(());
    }

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(health_registry, metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let mut interval = tokio::time::interval(Duration::from_secs(config.tick_interval_secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let summary = tokio::select! {
                    summary = coordinator.run_tick() => summary,
                    _ = &mut shutdown => {
                        logger.log_shutdown("SIGINT received during tick");
                        break;
                    }
                };
                info!(
                    delivered = summary.delivered(),
                    skipped = summary.skipped(),
                    failed = summary.failed(),
                    delivery_failures = summary.delivery_failures(),
                    duration_ms = summary.duration.as_millis() as u64,
                    "Tick complete"
                );
            }
            _ = &mut shutdown => {
                logger.log_shutdown("SIGINT received");
                break;
            }
        }
    }

    api_handle.abort();
    info!("Shutting down");

    Ok(())
}

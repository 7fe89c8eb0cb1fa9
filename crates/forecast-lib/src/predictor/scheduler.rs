//! Per-tick run coordination
//!
//! One tick walks every eligible sensor in turn: resolve its key, fetch new
//! data since the last accepted training, train, persist, forecast and
//! deliver. A failing sensor never stops the others.

use super::{
    FeatureBuilder, Forecaster, GateDecision, IncrementalTrainer, OutputFormatter, Regressor,
    DEFAULT_HORIZON_DAYS,
};
use crate::error::{EngineError, EngineResult};
use crate::health::HealthRegistry;
use crate::models::{ForecastPayload, ModelState, SensorKey, TrainingWindow};
use crate::observability::{ForecastMetrics, StructuredLogger};
use crate::remote::{ForecastSink, SensorRegistry, TimeSeriesSource};
use crate::storage::ModelStore;
use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Cold-start lookback, also the furthest any training window reaches back
pub const DEFAULT_LOOKBACK_DAYS: u32 = 90;

/// Configuration for the run coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub lookback: Duration,
    pub horizon_days: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::days(DEFAULT_LOOKBACK_DAYS as i64),
            horizon_days: DEFAULT_HORIZON_DAYS,
        }
    }
}

/// What happened to one sensor during a tick
#[derive(Debug, Clone, PartialEq)]
pub enum SensorOutcome {
    /// Forecast produced and accepted by the sink
    Delivered { decision: GateDecision, points: usize },
    /// Forecast produced but the sink refused it
    DeliveryFailed { decision: GateDecision, error: String },
    /// Nothing to train on
    Skipped { reason: String },
    /// The sensor's tick failed; `kind` is [`EngineError::kind`]
    Failed { kind: &'static str, error: String },
}

/// Result of one pass over all sensors
#[derive(Debug, Clone)]
pub struct TickSummary {
    pub started_at: DateTime<Utc>,
    pub duration: std::time::Duration,
    /// Set when the sensor list could not be loaded; no sensor was visited
    pub registry_error: Option<String>,
    /// Set when bare sensor ids could not be resolved to keys
    pub resolve_error: Option<String>,
    pub outcomes: Vec<(SensorKey, SensorOutcome)>,
}

impl TickSummary {
    fn empty(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            duration: std::time::Duration::ZERO,
            registry_error: None,
            resolve_error: None,
            outcomes: Vec::new(),
        }
    }

    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SensorOutcome::Delivered { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SensorOutcome::Skipped { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SensorOutcome::Failed { .. }))
            .count()
    }

    /// Failures of one error kind
    pub fn count_failed(&self, kind: &str) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SensorOutcome::Failed { kind: k, .. } if *k == kind))
            .count()
    }

    pub fn delivery_failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SensorOutcome::DeliveryFailed { .. }))
            .count()
    }

    pub fn outcome(&self, key: &SensorKey) -> Option<&SensorOutcome> {
        self.outcomes.iter().find(|(k, _)| k == key).map(|(_, o)| o)
    }
}

/// Remote and durable collaborators of the coordinator
pub struct Collaborators<R> {
    pub registry: Arc<dyn SensorRegistry>,
    pub source: Arc<dyn TimeSeriesSource>,
    pub sink: Arc<dyn ForecastSink>,
    pub store: Arc<dyn ModelStore<R>>,
}

/// A forecast ready for delivery
struct Prepared {
    decision: GateDecision,
    payload: ForecastPayload,
}

/// Drives training and forecasting for all sensors, one tick at a time
pub struct RunCoordinator<R> {
    registry: Arc<dyn SensorRegistry>,
    source: Arc<dyn TimeSeriesSource>,
    sink: Arc<dyn ForecastSink>,
    store: Arc<dyn ModelStore<R>>,
    cache: HashMap<SensorKey, ModelState<R>>,
    features: FeatureBuilder,
    trainer: IncrementalTrainer,
    forecaster: Forecaster,
    formatter: OutputFormatter,
    config: CoordinatorConfig,
    metrics: ForecastMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl<R> RunCoordinator<R>
where
    R: Regressor + Default + 'static,
{
    pub fn new(
        collaborators: Collaborators<R>,
        trainer: IncrementalTrainer,
        features: FeatureBuilder,
        formatter: OutputFormatter,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            registry: collaborators.registry,
            source: collaborators.source,
            sink: collaborators.sink,
            store: collaborators.store,
            cache: HashMap::new(),
            forecaster: Forecaster::new(features.clone()),
            features,
            trainer,
            formatter,
            config,
            metrics: ForecastMetrics::new(),
            logger: StructuredLogger::new("sensor-forecaster"),
            health: None,
        }
    }

    /// Report each finished tick to a health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn cached_models(&self) -> usize {
        self.cache.len()
    }

    pub fn cached(&self, key: &SensorKey) -> Option<&ModelState<R>> {
        self.cache.get(key)
    }

    /// Run one tick at the current time
    pub async fn run_tick(&mut self) -> TickSummary {
        self.run_tick_at(Utc::now()).await
    }

    /// Run one tick as if the clock read `now`
    pub async fn run_tick_at(&mut self, now: DateTime<Utc>) -> TickSummary {
        let started = Instant::now();
        let mut summary = TickSummary::empty(now);

        match self.eligible_keys(&mut summary).await {
            Some(keys) => {
                self.logger.log_tick_started(keys.len());
                for key in keys {
                    self.metrics.inc_sensors_processed();
                    let outcome = self.process_sensor(&key, now).await;
                    summary.outcomes.push((key, outcome));
                }
            }
            None => error!(
                error = summary.registry_error.as_deref().unwrap_or_default(),
                "Tick aborted, sensor list unavailable"
            ),
        }

        summary.duration = started.elapsed();
        self.metrics.observe_tick_duration(summary.duration.as_secs_f64());
        self.metrics.set_cached_models(self.cache.len() as i64);
        if let Some(health) = &self.health {
            health.record_tick(&summary).await;
        }

        debug!(
            delivered = summary.delivered(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            delivery_failures = summary.delivery_failures(),
            duration_ms = summary.duration.as_millis() as u64,
            "Tick finished"
        );
        summary
    }

    /// Sensor keys for this tick, or `None` when the registry is unreachable
    async fn eligible_keys(&self, summary: &mut TickSummary) -> Option<Vec<SensorKey>> {
        let descriptors = match self.registry.list_eligible().await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                summary.registry_error = Some(format!("{:#}", e));
                return None;
            }
        };

        let mut keys = BTreeSet::new();
        let mut bare_ids = BTreeSet::new();
        for descriptor in descriptors {
            match descriptor.key() {
                Some(key) => {
                    keys.insert(key);
                }
                None => {
                    bare_ids.insert(descriptor.sensor_id);
                }
            }
        }

        if !bare_ids.is_empty() {
            let ids: Vec<String> = bare_ids.into_iter().collect();
            match self.source.resolve_keys(&ids, self.config.lookback).await {
                Ok(resolution) => {
                    keys.extend(resolution.keys);
                    if !resolution.failed.is_empty() {
                        let failed: Vec<String> = resolution
                            .failed
                            .iter()
                            .map(|(id, e)| format!("{}: {}", id, e))
                            .collect();
                        warn!(
                            failed = resolution.failed.len(),
                            sensors = ids.len(),
                            "Some sensor ids could not be resolved"
                        );
                        summary.resolve_error = Some(format!(
                            "{} of {} sensor ids unresolved ({})",
                            failed.len(),
                            ids.len(),
                            failed.join("; ")
                        ));
                    }
                }
                Err(e) => {
                    warn!(
                        error = %format!("{:#}", e),
                        sensors = ids.len(),
                        "Failed to resolve sensor keys"
                    );
                    summary.resolve_error = Some(format!("{:#}", e));
                }
            }
        }

        Some(keys.into_iter().collect())
    }

    async fn process_sensor(&mut self, key: &SensorKey, now: DateTime<Utc>) -> SensorOutcome {
        let prepared = match self.train_and_forecast(key, now).await {
            Ok(Some(prepared)) => prepared,
            Ok(None) => {
                let reason = "no new observations in training window";
                self.logger.log_sensor_skipped(key, reason);
                self.metrics.inc_sensors_skipped();
                return SensorOutcome::Skipped {
                    reason: reason.to_string(),
                };
            }
            Err(EngineError::EmptyTrainingBatch(_)) => {
                let reason = "empty training batch";
                self.logger.log_sensor_skipped(key, reason);
                self.metrics.inc_sensors_skipped();
                return SensorOutcome::Skipped {
                    reason: reason.to_string(),
                };
            }
            Err(e) => {
                let error = e.to_string();
                self.logger.log_sensor_failed(key, e.kind(), &error);
                self.metrics.inc_sensors_failed(e.kind());
                return SensorOutcome::Failed {
                    kind: e.kind(),
                    error,
                };
            }
        };

        let points = prepared.payload.predictions.len();
        match self.sink.deliver(&prepared.payload).await {
            Ok(()) => {
                self.metrics.inc_delivery(true);
                let failed_steps = prepared
                    .payload
                    .predictions
                    .iter()
                    .filter(|p| p.predicted_value.is_none())
                    .count();
                self.logger.log_forecast_delivered(key, points, failed_steps);
                SensorOutcome::Delivered {
                    decision: prepared.decision,
                    points,
                }
            }
            Err(source) => {
                let e = EngineError::DeliveryFailure {
                    key: key.clone(),
                    source,
                };
                let error = format!("{:#}", e);
                self.metrics.inc_delivery(false);
                self.logger.log_delivery_failed(key, &error);
                SensorOutcome::DeliveryFailed {
                    decision: prepared.decision,
                    error,
                }
            }
        }
    }

    /// Train on new data and build the forecast payload.
    ///
    /// `Ok(None)` means the source had nothing new for this sensor.
    async fn train_and_forecast(
        &mut self,
        key: &SensorKey,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<Prepared>> {
        self.ensure_loaded(key)?;

        let existing = self.cache.get(key);
        let last_trained_at = existing.and_then(|s| s.last_trained_at);
        let window = TrainingWindow::resolve(last_trained_at, now, self.config.lookback);

        let mut points = self
            .source
            .query(key, &window)
            .await
            .map_err(|source| EngineError::SourceFailure {
                key: key.clone(),
                source,
            })?;
        if last_trained_at.is_some() {
            points.retain(|p| p.timestamp > window.start);
        }
        if points.is_empty() {
            return Ok(None);
        }

        let batch = self
            .features
            .observations(&points, existing.and_then(|s| s.last_target));

        let started = Instant::now();
        let mut outcome = self.trainer.update(key, existing, &batch)?;
        self.metrics.observe_training_duration(started.elapsed().as_secs_f64());

        match (outcome.decision, outcome.baseline) {
            (GateDecision::Rejected, Some(baseline)) => {
                self.metrics.inc_models_rejected();
                self.logger
                    .log_model_rejected(key, baseline.mae, outcome.candidate.mae);
            }
            (decision, baseline) => {
                self.store
                    .save(key, &outcome.state, now)
                    .map_err(|source| EngineError::PersistenceFailure {
                        key: key.clone(),
                        source,
                    })?;
                outcome.state.last_trained_at = Some(now);

                self.metrics.inc_models_accepted();
                self.logger.log_model_trained(
                    key,
                    decision == GateDecision::ColdStart,
                    outcome.samples_trained,
                    baseline.map(|b| b.mae),
                    outcome.candidate.mae,
                    outcome.candidate.rmse,
                );
                self.cache.insert(key.clone(), outcome.state);
            }
        }

        let Some(model) = self.cache.get(key) else {
            return Ok(None);
        };

        let start = next_whole_hour(now, self.forecaster.zone());
        let mut forecast = self
            .forecaster
            .forecast(model, start, self.config.horizon_days);
        let payload = self.formatter.format(
            key,
            &model.regressor.name(),
            model.last_trained_at,
            forecast.by_ref(),
        );
        if forecast.failures() > 0 {
            self.metrics
                .add_prediction_step_failures(forecast.failures() as u64);
        }

        Ok(Some(Prepared {
            decision: outcome.decision,
            payload,
        }))
    }

    /// Load a sensor's model from the store on first sight
    fn ensure_loaded(&mut self, key: &SensorKey) -> EngineResult<()> {
        if self.cache.contains_key(key) {
            return Ok(());
        }

        let (state, last_trained_at) =
            self.store
                .load(key)
                .map_err(|source| EngineError::PersistenceFailure {
                    key: key.clone(),
                    source,
                })?;

        if let Some(mut state) = state {
            state.last_trained_at = last_trained_at;
            debug!(sensor = %key, last_trained_at = ?last_trained_at, "Restored model from store");
            self.cache.insert(key.clone(), state);
        }
        Ok(())
    }
}

/// First whole hour strictly after `now`, on the wall clock of `zone`
pub fn next_whole_hour(now: DateTime<Utc>, zone: FixedOffset) -> DateTime<FixedOffset> {
    let local = now.with_timezone(&zone);
    let truncated = local
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(local);
    truncated + Duration::hours(1)
}

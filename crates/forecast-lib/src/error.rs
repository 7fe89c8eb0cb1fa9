//! Error taxonomy for the forecast engine

use crate::models::SensorKey;
use thiserror::Error;

/// Failures raised by a regressor's `learn` or `predict`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegressorError {
    #[error("feature `{0}` is not finite")]
    NonFiniteFeature(String),

    #[error("target {0} is not finite")]
    NonFiniteTarget(f64),

    #[error("prediction is not finite")]
    NonFiniteOutput,
}

/// Engine failures, isolated per sensor by the run coordinator
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("training batch for {0} has no usable observations")]
    EmptyTrainingBatch(SensorKey),

    #[error("learn step {index} failed for {key}: {source}")]
    LearnStepFailure {
        key: SensorKey,
        index: usize,
        #[source]
        source: RegressorError,
    },

    #[error("forecast step {step} failed: {source}")]
    PredictionStepFailure {
        step: usize,
        #[source]
        source: RegressorError,
    },

    #[error("model persistence failed for {key}: {source}")]
    PersistenceFailure {
        key: SensorKey,
        #[source]
        source: anyhow::Error,
    },

    #[error("time-series query failed for {key}: {source}")]
    SourceFailure {
        key: SensorKey,
        #[source]
        source: anyhow::Error,
    },

    #[error("forecast delivery failed for {key}: {source}")]
    DeliveryFailure {
        key: SensorKey,
        #[source]
        source: anyhow::Error,
    },
}

impl EngineError {
    /// Short machine-readable kind, used as a log field and metric label
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::EmptyTrainingBatch(_) => "empty_training_batch",
            EngineError::LearnStepFailure { .. } => "learn_step_failure",
            EngineError::PredictionStepFailure { .. } => "prediction_step_failure",
            EngineError::PersistenceFailure { .. } => "persistence_failure",
            EngineError::SourceFailure { .. } => "source_failure",
            EngineError::DeliveryFailure { .. } => "delivery_failure",
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

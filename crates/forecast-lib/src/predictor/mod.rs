//! Online forecasting engine

mod augment;
mod features;
mod forecast;
mod output;
mod regressor;
mod scheduler;
mod trainer;

pub use augment::{Augmentation, DataAugmenter, Variant, DEFAULT_NOISE_SCALE, DEFAULT_SHIFT_HOURS};
pub use features::{
    parse_utc_offset, FeatureBuilder, FEATURE_DAY_OF_YEAR, FEATURE_HOUR, FEATURE_PREV_TARGET,
    FEATURE_WEEKDAY,
};
pub use forecast::{Forecast, ForecastStart, Forecaster, DEFAULT_HORIZON_DAYS, STEPS_PER_DAY};
pub use output::{OutputConfig, OutputFormatter, DEFAULT_OUTPUT_DECIMALS, MAX_OUTPUT_DECIMALS};
pub use regressor::{
    LinearRegression, Pipeline, ScaledLinearRegression, StandardScaler, Transformer,
};
pub use scheduler::{
    next_whole_hour, Collaborators, CoordinatorConfig, RunCoordinator, SensorOutcome,
    TickSummary, DEFAULT_LOOKBACK_DAYS,
};
pub use trainer::{
    evaluate, Evaluation, GateDecision, IncrementalTrainer, TrainerConfig,
    TrainingOutcome, ACCEPTANCE_RATIO, DEFAULT_AUGMENT_SEED,
};

use crate::error::RegressorError;
use crate::models::Features;

/// Trait for online regression models
pub trait Regressor: Clone + Send + Sync {
    /// Update the model with one labelled sample
    fn learn(&mut self, features: &Features, target: f64) -> Result<(), RegressorError>;

    /// Predict the target for a feature vector
    fn predict(&self, features: &Features) -> Result<f64, RegressorError>;

    /// Human-readable model description, delivered with forecasts
    fn name(&self) -> String;
}

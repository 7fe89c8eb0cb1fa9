//! Incremental training with a performance gate
//!
//! Continues an existing model (or starts a fresh one) on a new batch,
//! evaluates before and after, and only accepts a retrained model that
//! clearly beats the incumbent.

use super::augment::{Augmentation, DataAugmenter, DEFAULT_NOISE_SCALE, DEFAULT_SHIFT_HOURS};
use super::Regressor;
use crate::error::{EngineError, EngineResult};
use crate::models::{ModelState, Observation, SensorKey};
use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::debug;

/// A retrained model must reach `new_mae < baseline_mae * ACCEPTANCE_RATIO`
pub const ACCEPTANCE_RATIO: f64 = 0.9;

/// Default base seed for augmentation noise
pub const DEFAULT_AUGMENT_SEED: u64 = 42;

/// Configuration for the incremental trainer
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Standard deviation of feature noise in augmented copies
    pub noise_scale: f64,
    /// Forward shift of time-shifted copies
    pub shift_hours: i64,
    /// Relative error a retrain must reach to replace the incumbent
    pub acceptance_ratio: f64,
    /// Base seed, combined with the sensor key per update
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            noise_scale: DEFAULT_NOISE_SCALE,
            shift_hours: DEFAULT_SHIFT_HOURS,
            acceptance_ratio: ACCEPTANCE_RATIO,
            seed: DEFAULT_AUGMENT_SEED,
        }
    }
}

/// Error of a regressor over a sample sequence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Mean absolute error (gate metric)
    pub mae: f64,
    /// Root mean squared error (reported only)
    pub rmse: f64,
    pub samples: usize,
    /// Samples whose prediction failed and were left out
    pub failed: usize,
}

/// How the gate ruled on a retrain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// No incumbent, accepted unconditionally
    ColdStart,
    /// Beat the incumbent by the required margin
    Improved,
    /// Incumbent kept, retrained model discarded
    Rejected,
}

/// Result of one `update` call
#[derive(Debug, Clone)]
pub struct TrainingOutcome<R> {
    /// The model to use from now on: the retrained one, or the untouched incumbent
    pub state: ModelState<R>,
    pub decision: GateDecision,
    pub baseline: Option<Evaluation>,
    pub candidate: Evaluation,
    /// Number of `learn` calls made (originals plus augmented copies)
    pub samples_trained: usize,
    pub augmentation_skipped: usize,
}

impl<R> TrainingOutcome<R> {
    pub fn accepted(&self) -> bool {
        self.decision != GateDecision::Rejected
    }
}

/// Online trainer shared by all sensors
#[derive(Debug, Clone)]
pub struct IncrementalTrainer {
    augmenter: DataAugmenter,
    config: TrainerConfig,
}

impl IncrementalTrainer {
    pub fn new(config: TrainerConfig) -> Result<Self> {
        let augmenter = DataAugmenter::new(config.noise_scale, config.shift_hours)?;
        Ok(Self { augmenter, config })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train on `batch`, starting from `existing` when present.
    ///
    /// `existing` is never modified; a rejected retrain returns a copy of it.
    pub fn update<R>(
        &self,
        key: &SensorKey,
        existing: Option<&ModelState<R>>,
        batch: &[Observation],
    ) -> EngineResult<TrainingOutcome<R>>
    where
        R: Regressor + Default,
    {
        let last = batch
            .last()
            .ok_or_else(|| EngineError::EmptyTrainingBatch(key.clone()))?;

        let augmentation = self.augmenter.augment(batch, self.seed_for(key));
        let sequence = training_sequence(batch, &augmentation);

        let baseline = existing.map(|state| evaluate(&state.regressor, &sequence));
        let mut candidate = match existing {
            Some(state) => state.regressor.clone(),
            None => R::default(),
        };

        for (index, obs) in sequence.iter().enumerate() {
            candidate
                .learn(&obs.features, obs.target)
                .map_err(|source| EngineError::LearnStepFailure {
                    key: key.clone(),
                    index,
                    source,
                })?;
        }

        let evaluation = evaluate(&candidate, &sequence);
        let decision = match &baseline {
            None => GateDecision::ColdStart,
            Some(base) if evaluation.mae < base.mae * self.config.acceptance_ratio => {
                GateDecision::Improved
            }
            Some(_) => GateDecision::Rejected,
        };

        debug!(
            sensor = %key,
            decision = ?decision,
            baseline_mae = ?baseline.map(|b| b.mae),
            candidate_mae = evaluation.mae,
            candidate_rmse = evaluation.rmse,
            samples = sequence.len(),
            "Training finished"
        );

        let state = match (decision, existing) {
            (GateDecision::Rejected, Some(incumbent)) => incumbent.clone(),
            _ => ModelState {
                regressor: candidate,
                last_trained_at: existing.and_then(|s| s.last_trained_at),
                last_feature_vector: last.features.clone(),
                last_target: Some(last.target),
            },
        };

        Ok(TrainingOutcome {
            state,
            decision,
            baseline,
            candidate: evaluation,
            samples_trained: sequence.len(),
            augmentation_skipped: augmentation.skipped(),
        })
    }

    /// Per-sensor augmentation seed, stable across runs and processes
    fn seed_for(&self, key: &SensorKey) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.config.seed.to_le_bytes());
        for part in [&key.gateway_id, &key.sensor_id, &key.sensor_type] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }
}

/// Originals in batch order, each followed by its augmented copies
fn training_sequence<'a>(
    batch: &'a [Observation],
    augmentation: &'a Augmentation,
) -> Vec<&'a Observation> {
    let mut sequence = Vec::with_capacity(batch.len() + augmentation.len());
    let mut variants = augmentation.variants.iter().peekable();
    for (index, obs) in batch.iter().enumerate() {
        sequence.push(obs);
        while let Some((_, _, variant)) = variants.next_if(|(source, _, _)| *source == index) {
            sequence.push(variant);
        }
    }
    sequence
}

/// MAE and RMSE of `regressor` over `samples`
pub fn evaluate<R: Regressor>(regressor: &R, samples: &[&Observation]) -> Evaluation {
    let mut abs_sum = 0.0;
    let mut sq_sum = 0.0;
    let mut scored = 0usize;
    let mut failed = 0usize;

    for obs in samples {
        match regressor.predict(&obs.features) {
            Ok(y) => {
                let err = y - obs.target;
                abs_sum += err.abs();
                sq_sum += err * err;
                scored += 1;
            }
            Err(_) => failed += 1,
        }
    }

    if scored == 0 {
        return Evaluation {
            mae: f64::INFINITY,
            rmse: f64::INFINITY,
            samples: 0,
            failed,
        };
    }

    Evaluation {
        mae: abs_sum / scored as f64,
        rmse: (sq_sum / scored as f64).sqrt(),
        samples: scored,
        failed,
    }
}

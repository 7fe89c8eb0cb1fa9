//! Training batch augmentation
//!
//! Expands short training windows with time-shifted and noise-perturbed
//! copies. Noise comes from a seeded generator so runs are reproducible.

use crate::models::Observation;
use anyhow::Result;
use chrono::Duration;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::warn;

/// Default standard deviation of feature noise
pub const DEFAULT_NOISE_SCALE: f64 = 0.01;

/// Default forward shift of the time-shifted copy
pub const DEFAULT_SHIFT_HOURS: i64 = 1;

/// Which synthetic copy of a source observation this is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Shifted,
    Noisy,
}

/// Augmented copies plus a record of what was skipped
#[derive(Debug, Clone, Default)]
pub struct Augmentation {
    /// `(source index, variant, observation)` in source order
    pub variants: Vec<(usize, Variant, Observation)>,
    pub skipped_shifted: usize,
    pub skipped_noisy: usize,
}

impl Augmentation {
    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn skipped(&self) -> usize {
        self.skipped_shifted + self.skipped_noisy
    }

    pub fn observations(&self) -> impl Iterator<Item = &Observation> {
        self.variants.iter().map(|(_, _, obs)| obs)
    }
}

/// Produces synthetic training variants
#[derive(Debug, Clone)]
pub struct DataAugmenter {
    noise: Normal<f64>,
    shift: Duration,
}

impl DataAugmenter {
    pub fn new(noise_scale: f64, shift_hours: i64) -> Result<Self> {
        if !noise_scale.is_finite() || noise_scale < 0.0 {
            anyhow::bail!("noise scale must be finite and non-negative, got {}", noise_scale);
        }
        let noise = Normal::new(0.0, noise_scale)
            .map_err(|e| anyhow::anyhow!("invalid noise scale {}: {}", noise_scale, e))?;
        let shift = Duration::try_hours(shift_hours)
            .ok_or_else(|| anyhow::anyhow!("shift of {} hours is out of range", shift_hours))?;
        Ok(Self { noise, shift })
    }

    pub fn noise_scale(&self) -> f64 {
        self.noise.std_dev()
    }

    /// Emit a shifted and a noisy copy of every observation.
    ///
    /// Deterministic for a given `seed`. Noise is drawn per feature in key
    /// order, so identical inputs always receive identical perturbations.
    pub fn augment(&self, observations: &[Observation], seed: u64) -> Augmentation {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut out = Augmentation {
            variants: Vec::with_capacity(observations.len() * 2),
            ..Default::default()
        };

        for (index, obs) in observations.iter().enumerate() {
            match obs.timestamp.checked_add_signed(self.shift) {
                Some(timestamp) => out.variants.push((
                    index,
                    Variant::Shifted,
                    Observation {
                        features: obs.features.clone(),
                        target: obs.target,
                        timestamp,
                    },
                )),
                None => {
                    warn!(
                        index,
                        timestamp = %obs.timestamp,
                        "Skipping shifted copy, timestamp overflow"
                    );
                    out.skipped_shifted += 1;
                }
            }

            if let Some((name, _)) = obs.features.iter().find(|(_, v)| !v.is_finite()) {
                warn!(index, feature = %name, "Skipping noisy copy, feature is not finite");
                out.skipped_noisy += 1;
                continue;
            }

            let mut features = obs.features.clone();
            for value in features.values_mut() {
                *value += self.noise.sample(&mut rng);
            }
            out.variants.push((
                index,
                Variant::Noisy,
                Observation {
                    features,
                    target: obs.target,
                    timestamp: obs.timestamp,
                },
            ));
        }

        out
    }
}

impl Default for DataAugmenter {
    fn default() -> Self {
        Self {
            noise: Normal::new(0.0, DEFAULT_NOISE_SCALE).expect("default noise scale is valid"),
            shift: Duration::hours(DEFAULT_SHIFT_HOURS),
        }
    }
}

//! Online regression models
//!
//! A two-stage pipeline: a running standard scaler feeding a linear model
//! trained by stochastic gradient descent, one sample at a time.

use super::Regressor;
use crate::error::RegressorError;
use crate::models::Features;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default SGD learning rate for weights
pub const DEFAULT_LEARNING_RATE: f64 = 0.01;

/// Default SGD learning rate for the intercept
pub const DEFAULT_INTERCEPT_LR: f64 = 0.01;

/// Gradient magnitude cap
pub const DEFAULT_CLIP_GRADIENT: f64 = 1e12;

/// Unsupervised first stage of a pipeline
pub trait Transformer {
    /// Update internal statistics with one sample
    fn learn_one(&mut self, features: &Features);

    /// Map a sample using the current statistics
    fn transform(&self, features: &Features) -> Features;

    fn name(&self) -> &'static str;
}

/// Running per-feature statistics (Welford)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    fn update(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Population variance
    fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }
}

/// Standardises each feature to zero mean and unit variance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    stats: BTreeMap<String, RunningStats>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mean(&self, feature: &str) -> Option<f64> {
        self.stats.get(feature).map(|s| s.mean)
    }

    pub fn variance(&self, feature: &str) -> Option<f64> {
        self.stats.get(feature).map(|s| s.variance())
    }
}

impl Transformer for StandardScaler {
    fn learn_one(&mut self, features: &Features) {
        for (name, value) in features {
            self.stats.entry(name.clone()).or_default().update(*value);
        }
    }

    fn transform(&self, features: &Features) -> Features {
        features
            .iter()
            .map(|(name, value)| {
                let scaled = match self.stats.get(name) {
                    Some(stats) if stats.variance() > 0.0 => {
                        (value - stats.mean) / stats.variance().sqrt()
                    }
                    _ => 0.0,
                };
                (name.clone(), scaled)
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "StandardScaler"
    }
}

/// Linear model over sparse named features, trained with SGD on squared loss
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegression {
    weights: BTreeMap<String, f64>,
    intercept: f64,
    learning_rate: f64,
    intercept_lr: f64,
    l2: f64,
    clip_gradient: f64,
}

impl LinearRegression {
    pub fn new(learning_rate: f64, intercept_lr: f64, l2: f64) -> Self {
        Self {
            weights: BTreeMap::new(),
            intercept: 0.0,
            learning_rate,
            intercept_lr,
            l2,
            clip_gradient: DEFAULT_CLIP_GRADIENT,
        }
    }

    pub fn weight(&self, feature: &str) -> f64 {
        self.weights.get(feature).copied().unwrap_or(0.0)
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    fn raw_predict(&self, features: &Features) -> f64 {
        self.intercept
            + features
                .iter()
                .map(|(name, value)| self.weight(name) * value)
                .sum::<f64>()
    }
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self::new(DEFAULT_LEARNING_RATE, DEFAULT_INTERCEPT_LR, 0.0)
    }
}

impl Regressor for LinearRegression {
    fn learn(&mut self, features: &Features, target: f64) -> Result<(), RegressorError> {
        check_finite(features)?;
        if !target.is_finite() {
            return Err(RegressorError::NonFiniteTarget(target));
        }

        // d/dy_pred of (y_pred - y)^2
        let gradient = (2.0 * (self.raw_predict(features) - target))
            .clamp(-self.clip_gradient, self.clip_gradient);

        for (name, value) in features {
            let weight = self.weights.entry(name.clone()).or_insert(0.0);
            *weight -= self.learning_rate * (gradient * value + self.l2 * *weight);
        }
        self.intercept -= self.intercept_lr * gradient;
        Ok(())
    }

    fn predict(&self, features: &Features) -> Result<f64, RegressorError> {
        check_finite(features)?;
        let y = self.raw_predict(features);
        if y.is_finite() {
            Ok(y)
        } else {
            Err(RegressorError::NonFiniteOutput)
        }
    }

    fn name(&self) -> String {
        "LinearRegression".to_string()
    }
}

/// Transformer followed by a regressor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline<T, R> {
    pub transformer: T,
    pub regressor: R,
}

impl<T, R> Pipeline<T, R> {
    pub fn new(transformer: T, regressor: R) -> Self {
        Self {
            transformer,
            regressor,
        }
    }
}

impl<T, R> Regressor for Pipeline<T, R>
where
    T: Transformer + Clone + Send + Sync,
    R: Regressor,
{
    fn learn(&mut self, features: &Features, target: f64) -> Result<(), RegressorError> {
        check_finite(features)?;
        self.transformer.learn_one(features);
        let scaled = self.transformer.transform(features);
        self.regressor.learn(&scaled, target)
    }

    fn predict(&self, features: &Features) -> Result<f64, RegressorError> {
        check_finite(features)?;
        self.regressor.predict(&self.transformer.transform(features))
    }

    fn name(&self) -> String {
        format!("{}|{}", self.transformer.name(), self.regressor.name())
    }
}

/// The production model: standardise, then regress
pub type ScaledLinearRegression = Pipeline<StandardScaler, LinearRegression>;

fn check_finite(features: &Features) -> Result<(), RegressorError> {
    match features.iter().find(|(_, v)| !v.is_finite()) {
        Some((name, _)) => Err(RegressorError::NonFiniteFeature(name.clone())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(pairs: &[(&str, f64)]) -> Features {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_scaler_running_statistics() {
        let mut scaler = StandardScaler::new();
        for x in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            scaler.learn_one(&features(&[("x", x)]));
        }
        assert!((scaler.mean("x").unwrap() - 5.0).abs() < 1e-12);
        assert!((scaler.variance("x").unwrap() - 4.0).abs() < 1e-12);

        let scaled = scaler.transform(&features(&[("x", 7.0)]));
        assert!((scaled["x"] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_scaler_unknown_or_constant_feature_maps_to_zero() {
        let mut scaler = StandardScaler::new();
        scaler.learn_one(&features(&[("c", 3.0)]));
        scaler.learn_one(&features(&[("c", 3.0)]));

        let scaled = scaler.transform(&features(&[("c", 3.0), ("unseen", 10.0)]));
        assert_eq!(scaled["c"], 0.0);
        assert_eq!(scaled["unseen"], 0.0);
    }

    #[test]
    fn test_linear_regression_fits_line() {
        let mut model = LinearRegression::default();
        for _ in 0..200 {
            for i in 0..20 {
                let x = (i as f64 - 10.0) / 10.0;
                model.learn(&features(&[("x", x)]), 2.0 * x + 1.0).unwrap();
            }
        }
        assert!((model.weight("x") - 2.0).abs() < 0.05, "weight {}", model.weight("x"));
        assert!((model.intercept() - 1.0).abs() < 0.05, "intercept {}", model.intercept());
    }

    #[test]
    fn test_pipeline_learns_unscaled_inputs() {
        let mut model = ScaledLinearRegression::default();
        let sample = |h: f64| (features(&[("hour", h)]), 100.0 + 3.0 * h);

        for _ in 0..100 {
            for h in 0..24 {
                let (f, y) = sample(h as f64);
                model.learn(&f, y).unwrap();
            }
        }

        let (f, y) = sample(12.0);
        let predicted = model.predict(&f).unwrap();
        assert!((predicted - y).abs() < 2.0, "predicted {} expected {}", predicted, y);
    }

    #[test]
    fn test_non_finite_inputs_rejected() {
        let mut model = ScaledLinearRegression::default();
        assert_eq!(
            model.learn(&features(&[("x", f64::NAN)]), 1.0),
            Err(RegressorError::NonFiniteFeature("x".to_string()))
        );
        assert_eq!(
            model.learn(&features(&[("x", 1.0)]), f64::INFINITY),
            Err(RegressorError::NonFiniteTarget(f64::INFINITY))
        );
        assert!(model.predict(&features(&[("x", f64::INFINITY)])).is_err());
    }

    #[test]
    fn test_untrained_model_predicts_intercept() {
        let model = ScaledLinearRegression::default();
        assert_eq!(model.predict(&features(&[("hour", 5.0)])).unwrap(), 0.0);
    }

    #[test]
    fn test_serde_preserves_behaviour() {
        let mut model = ScaledLinearRegression::default();
        for h in 0..48 {
            let h = (h % 24) as f64;
            model.learn(&features(&[("hour", h), ("weekday", 2.0)]), h * 0.5).unwrap();
        }

        let json = serde_json::to_string(&model).unwrap();
        let restored: ScaledLinearRegression = serde_json::from_str(&json).unwrap();

        let query = features(&[("hour", 7.0), ("weekday", 2.0)]);
        assert_eq!(restored, model);
        assert_eq!(restored.predict(&query).unwrap(), model.predict(&query).unwrap());
    }

    #[test]
    fn test_pipeline_name() {
        assert_eq!(
            ScaledLinearRegression::default().name(),
            "StandardScaler|LinearRegression"
        );
    }
}

//! Forecast output formatting
//!
//! Converts forecast points into the payload handed to the sink: values are
//! rounded, instants become epoch milliseconds, failed steps stay `null`.

use crate::models::{ForecastPayload, ForecastPoint, PredictionEntry, SensorKey};
use chrono::{DateTime, Utc};

/// Default number of decimals kept in delivered values
pub const DEFAULT_OUTPUT_DECIMALS: u32 = 3;

/// Largest supported precision; beyond this rounding is a no-op for f64
pub const MAX_OUTPUT_DECIMALS: u32 = 15;

/// Configuration for output formatting
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Decimal places kept in predicted values
    pub decimals: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            decimals: DEFAULT_OUTPUT_DECIMALS,
        }
    }
}

/// Builds sink payloads from forecast points
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    config: OutputConfig,
}

impl OutputFormatter {
    pub fn new() -> Self {
        Self {
            config: OutputConfig::default(),
        }
    }

    pub fn with_config(mut config: OutputConfig) -> Self {
        config.decimals = config.decimals.min(MAX_OUTPUT_DECIMALS);
        Self { config }
    }

    pub fn decimals(&self) -> u32 {
        self.config.decimals
    }

    /// Format a forecast for delivery
    ///
    /// # Arguments
    /// * `key` - Sensor the forecast belongs to
    /// * `model` - Model name, e.g. `StandardScaler|LinearRegression`
    /// * `trained_at` - When the model was last accepted
    /// * `points` - Forecast steps in time order
    pub fn format<I>(
        &self,
        key: &SensorKey,
        model: &str,
        trained_at: Option<DateTime<Utc>>,
        points: I,
    ) -> ForecastPayload
    where
        I: IntoIterator<Item = ForecastPoint>,
    {
        let predictions = points
            .into_iter()
            .map(|point| PredictionEntry {
                predicted_value: point.predicted_value.and_then(|v| self.round(v)),
                predicted_at: point.predicted_at.timestamp_millis(),
            })
            .collect();

        ForecastPayload {
            gateway_id: key.gateway_id.clone(),
            sensor_id: key.sensor_id.clone(),
            sensor_type: key.sensor_type.clone(),
            model: model.to_string(),
            trained_at: trained_at.map(|t| t.timestamp_millis()),
            predictions,
        }
    }

    /// Round to the configured precision; non-finite values become `None`
    pub fn round(&self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        let factor = 10f64.powi(self.config.decimals as i32);
        let rounded = (value * factor).round() / factor;
        // very large magnitudes overflow the scaled intermediate
        if rounded.is_finite() {
            Some(rounded)
        } else {
            Some(value)
        }
    }
}

impl Default for OutputFormatter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, TimeZone};

    fn key() -> SensorKey {
        SensorKey::new("gw-1", "sensor-1", "temperature")
    }

    fn points(values: &[Option<f64>]) -> Vec<ForecastPoint> {
        let zone = FixedOffset::east_opt(9 * 3600).unwrap();
        let start = zone.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| ForecastPoint {
                predicted_value: *v,
                predicted_at: start + Duration::hours(i as i64),
            })
            .collect()
    }

    #[test]
    fn test_payload_carries_identity() {
        let formatter = OutputFormatter::new();
        let trained = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let payload = formatter.format(
            &key(),
            "StandardScaler|LinearRegression",
            Some(trained),
            points(&[Some(1.0)]),
        );

        assert_eq!(payload.gateway_id, "gw-1");
        assert_eq!(payload.sensor_id, "sensor-1");
        assert_eq!(payload.sensor_type, "temperature");
        assert_eq!(payload.model, "StandardScaler|LinearRegression");
        assert_eq!(payload.trained_at, Some(trained.timestamp_millis()));
    }

    #[test]
    fn test_instants_are_epoch_millis() {
        let formatter = OutputFormatter::new();
        let payload = formatter.format(&key(), "m", None, points(&[Some(1.0), Some(2.0)]));

        // 10:00 +09:00 is 01:00 UTC
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap().timestamp_millis();
        assert_eq!(payload.predictions[0].predicted_at, expected);
        assert_eq!(payload.predictions[1].predicted_at - expected, 3_600_000);
    }

    #[test]
    fn test_values_rounded() {
        let formatter = OutputFormatter::new();
        let payload =
            formatter.format(&key(), "m", None, points(&[Some(21.123_456), Some(-0.000_4)]));
        assert_eq!(payload.predictions[0].predicted_value, Some(21.123));
        assert_eq!(payload.predictions[1].predicted_value, Some(-0.0));
    }

    #[test]
    fn test_failed_and_non_finite_steps_are_null() {
        let formatter = OutputFormatter::new();
        let payload =
            formatter.format(&key(), "m", None, points(&[None, Some(f64::NAN), Some(2.0)]));

        assert_eq!(payload.predictions.len(), 3);
        assert_eq!(payload.predictions[0].predicted_value, None);
        assert_eq!(payload.predictions[1].predicted_value, None);
        assert_eq!(payload.predictions[2].predicted_value, Some(2.0));

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json["predictions"][0]["predicted_value"].is_null());
    }

    #[test]
    fn test_decimals_configurable() {
        let formatter = OutputFormatter::with_config(OutputConfig { decimals: 1 });
        assert_eq!(formatter.round(3.149), Some(3.1));
        assert_eq!(formatter.round(f64::INFINITY), None);

        let clamped = OutputFormatter::with_config(OutputConfig { decimals: 99 });
        assert_eq!(clamped.decimals(), MAX_OUTPUT_DECIMALS);
    }

    #[test]
    fn test_huge_values_survive_rounding() {
        let formatter = OutputFormatter::new();
        assert_eq!(formatter.round(1e306), Some(1e306));
    }
}

//! Core data models for the forecast engine

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sparse feature vector keyed by stable feature names.
///
/// Ordered so that iteration, and everything seeded from it, is deterministic.
pub type Features = BTreeMap<String, f64>;

/// Identity of a forecast series: one model per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SensorKey {
    pub gateway_id: String,
    pub sensor_id: String,
    pub sensor_type: String,
}

impl SensorKey {
    pub fn new(
        gateway_id: impl Into<String>,
        sensor_id: impl Into<String>,
        sensor_type: impl Into<String>,
    ) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            sensor_id: sensor_id.into(),
            sensor_type: sensor_type.into(),
        }
    }
}

impl fmt::Display for SensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.gateway_id, self.sensor_id, self.sensor_type)
    }
}

/// One training sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub features: Features,
    pub target: f64,
    pub timestamp: DateTime<Utc>,
}

/// Raw point returned by the time-series source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Per-sensor model state: regressor plus the feature state needed to forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState<R> {
    pub regressor: R,
    pub last_trained_at: Option<DateTime<Utc>>,
    pub last_feature_vector: Features,
    /// Target of the final training observation; seeds the lag feature
    #[serde(default)]
    pub last_target: Option<f64>,
}

impl<R> ModelState<R> {
    pub fn new(regressor: R) -> Self {
        Self {
            regressor,
            last_trained_at: None,
            last_feature_vector: Features::new(),
            last_target: None,
        }
    }
}

/// Time range of data fetched for one training update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TrainingWindow {
    /// Continue from `last_trained_at`, or go back `lookback` on cold start.
    ///
    /// The start is never earlier than `now - lookback`.
    pub fn resolve(
        last_trained_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> Self {
        let floor = now.checked_sub_signed(lookback).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let start = match last_trained_at {
            Some(at) => at.max(floor).min(now),
            None => floor,
        };
        Self { start, end: now }
    }
}

/// One hourly forecast step. `predicted_value` is `None` when the step failed.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPoint {
    pub predicted_value: Option<f64>,
    pub predicted_at: DateTime<FixedOffset>,
}

/// Sensor record returned by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub sensor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_type: Option<String>,
}

impl SensorDescriptor {
    pub fn from_id(sensor_id: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            gateway_id: None,
            sensor_type: None,
        }
    }

    /// The key, if the record carries the full identity
    pub fn key(&self) -> Option<SensorKey> {
        match (&self.gateway_id, &self.sensor_type) {
            (Some(gateway), Some(kind)) => {
                Some(SensorKey::new(gateway.clone(), self.sensor_id.clone(), kind.clone()))
            }
            _ => None,
        }
    }
}

/// Wire representation of one forecast step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEntry {
    pub predicted_value: Option<f64>,
    /// Epoch milliseconds
    pub predicted_at: i64,
}

/// Payload delivered to the forecast sink, one per sensor per tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPayload {
    pub gateway_id: String,
    pub sensor_id: String,
    pub sensor_type: String,
    pub model: String,
    /// Epoch milliseconds
    pub trained_at: Option<i64>,
    pub predictions: Vec<PredictionEntry>,
}

//! Remote collaborators: sensor registry, time-series source, forecast sink
//!
//! Each is a trait so the coordinator can run against in-process fakes; the
//! HTTP implementations share one `reqwest` client setup.

mod influx;
mod registry;
mod sink;

pub use influx::{escape_flux_string, parse_annotated_csv, InfluxConfig, InfluxSource, MEASUREMENT};
pub use registry::{HttpSensorRegistry, DEFAULT_REGISTRY_STATUS, DEFAULT_REGISTRY_URL};
pub use sink::HttpForecastSink;

use crate::models::{ForecastPayload, SensorDescriptor, SensorKey, SeriesPoint, TrainingWindow};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Duration;
use reqwest::Client;

/// Keys resolved from bare sensor ids, with the ids whose lookup failed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyResolution {
    pub keys: Vec<SensorKey>,
    /// `(sensor_id, error)` per failed lookup
    pub failed: Vec<(String, String)>,
}

/// Source of sensors eligible for forecasting
#[async_trait]
pub trait SensorRegistry: Send + Sync {
    async fn list_eligible(&self) -> Result<Vec<SensorDescriptor>>;
}

/// Historical readings per sensor
#[async_trait]
pub trait TimeSeriesSource: Send + Sync {
    /// Full keys seen within `lookback` for each bare sensor id.
    ///
    /// A failed lookup for one id is reported in [`KeyResolution::failed`]
    /// and does not stop the others.
    async fn resolve_keys(
        &self,
        sensor_ids: &[String],
        lookback: Duration,
    ) -> Result<KeyResolution>;

    /// Time-ordered points for `key` inside `window`
    async fn query(&self, key: &SensorKey, window: &TrainingWindow) -> Result<Vec<SeriesPoint>>;
}

/// Consumer of finished forecasts
#[async_trait]
pub trait ForecastSink: Send + Sync {
    async fn deliver(&self, payload: &ForecastPayload) -> Result<()>;
}

/// HTTP client with the given request timeout
pub(crate) fn http_client(timeout: std::time::Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

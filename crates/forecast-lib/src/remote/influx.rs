//! InfluxDB 2.x time-series source
//!
//! Sends Flux queries to `/api/v2/query` and parses the annotated CSV reply.
//! Readings live in measurement `sensor-data`, tagged with `gateway_id` and
//! `sensor_id`; the sensor type is the field name.

use super::{http_client, KeyResolution, TimeSeriesSource};
use crate::models::{SensorKey, SeriesPoint, TrainingWindow};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use url::Url;

/// Measurement holding raw sensor readings
pub const MEASUREMENT: &str = "sensor-data";

/// Query endpoint, relative to the configured base URL
const QUERY_PATH: &str = "api/v2/query";

/// Connection settings for an InfluxDB 2.x server
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub timeout: std::time::Duration,
}

/// One CSV row keyed by column name
pub type CsvRow = BTreeMap<String, String>;

/// Flux-over-HTTP time-series client
pub struct InfluxSource {
    client: Client,
    endpoint: Url,
    token: String,
    bucket: String,
}

impl InfluxSource {
    pub fn new(config: InfluxConfig) -> Result<Self> {
        let base = Url::parse(&config.url).context("Invalid InfluxDB URL")?;
        let base = if base.path().ends_with('/') {
            base
        } else {
            Url::parse(&format!("{}/", base)).context("Invalid InfluxDB URL")?
        };
        let mut endpoint = base.join(QUERY_PATH).context("Invalid InfluxDB query path")?;
        endpoint.query_pairs_mut().append_pair("org", &config.org);

        Ok(Self {
            client: http_client(config.timeout)?,
            endpoint,
            token: config.token,
            bucket: config.bucket,
        })
    }

    /// Run a Flux query and return its rows
    async fn run(&self, flux: &str) -> Result<Vec<CsvRow>> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "application/vnd.flux")
            .header(ACCEPT, "application/csv")
            .body(flux.to_string())
            .send()
            .await
            .context("Failed to reach InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB error ({}): {}", status, body);
        }

        let body = response.text().await.context("Failed to read InfluxDB response")?;
        parse_annotated_csv(&body)
    }

    /// Flux listing the gateway and field pairs seen for one sensor
    pub fn metadata_query(&self, sensor_id: &str, lookback: Duration) -> String {
        format!(
            r#"from(bucket: "{bucket}")
    |> range(start: -{secs}s)
    |> filter(fn: (r) => r["_measurement"] == "{measurement}")
    |> filter(fn: (r) => r["sensor_id"] == "{sensor}")
    |> keep(columns: ["gateway_id", "sensor_id", "_field"])
    |> group(columns: ["gateway_id", "_field"])
    |> distinct(column: "_field")"#,
            bucket = escape_flux_string(&self.bucket),
            secs = lookback.num_seconds().max(1),
            measurement = MEASUREMENT,
            sensor = escape_flux_string(sensor_id),
        )
    }

    /// Flux selecting one series inside a window, oldest first
    pub fn series_query(&self, key: &SensorKey, window: &TrainingWindow) -> String {
        format!(
            r#"from(bucket: "{bucket}")
    |> range(start: {start}, stop: {stop})
    |> filter(fn: (r) => r["_measurement"] == "{measurement}")
    |> filter(fn: (r) => r["gateway_id"] == "{gateway}")
    |> filter(fn: (r) => r["sensor_id"] == "{sensor}")
    |> filter(fn: (r) => r["_field"] == "{field}")
    |> keep(columns: ["_time", "_value"])
    |> sort(columns: ["_time"])"#,
            bucket = escape_flux_string(&self.bucket),
            start = flux_time(window.start),
            stop = flux_time(window.end),
            measurement = MEASUREMENT,
            gateway = escape_flux_string(&key.gateway_id),
            sensor = escape_flux_string(&key.sensor_id),
            field = escape_flux_string(&key.sensor_type),
        )
    }
}

#[async_trait]
impl TimeSeriesSource for InfluxSource {
    async fn resolve_keys(
        &self,
        sensor_ids: &[String],
        lookback: Duration,
    ) -> Result<KeyResolution> {
        let mut keys = BTreeSet::new();
        let mut failed = Vec::new();

        for sensor_id in sensor_ids {
            let rows = match self.run(&self.metadata_query(sensor_id, lookback)).await {
                Ok(rows) => rows,
                Err(e) => {
                    let error = format!("{:#}", e);
                    warn!(sensor_id = %sensor_id, error = %error, "Failed to resolve sensor");
                    failed.push((sensor_id.clone(), error));
                    continue;
                }
            };

            for row in rows {
                let gateway = row.get("gateway_id").filter(|g| !g.is_empty());
                let field = row
                    .get("_field")
                    .filter(|f| !f.is_empty())
                    .or_else(|| row.get("_value").filter(|v| !v.is_empty()));
                if let (Some(gateway), Some(field)) = (gateway, field) {
                    keys.insert(SensorKey::new(gateway.clone(), sensor_id.clone(), field.clone()));
                }
            }
        }

        debug!(
            sensors = sensor_ids.len(),
            keys = keys.len(),
            failed = failed.len(),
            "Resolved sensor keys"
        );
        Ok(KeyResolution {
            keys: keys.into_iter().collect(),
            failed,
        })
    }

    async fn query(&self, key: &SensorKey, window: &TrainingWindow) -> Result<Vec<SeriesPoint>> {
        let rows = self
            .run(&self.series_query(key, window))
            .await
            .with_context(|| format!("Failed to query series {}", key))?;

        let mut points = Vec::with_capacity(rows.len());
        let mut dropped = 0usize;
        for row in &rows {
            let time = row
                .get("_time")
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc));
            let value = row
                .get("_value")
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite());

            match (time, value) {
                (Some(time), Some(value)) => points.push(SeriesPoint::new(time, value)),
                _ => dropped += 1,
            }
        }

        if dropped > 0 {
            warn!(sensor = %key, dropped, "Dropped rows with missing or non-finite values");
        }

        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }
}

/// Flux absolute time literal
fn flux_time(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Escape a value for use inside a Flux double-quoted string
pub fn escape_flux_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\$"),
            _ => out.push(c),
        }
    }
    out
}

/// Parse an InfluxDB CSV reply into rows.
///
/// Tables are separated by blank lines and each starts with its own header.
/// Annotation lines (`#datatype`, `#group`, `#default`) are ignored.
pub fn parse_annotated_csv(body: &str) -> Result<Vec<CsvRow>> {
    let mut rows = Vec::new();
    for table in split_tables(body) {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(table.as_bytes());

        let headers = reader
            .headers()
            .context("Malformed CSV header in InfluxDB response")?
            .clone();

        for record in reader.records() {
            let record = record.context("Malformed CSV in InfluxDB response")?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            let row = headers
                .iter()
                .zip(record.iter())
                .filter(|(name, _)| !name.is_empty())
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect();
            rows.push(row);
        }
    }

    Ok(rows)
}

/// Split a multi-table reply on blank lines
fn split_tables(body: &str) -> Vec<String> {
    let mut tables = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in body.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                tables.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end_matches('\r'));
        }
    }
    if !current.is_empty() {
        tables.push(current.join("\n"));
    }
    tables
}

//! HTTP sensor registry client

use super::{http_client, SensorRegistry};
use crate::models::SensorDescriptor;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Registry base URL used when none is configured
pub const DEFAULT_REGISTRY_URL: &str = "http://localhost:10238";

/// Mapping status that makes a sensor eligible
pub const DEFAULT_REGISTRY_STATUS: &str = "completed";

const SEARCH_STATUS_PATH: &str = "sensor-data-mappings/search-status";

/// A registry entry is either a bare id or a full record
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RegistryEntry {
    Id(String),
    Record(SensorDescriptor),
}

/// Lists sensors whose data mapping has reached a given status
pub struct HttpSensorRegistry {
    client: Client,
    endpoint: Url,
    status: String,
}

impl HttpSensorRegistry {
    pub fn new(base_url: &str, status: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).context("Invalid registry URL")?;
        let base = if base.path().ends_with('/') {
            base
        } else {
            Url::parse(&format!("{}/", base)).context("Invalid registry URL")?
        };
        let endpoint = base.join(SEARCH_STATUS_PATH).context("Invalid registry path")?;

        Ok(Self {
            client: http_client(timeout)?,
            endpoint,
            status: status.into(),
        })
    }

    pub fn status(&self) -> &str {
        &self.status
    }
}

#[async_trait]
impl SensorRegistry for HttpSensorRegistry {
    async fn list_eligible(&self) -> Result<Vec<SensorDescriptor>> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("status", &self.status);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to reach sensor registry")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Registry error ({}): {}", status, body);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse registry response")?;

        let serde_json::Value::Array(entries) = body else {
            warn!(status = %self.status, "Registry response is not a list, treating as empty");
            return Ok(Vec::new());
        };

        let mut sensors = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<RegistryEntry>(entry) {
                Ok(RegistryEntry::Id(id)) => sensors.push(SensorDescriptor::from_id(id)),
                Ok(RegistryEntry::Record(record)) => sensors.push(record),
                Err(e) => debug!(error = %e, "Skipping unrecognised registry entry"),
            }
        }

        info!(status = %self.status, count = sensors.len(), "Loaded eligible sensors");
        Ok(sensors)
    }
}

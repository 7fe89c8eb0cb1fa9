//! HTTP forecast sink

use super::{http_client, ForecastSink};
use crate::models::ForecastPayload;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Posts each forecast payload as JSON to a fixed URL
pub struct HttpForecastSink {
    client: Client,
    url: Url,
}

impl HttpForecastSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).context("Invalid forecast sink URL")?;
        Ok(Self {
            client: http_client(timeout)?,
            url,
        })
    }
}

#[async_trait]
impl ForecastSink for HttpForecastSink {
    async fn deliver(&self, payload: &ForecastPayload) -> Result<()> {
        let response = self
            .client
            .post(self.url.clone())
            .json(payload)
            .send()
            .await
            .context("Failed to send forecast")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Forecast sink error ({}): {}", status, body);
        }

        debug!(
            sensor_id = %payload.sensor_id,
            points = payload.predictions.len(),
            "Forecast accepted by sink"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PredictionEntry;
    use mockito::Matcher;

    fn payload() -> ForecastPayload {
        ForecastPayload {
            gateway_id: "gw-1".to_string(),
            sensor_id: "s-1".to_string(),
            sensor_type: "temperature".to_string(),
            model: "StandardScaler|LinearRegression".to_string(),
            trained_at: Some(1_714_521_600_000),
            predictions: vec![
                PredictionEntry {
                    predicted_value: Some(21.5),
                    predicted_at: 1_714_525_200_000,
                },
                PredictionEntry {
                    predicted_value: None,
                    predicted_at: 1_714_528_800_000,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_posts_json_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/predictions")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "sensor_id": "s-1",
                "predictions": [
                    {"predicted_value": 21.5, "predicted_at": 1_714_525_200_000i64},
                    {"predicted_value": null, "predicted_at": 1_714_528_800_000i64}
                ]
            })))
            .with_status(201)
            .create_async()
            .await;

        let url = format!("{}/predictions", server.url());
        let sink = HttpForecastSink::new(&url, Duration::from_secs(5)).unwrap();
        sink.deliver(&payload()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_fails() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/predictions")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let url = format!("{}/predictions", server.url());
        let sink = HttpForecastSink::new(&url, Duration::from_secs(5)).unwrap();
        let err = sink.deliver(&payload()).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(HttpForecastSink::new("not a url", Duration::from_secs(1)).is_err());
    }
}

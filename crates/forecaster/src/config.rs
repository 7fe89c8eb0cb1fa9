//! Forecaster configuration

use anyhow::{Context, Result};
use chrono::FixedOffset;
use forecast_lib::predictor::{parse_utc_offset, MAX_OUTPUT_DECIMALS};
use serde::Deserialize;
use std::path::PathBuf;

/// Forecaster configuration, read from `FORECAST_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastConfig {
    /// InfluxDB base URL
    #[serde(default)]
    pub influx_url: String,

    #[serde(default)]
    pub influx_token: String,

    #[serde(default)]
    pub influx_org: String,

    #[serde(default)]
    pub influx_bucket: String,

    /// Sensor registry base URL
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// Registry status filter for eligible sensors
    #[serde(default = "default_registry_status")]
    pub registry_status: String,

    /// Forecast sink URL
    #[serde(default)]
    pub sink_url: String,

    /// Root directory for model artifacts
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,

    /// Seconds between the starts of two ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Offset for calendar features and forecast instants
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,

    #[serde(default = "default_augment_seed")]
    pub augment_seed: u64,

    #[serde(default = "default_output_decimals")]
    pub output_decimals: u32,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Run a single tick and exit
    #[serde(default)]
    pub run_once: bool,

    /// Log filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Also write JSON logs to this file
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_registry_url() -> String {
    forecast_lib::remote::DEFAULT_REGISTRY_URL.to_string()
}

fn default_registry_status() -> String {
    forecast_lib::remote::DEFAULT_REGISTRY_STATUS.to_string()
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("./models")
}

fn default_lookback_days() -> u32 {
    forecast_lib::predictor::DEFAULT_LOOKBACK_DAYS
}

fn default_horizon_days() -> u32 {
    forecast_lib::predictor::DEFAULT_HORIZON_DAYS
}

fn default_tick_interval() -> u64 {
    3600
}

fn default_utc_offset() -> String {
    "+09:00".to_string()
}

fn default_augment_seed() -> u64 {
    forecast_lib::predictor::DEFAULT_AUGMENT_SEED
}

fn default_output_decimals() -> u32 {
    forecast_lib::predictor::DEFAULT_OUTPUT_DECIMALS
}

fn default_http_timeout() -> u64 {
    10
}

fn default_api_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ForecastConfig {
    /// Load configuration from the environment and validate it
    pub fn load() -> Result<Self> {
        let source = config::Config::builder()
            .add_source(config::Environment::with_prefix("FORECAST").try_parsing(true))
            .build()
            .context("Failed to read configuration")?;
        Self::from_source(source)
    }

    fn from_source(source: config::Config) -> Result<Self> {
        let config: Self = source
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Check required fields and ranges
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("influx_url", &self.influx_url),
            ("influx_org", &self.influx_org),
            ("influx_bucket", &self.influx_bucket),
            ("sink_url", &self.sink_url),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("FORECAST_{} must be set", name.to_uppercase());
            }
        }
        if self.lookback_days == 0 {
            anyhow::bail!("lookback_days must be at least 1");
        }
        if self.horizon_days == 0 {
            anyhow::bail!("horizon_days must be at least 1");
        }
        if self.tick_interval_secs == 0 {
            anyhow::bail!("tick_interval_secs must be at least 1");
        }
        if self.http_timeout_secs == 0 {
            anyhow::bail!("http_timeout_secs must be at least 1");
        }
        if self.output_decimals > MAX_OUTPUT_DECIMALS {
            anyhow::bail!(
                "output_decimals must be at most {}, got {}",
                MAX_OUTPUT_DECIMALS,
                self.output_decimals
            );
        }
        if let Some(path) = &self.log_file {
            if path.file_name().is_none() {
                anyhow::bail!("log_file must name a file, got {}", path.display());
            }
        }
        self.zone()?;
        Ok(())
    }

    pub fn zone(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.utc_offset)
    }

    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> config::ConfigBuilder<config::builder::DefaultState> {
        config::Config::builder()
            .set_override("influx_url", "http://influx:8086")
            .unwrap()
            .set_override("influx_org", "plant")
            .unwrap()
            .set_override("influx_bucket", "sensors")
            .unwrap()
            .set_override("sink_url", "http://sink/predictions")
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ForecastConfig::from_source(builder().build().unwrap()).unwrap();

        assert_eq!(config.registry_url, "http://localhost:10238");
        assert_eq!(config.registry_status, "completed");
        assert_eq!(config.model_dir, PathBuf::from("./models"));
        assert_eq!(config.lookback_days, 90);
        assert_eq!(config.horizon_days, 30);
        assert_eq!(config.tick_interval_secs, 3600);
        assert_eq!(config.augment_seed, 42);
        assert_eq!(config.output_decimals, 3);
        assert_eq!(config.zone().unwrap().local_minus_utc(), 9 * 3600);
        assert!(!config.run_once);
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_log_file() {
        let source = builder()
            .set_override("log_file", "/var/log/forecaster/forecaster.log")
            .unwrap()
            .build()
            .unwrap();
        let config = ForecastConfig::from_source(source).unwrap();
        assert_eq!(
            config.log_file,
            Some(PathBuf::from("/var/log/forecaster/forecaster.log"))
        );

        let source = builder().set_override("log_file", "/").unwrap().build().unwrap();
        let err = ForecastConfig::from_source(source).unwrap_err();
        assert!(err.to_string().contains("log_file"));
    }

    #[test]
    fn test_missing_influx_url_rejected() {
        let source = builder().set_override("influx_url", "").unwrap().build().unwrap();
        let err = ForecastConfig::from_source(source).unwrap_err();
        assert!(err.to_string().contains("FORECAST_INFLUX_URL"));
    }

    #[test]
    fn test_invalid_offset_rejected() {
        let source = builder()
            .set_override("utc_offset", "somewhere")
            .unwrap()
            .build()
            .unwrap();
        assert!(ForecastConfig::from_source(source).is_err());
    }

    #[test]
    fn test_zero_horizon_rejected() {
        let source = builder().set_override("horizon_days", 0).unwrap().build().unwrap();
        assert!(ForecastConfig::from_source(source).is_err());
    }
}

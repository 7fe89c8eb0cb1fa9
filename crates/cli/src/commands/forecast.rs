//! Local forecast command

use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use forecast_lib::{
    predictor::{
        next_whole_hour, FeatureBuilder, ForecastStart, Forecaster, OutputFormatter, Regressor,
        ScaledLinearRegression,
    },
    storage::{FileModelStore, ModelStore},
    ForecastPoint, SensorKey,
};
use tabled::Tabled;

use crate::output::{
    format_instant, format_value, print_info, print_json, print_table, print_warning,
    OutputFormat,
};

/// Accepted layouts for a start time without an offset
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Row for forecast table
#[derive(Tabled)]
struct ForecastRow {
    #[tabled(rename = "Step")]
    step: usize,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Forecast a sensor from its persisted model and print the points
pub fn run_forecast(
    store: &FileModelStore<ScaledLinearRegression>,
    key: &SensorKey,
    zone: FixedOffset,
    days: u32,
    start: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let (state, last_trained_at) = store.load(key)?;
    let Some(state) = state else {
        anyhow::bail!("No model stored for {}", key);
    };

    let start = match start {
        Some(raw) => parse_start(raw)?,
        None => ForecastStart::Zoned(next_whole_hour(Utc::now(), zone)),
    };

    let forecaster = Forecaster::new(FeatureBuilder::new(zone));
    let mut forecast = forecaster.forecast(&state, start, days);
    let points: Vec<ForecastPoint> = forecast.by_ref().collect();
    let failures = forecast.failures();

    let formatter = OutputFormatter::new();
    match format {
        OutputFormat::Json => {
            let payload =
                formatter.format(key, &state.regressor.name(), last_trained_at, points);
            print_json(&payload)?;
        }
        OutputFormat::Table => {
            print_info(&format!(
                "{} ({}, trained {})",
                key,
                state.regressor.name(),
                format_instant(last_trained_at, zone)
            ));

            let rows: Vec<ForecastRow> = points
                .iter()
                .enumerate()
                .map(|(step, point)| ForecastRow {
                    step,
                    time: point.predicted_at.format("%Y-%m-%d %H:%M %:z").to_string(),
                    value: format_value(point.predicted_value.and_then(|v| formatter.round(v))),
                })
                .collect();
            print_table(rows);

            if failures > 0 {
                print_warning(&format!("{} of {} steps failed", failures, points.len()));
            }
        }
    }

    Ok(())
}

/// Parse `--start`: RFC 3339 keeps its offset, anything else is local time
pub fn parse_start(raw: &str) -> Result<ForecastStart> {
    if let Ok(at) = DateTime::<FixedOffset>::parse_from_rfc3339(raw) {
        return Ok(ForecastStart::Zoned(at));
    }
    for layout in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return Ok(ForecastStart::Naive(naive));
        }
    }
    anyhow::bail!(
        "Invalid start time `{}`: expected RFC 3339 or YYYY-MM-DDTHH:MM[:SS]",
        raw
    )
}

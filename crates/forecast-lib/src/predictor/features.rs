//! Feature construction for online training and forecasting
//!
//! Turns time-indexed readings into sparse feature vectors. Calendar fields
//! are derived in a fixed UTC offset; the lag feature carries the previous
//! reading so the model can follow trends.

use crate::models::{Features, Observation, SeriesPoint};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, FixedOffset, Offset, TimeZone, Timelike, Utc};

/// Hour of day, 0-23
pub const FEATURE_HOUR: &str = "hour";

/// Day of year, 1-366
pub const FEATURE_DAY_OF_YEAR: &str = "day_of_year";

/// Day of week, 0 = Monday .. 6 = Sunday
pub const FEATURE_WEEKDAY: &str = "weekday";

/// Previous target value; the forecaster feeds predictions back under this key
pub const FEATURE_PREV_TARGET: &str = "prev_target";

/// Builds calendar and lag features in a fixed time zone
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    zone: FixedOffset,
}

impl FeatureBuilder {
    pub fn new(zone: FixedOffset) -> Self {
        Self { zone }
    }

    /// Builder evaluating calendar fields in UTC
    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }

    pub fn zone(&self) -> FixedOffset {
        self.zone
    }

    /// Calendar features for an instant
    pub fn build<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> Features {
        let mut features = Features::new();
        self.apply_calendar(&mut features, instant);
        features
    }

    /// Overwrite the calendar keys of an existing vector, leaving other keys alone
    pub fn apply_calendar<Tz: TimeZone>(&self, features: &mut Features, instant: &DateTime<Tz>) {
        let local = instant.with_timezone(&self.zone);
        features.insert(FEATURE_HOUR.to_string(), local.hour() as f64);
        features.insert(FEATURE_DAY_OF_YEAR.to_string(), local.ordinal() as f64);
        features.insert(
            FEATURE_WEEKDAY.to_string(),
            local.weekday().num_days_from_monday() as f64,
        );
    }

    /// Turn a time-ordered series into training observations.
    ///
    /// Each observation carries the previous reading under
    /// [`FEATURE_PREV_TARGET`]; the first one uses `lag_seed` (the last target
    /// the model saw) and omits the key when there is none.
    pub fn observations(&self, points: &[SeriesPoint], lag_seed: Option<f64>) -> Vec<Observation> {
        let mut previous = lag_seed;
        points
            .iter()
            .map(|point| {
                let mut features = self.build(&point.timestamp);
                if let Some(prev) = previous {
                    features.insert(FEATURE_PREV_TARGET.to_string(), prev);
                }
                previous = Some(point.value);
                Observation {
                    features,
                    target: point.value,
                    timestamp: point.timestamp,
                }
            })
            .collect()
    }
}

/// Parse a UTC offset such as `+09:00`, `-0330` or `Z`
pub fn parse_utc_offset(value: &str) -> Result<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }
    value
        .parse::<FixedOffset>()
        .map_err(|e| anyhow!("Invalid UTC offset `{}`: {}", value, e))
}

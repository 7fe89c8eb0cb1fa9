//! Autoregressive multi-step forecasting
//!
//! Walks forward hour by hour from a start instant. Each step refreshes the
//! calendar features for its own instant and feeds the previous prediction
//! back in as the lag feature.

use super::features::{FeatureBuilder, FEATURE_PREV_TARGET};
use super::Regressor;
use crate::models::{Features, ForecastPoint, ModelState};
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

/// Steps per forecast day
pub const STEPS_PER_DAY: usize = 24;

/// Default forecast horizon
pub const DEFAULT_HORIZON_DAYS: u32 = 30;

/// Where a forecast begins
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ForecastStart {
    /// An unambiguous instant
    Zoned(DateTime<FixedOffset>),
    /// Wall-clock time, interpreted in the forecaster's zone
    Naive(NaiveDateTime),
}

impl From<DateTime<FixedOffset>> for ForecastStart {
    fn from(start: DateTime<FixedOffset>) -> Self {
        ForecastStart::Zoned(start)
    }
}

impl From<DateTime<Utc>> for ForecastStart {
    fn from(start: DateTime<Utc>) -> Self {
        ForecastStart::Zoned(start.fixed_offset())
    }
}

impl From<NaiveDateTime> for ForecastStart {
    fn from(start: NaiveDateTime) -> Self {
        ForecastStart::Naive(start)
    }
}

/// Produces hourly forecasts from a trained model
#[derive(Debug, Clone)]
pub struct Forecaster {
    features: FeatureBuilder,
}

impl Forecaster {
    pub fn new(features: FeatureBuilder) -> Self {
        Self { features }
    }

    pub fn zone(&self) -> FixedOffset {
        self.features.zone()
    }

    /// Resolve a start to an instant expressed in the forecaster's zone
    pub fn resolve_start(&self, start: impl Into<ForecastStart>) -> DateTime<FixedOffset> {
        let zone = self.zone();
        match start.into() {
            ForecastStart::Zoned(at) => at.with_timezone(&zone),
            ForecastStart::Naive(local) => zone
                .from_local_datetime(&local)
                .earliest()
                .unwrap_or_else(|| zone.from_utc_datetime(&local)),
        }
    }

    /// Lazily forecast `horizon_days * 24` hourly points starting at `start`.
    ///
    /// The model is only read. A failing step yields `None` for its value and
    /// the walk continues with the previous lag value.
    pub fn forecast<'m, R: Regressor>(
        &self,
        model: &'m ModelState<R>,
        start: impl Into<ForecastStart>,
        horizon_days: u32,
    ) -> Forecast<'m, R> {
        let mut features = model.last_feature_vector.clone();
        if let Some(lag) = model.last_target {
            features.insert(FEATURE_PREV_TARGET.to_string(), lag);
        }

        Forecast {
            regressor: &model.regressor,
            builder: self.features.clone(),
            features,
            start: self.resolve_start(start),
            step: 0,
            steps: horizon_days as usize * STEPS_PER_DAY,
            failures: 0,
        }
    }
}

/// Iterator over forecast points; see [`Forecaster::forecast`]
#[derive(Debug)]
pub struct Forecast<'m, R> {
    regressor: &'m R,
    builder: FeatureBuilder,
    features: Features,
    start: DateTime<FixedOffset>,
    step: usize,
    steps: usize,
    failures: usize,
}

impl<R> Forecast<'_, R> {
    /// Steps so far whose prediction failed
    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn start(&self) -> DateTime<FixedOffset> {
        self.start
    }
}

impl<R: Regressor> Iterator for Forecast<'_, R> {
    type Item = ForecastPoint;

    fn next(&mut self) -> Option<ForecastPoint> {
        if self.step >= self.steps {
            return None;
        }

        let Some(predicted_at) = Duration::try_hours(self.step as i64)
            .and_then(|offset| self.start.checked_add_signed(offset))
        else {
            warn!(step = self.step, start = %self.start, "Forecast instant out of range, stopping");
            self.steps = self.step;
            return None;
        };

        self.builder.apply_calendar(&mut self.features, &predicted_at);
        let predicted_value = match self.regressor.predict(&self.features) {
            Ok(y) => {
                self.features.insert(FEATURE_PREV_TARGET.to_string(), y);
                Some(y)
            }
            Err(e) => {
                warn!(step = self.step, error = %e, "Forecast step failed");
                self.failures += 1;
                None
            }
        };

        self.step += 1;
        Some(ForecastPoint {
            predicted_value,
            predicted_at,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.steps - self.step;
        (remaining, Some(remaining))
    }
}

impl<R: Regressor> ExactSizeIterator for Forecast<'_, R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegressorError;
    use crate::predictor::features::{FEATURE_HOUR, FEATURE_WEEKDAY};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Predicts `hour + 0.5 * prev_target`, failing on a chosen hour
    #[derive(Debug, Clone, Default)]
    struct LagEcho {
        fail_hour: Option<f64>,
    }

    impl Regressor for LagEcho {
        fn learn(&mut self, _features: &Features, _target: f64) -> Result<(), RegressorError> {
            Ok(())
        }

        fn predict(&self, features: &Features) -> Result<f64, RegressorError> {
            let hour = features.get(FEATURE_HOUR).copied().unwrap_or(0.0);
            if Some(hour) == self.fail_hour {
                return Err(RegressorError::NonFiniteOutput);
            }
            let lag = features.get(FEATURE_PREV_TARGET).copied().unwrap_or(0.0);
            Ok(hour + 0.5 * lag)
        }

        fn name(&self) -> String {
            "LagEcho".to_string()
        }
    }

    fn utc_forecaster() -> Forecaster {
        Forecaster::new(FeatureBuilder::utc())
    }

    fn model(regressor: LagEcho) -> ModelState<LagEcho> {
        let mut state = ModelState::new(regressor);
        state.last_feature_vector.insert(FEATURE_HOUR.to_string(), 23.0);
        state.last_feature_vector.insert(FEATURE_WEEKDAY.to_string(), 6.0);
        state
    }

    fn sunday_2300() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 23, 0, 0).unwrap()
    }

    #[test]
    fn test_one_day_yields_24_hourly_points() {
        let forecaster = utc_forecaster();
        let state = model(LagEcho::default());
        let start = sunday_2300();

        let points: Vec<_> = forecaster.forecast(&state, start, 1).collect();
        assert_eq!(points.len(), 24);
        assert_eq!(points[0].predicted_at, start.fixed_offset());
        for pair in points.windows(2) {
            assert_eq!(pair[1].predicted_at - pair[0].predicted_at, Duration::hours(1));
        }
        assert!(points.iter().all(|p| p.predicted_value.is_some()));
    }

    #[test]
    fn test_zero_horizon_is_empty() {
        let forecaster = utc_forecaster();
        let state = model(LagEcho::default());
        assert_eq!(forecaster.forecast(&state, sunday_2300(), 0).count(), 0);
    }

    #[test]
    fn test_exact_size() {
        let forecaster = utc_forecaster();
        let state = model(LagEcho::default());
        let mut forecast = forecaster.forecast(&state, sunday_2300(), 30);
        assert_eq!(forecast.len(), 720);
        forecast.next();
        assert_eq!(forecast.len(), 719);
    }

    #[test]
    fn test_prediction_feeds_back_as_lag() {
        let forecaster = utc_forecaster();
        let state = model(LagEcho::default());
        let points: Vec<_> = forecaster.forecast(&state, sunday_2300(), 1).collect();

        // hour 23, no lag yet
        assert_eq!(points[0].predicted_value, Some(23.0));
        // hour 0, lag 23
        assert_eq!(points[1].predicted_value, Some(11.5));
        // hour 1, lag 11.5
        assert_eq!(points[2].predicted_value, Some(6.75));
    }

    #[test]
    fn test_last_target_seeds_first_step() {
        let forecaster = utc_forecaster();
        let mut state = model(LagEcho::default());
        state.last_target = Some(4.0);
        let first = forecaster.forecast(&state, sunday_2300(), 1).next().unwrap();
        assert_eq!(first.predicted_value, Some(25.0));
    }

    #[test]
    fn test_failed_step_is_absent_and_walk_continues() {
        let forecaster = utc_forecaster();
        let state = model(LagEcho {
            fail_hour: Some(0.0),
        });

        let mut forecast = forecaster.forecast(&state, sunday_2300(), 1);
        let points: Vec<_> = forecast.by_ref().collect();

        assert_eq!(points.len(), 24);
        assert_eq!(points[0].predicted_value, Some(23.0));
        assert_eq!(points[1].predicted_value, None);
        // lag carried over from step 0
        assert_eq!(points[2].predicted_value, Some(1.0 + 11.5));
        assert_eq!(forecast.failures(), 1);
    }

    #[test]
    fn test_naive_start_uses_forecaster_zone() {
        let seoul = FixedOffset::east_opt(9 * 3600).unwrap();
        let forecaster = Forecaster::new(FeatureBuilder::new(seoul));
        let naive =
            NaiveDateTime::parse_from_str("2024-03-11 08:00:00", "%Y-%m-%d %H:%M:%S").unwrap();

        let start = forecaster.resolve_start(naive);
        assert_eq!(start.offset(), &seoul);
        assert_eq!(start.with_timezone(&Utc), sunday_2300());
    }

    #[test]
    fn test_forecast_is_reproducible_and_read_only() {
        let forecaster = utc_forecaster();
        let state = model(LagEcho::default());
        let before = state.last_feature_vector.clone();

        let a: Vec<_> = forecaster.forecast(&state, sunday_2300(), 2).collect();
        let b: Vec<_> = forecaster.forecast(&state, sunday_2300(), 2).collect();
        assert_eq!(a, b);
        assert_eq!(state.last_feature_vector, before);
    }

    #[test]
    fn test_forecast_is_lazy() {
        #[derive(Debug, Clone, Default)]
        struct Counting {
            calls: Arc<AtomicUsize>,
        }

        impl Regressor for Counting {
            fn learn(&mut self, _: &Features, _: f64) -> Result<(), RegressorError> {
                Ok(())
            }
            fn predict(&self, _: &Features) -> Result<f64, RegressorError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(1.0)
            }
            fn name(&self) -> String {
                "Counting".to_string()
            }
        }

        let forecaster = utc_forecaster();
        let state = ModelState::new(Counting::default());
        let taken = forecaster.forecast(&state, sunday_2300(), 30).take(3).count();
        assert_eq!(taken, 3);
        assert_eq!(state.regressor.calls.load(Ordering::SeqCst), 3);
    }
}

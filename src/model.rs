//! Forecasting models backed by `augurs`.
//!
//! Series are treated as equally spaced in observation order. Without a
//! usable seasonal period the model is AutoETS with no seasonal component
//! ("ZZN"). When the period fits at least twice into the history, MSTL
//! removes the seasonal component and AutoETS forecasts the trend.

use augurs::ets::AutoETS;
use augurs::mstl::MSTLModel;
use augurs::prelude::*;
use augurs::Forecast;
use chrono::NaiveDateTime;

/// Fewer points than this cannot be fitted.
pub const MIN_OBSERVATIONS: usize = 3;

/// Daily cycle of hourly readings.
pub const HOURS_PER_DAY: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub ds: NaiveDateTime,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub ds: NaiveDateTime,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
}

/// One predicted step: point forecast and interval bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub yhat: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitError {
    #[error("need at least {MIN_OBSERVATIONS} observations, got {0}")]
    TooFewObservations(usize),
    #[error("history contains non-finite values")]
    NonFinite,
    #[error("{0}")]
    Model(String),
}

fn model_err(e: impl std::fmt::Display) -> FitError {
    FitError::Model(e.to_string())
}

/// Fit a series and forecast it forward.
pub trait Forecaster {
    /// `y` is oldest first. With `in_sample`, the fitted values for the
    /// history precede the `horizon` forecast steps.
    fn fit_predict(
        &self,
        y: &[f64],
        horizon: usize,
        in_sample: bool,
    ) -> Result<Vec<Band>, FitError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelOptions {
    /// Coverage of the uncertainty interval, in (0, 1).
    pub interval_width: f64,
    /// Seasonal period in observations, if the series has one.
    pub season_length: Option<usize>,
}

impl ModelOptions {
    /// Annual or per-batch aggregates: no seasonal period.
    pub fn aggregate(interval_width: f64) -> Self {
        Self {
            interval_width,
            season_length: None,
        }
    }

    /// Hourly process readings with a daily cycle.
    pub fn hourly(interval_width: f64) -> Self {
        Self {
            interval_width,
            season_length: Some(HOURS_PER_DAY),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EtsModel {
    options: ModelOptions,
}

impl EtsModel {
    pub fn new(options: ModelOptions) -> Self {
        Self { options }
    }

    /// The seasonal period MSTL will use for `n` points: it must be above 1
    /// and below `n / 2`.
    pub fn seasonal_period(&self, n: usize) -> Option<usize> {
        self.options.season_length.filter(|&p| p > 1 && p < n / 2)
    }
}

impl Forecaster for EtsModel {
    fn fit_predict(
        &self,
        y: &[f64],
        horizon: usize,
        in_sample: bool,
    ) -> Result<Vec<Band>, FitError> {
        if y.len() < MIN_OBSERVATIONS {
            return Err(FitError::TooFewObservations(y.len()));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite);
        }
        let level = self.options.interval_width;
        match self.seasonal_period(y.len()) {
            Some(period) => {
                let trend = AutoETS::non_seasonal().into_trend_model();
                let fitted = MSTLModel::new(vec![period], trend).fit(y).map_err(model_err)?;
                collect_bands(&fitted, horizon, level, in_sample)
            }
            None => {
                let fitted = AutoETS::non_seasonal().fit(y).map_err(model_err)?;
                collect_bands(&fitted, horizon, level, in_sample)
            }
        }
    }
}

fn collect_bands<P: Predict>(
    fitted: &P,
    horizon: usize,
    level: f64,
    in_sample: bool,
) -> Result<Vec<Band>, FitError> {
    let mut bands = Vec::new();
    if in_sample {
        bands.extend(to_bands(fitted.predict_in_sample(level).map_err(model_err)?));
    }
    if horizon > 0 {
        bands.extend(to_bands(fitted.predict(horizon, level).map_err(model_err)?));
    }
    Ok(bands)
}

/// Points without an interval get a zero-width band.
fn to_bands(forecast: Forecast) -> Vec<Band> {
    let intervals = forecast.intervals;
    forecast
        .point
        .iter()
        .enumerate()
        .map(|(i, &yhat)| {
            let (lower, upper) = intervals
                .as_ref()
                .and_then(|iv| Some((*iv.lower.get(i)?, *iv.upper.get(i)?)))
                .unwrap_or((yhat, yhat));
            Band { yhat, lower, upper }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wiggle(n: usize, base: f64, slope: f64) -> Vec<f64> {
        (0..n)
            .map(|i| base + slope * i as f64 + [0.3, -0.2, 0.1, -0.4, 0.2][i % 5])
            .collect()
    }

    fn daily(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 30.0 + 2.0 * (i as f64 * std::f64::consts::PI / 12.0).sin() + 0.01 * i as f64)
            .collect()
    }

    #[test]
    fn forecast_has_horizon_steps_inside_bands() {
        let model = EtsModel::new(ModelOptions::aggregate(0.8));
        let bands = model.fit_predict(&wiggle(12, 10.0, 1.5), 5, false).unwrap();
        assert_eq!(bands.len(), 5);
        for b in &bands {
            assert!(b.yhat.is_finite());
            assert!(b.lower <= b.yhat && b.yhat <= b.upper);
        }
    }

    #[test]
    fn in_sample_rows_precede_forecast() {
        let model = EtsModel::new(ModelOptions::aggregate(0.8));
        let bands = model.fit_predict(&wiggle(12, 10.0, 1.5), 5, true).unwrap();
        assert_eq!(bands.len(), 12 + 5);
    }

    #[test]
    fn fit_is_deterministic() {
        let model = EtsModel::new(ModelOptions::aggregate(0.9));
        let y = wiggle(15, 4.0, -0.1);
        let first = model.fit_predict(&y, 3, true).unwrap();
        assert_eq!(first, model.fit_predict(&y, 3, true).unwrap());
    }

    #[test]
    fn daily_period_needs_two_cycles() {
        let model = EtsModel::new(ModelOptions::hourly(0.8));
        assert_eq!(model.seasonal_period(48), None);
        assert_eq!(model.seasonal_period(49), None);
        assert_eq!(model.seasonal_period(50), Some(24));
        let aggregate = EtsModel::new(ModelOptions::aggregate(0.8));
        assert_eq!(aggregate.seasonal_period(1000), None);
    }

    #[test]
    fn seasonal_history_is_forecast() {
        let model = EtsModel::new(ModelOptions::hourly(0.8));
        let bands = model.fit_predict(&daily(72), 24, false).unwrap();
        assert_eq!(bands.len(), 24);
        assert!(bands.iter().all(|b| b.yhat.is_finite() && b.lower <= b.upper));
    }

    #[test]
    fn short_or_broken_history_is_rejected() {
        let model = EtsModel::new(ModelOptions::aggregate(0.8));
        assert_eq!(
            model.fit_predict(&[1.0, 2.0], 5, false),
            Err(FitError::TooFewObservations(2))
        );
        assert_eq!(
            model.fit_predict(&[1.0, f64::NAN, 2.0, 3.0], 5, false),
            Err(FitError::NonFinite)
        );
    }
}

//! Predictive Model
//!
//! Short-horizon forecasts built on the structure the pattern detector found:
//!
//! | Patterns on the series  | Model                         |
//! |-------------------------|-------------------------------|
//! | cyclical + trend        | trend plus seasonal residual  |
//! | cyclical                | seasonal naive                |
//! | trend                   | linear extrapolation          |
//! | none / plateau          | persistence                   |
//!
//! Every point carries an interval `ŷ ± z·σ·√h`, where σ is the RMSE of
//! one-step-ahead predictions over the most recent `holdout` points.

use crate::analysis::error::{AnalysisError, AnalysisResult};
use crate::analysis::features::FeatureSeries;
use crate::analysis::patterns::{Pattern, PatternKind};
use crate::analysis::stats::{self, LinearFit};
use crate::config::ForecastConfig;
use crate::records::SeriesKey;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastModel {
    Persistence,
    Trend,
    Seasonal { period: usize },
    SeasonalTrend { period: usize },
}

impl ForecastModel {
    /// Pick a model from the patterns detected on one series
    pub fn select(key: &SeriesKey, patterns: &[Pattern]) -> Self {
        let own = || patterns.iter().filter(move |p| &p.key == key);
        let period = own()
            .filter(|p| p.kind == PatternKind::Cyclical)
            .find_map(|p| p.window.period);
        let trending = own().any(|p| p.kind.is_trend());

        match (period, trending) {
            (Some(period), true) => ForecastModel::SeasonalTrend { period },
            (Some(period), false) => ForecastModel::Seasonal { period },
            (None, true) => ForecastModel::Trend,
            (None, false) => ForecastModel::Persistence,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ForecastModel::Persistence => "persistence",
            ForecastModel::Trend => "trend",
            ForecastModel::Seasonal { .. } => "seasonal",
            ForecastModel::SeasonalTrend { .. } => "seasonal_trend",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub key: SeriesKey,
    /// Start of the forecast period
    pub timestamp: i64,
    /// Last observed period the forecast was made from
    pub issued_at: i64,
    /// Periods ahead of the last observed period
    pub step: usize,
    pub predicted: f64,
    pub low: f64,
    pub high: f64,
    pub model: ForecastModel,
}

/// A model fitted on `values[..cutoff]`
struct Fitted<'a> {
    model: ForecastModel,
    values: &'a [Option<f64>],
    cutoff: usize,
    trend: Option<LinearFit>,
    last: f64,
}

impl<'a> Fitted<'a> {
    fn new(model: ForecastModel, values: &'a [Option<f64>], cutoff: usize) -> AnalysisResult<Self> {
        let history: Vec<(f64, f64)> = values[..cutoff]
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (i as f64, v)))
            .collect();
        let last = match history.last() {
            Some(&(_, v)) => v,
            None => return Err(AnalysisError::insufficient("forecast history", 1, 0)),
        };
        let trend = match model {
            ForecastModel::Trend | ForecastModel::SeasonalTrend { .. } => {
                Some(stats::linear_regression(&history)?)
            }
            _ => None,
        };

        Ok(Self {
            model,
            values,
            cutoff,
            trend,
            last,
        })
    }

    fn level(&self, index: usize) -> f64 {
        self.trend
            .as_ref()
            .map(|fit| fit.predict(index as f64))
            .unwrap_or(0.0)
    }

    /// Most recent observed value a whole number of periods before `target`
    fn seasonal_anchor(&self, period: usize, target: usize) -> Option<usize> {
        let mut back = period;
        while back <= target {
            let idx = target - back;
            if idx < self.cutoff && self.values[idx].is_some() {
                return Some(idx);
            }
            back += period;
        }
        None
    }

    fn predict(&self, target: usize) -> f64 {
        match self.model {
            ForecastModel::Persistence => self.last,
            ForecastModel::Trend => self.level(target),
            ForecastModel::Seasonal { period } => self
                .seasonal_anchor(period, target)
                .and_then(|idx| self.values[idx])
                .unwrap_or(self.last),
            ForecastModel::SeasonalTrend { period } => {
                let seasonal = self
                    .seasonal_anchor(period, target)
                    .and_then(|idx| self.values[idx].map(|v| v - self.level(idx)))
                    .unwrap_or(0.0);
                self.level(target) + seasonal
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Forecaster {
    config: ForecastConfig,
}

impl Forecaster {
    pub fn new(config: ForecastConfig) -> Self {
        Self { config }
    }

    /// Configured number of periods to forecast
    pub fn horizon(&self) -> usize {
        self.config.horizon
    }

    /// Forecast `horizon` periods past the end of `series`
    ///
    /// `patterns` may hold patterns of any series; only those of `series`
    /// are considered.
    pub fn forecast(
        &self,
        series: &FeatureSeries,
        patterns: &[Pattern],
        horizon: usize,
    ) -> AnalysisResult<Vec<ForecastPoint>> {
        let present = series.present_count();
        if present < self.config.min_points {
            return Err(AnalysisError::insufficient(
                format!("forecast of {}", series.key),
                self.config.min_points,
                present,
            ));
        }
        let last_timestamp = match series.last_timestamp() {
            Some(ts) => ts,
            None => return Ok(Vec::new()),
        };

        let values = series.values();
        let selected = ForecastModel::select(&series.key, patterns);
        let (model, fitted) = match Fitted::new(selected, &values, values.len()) {
            Ok(fitted) => (selected, fitted),
            Err(e) => {
                tracing::debug!(
                    series = %series.key,
                    model = selected.name(),
                    error = %e,
                    "Falling back to persistence"
                );
                let model = ForecastModel::Persistence;
                (model, Fitted::new(model, &values, values.len())?)
            }
        };

        let sigma = self.residual_scale(model, &values, fitted.last);
        let last_index = values.len() - 1;

        // Steps past the end of the calendar are not forecast
        let points = (1..=horizon)
            .map_while(|step| {
                let timestamp = series.granularity.advance(last_timestamp, step as i64)?;
                let predicted = fitted.predict(last_index + step);
                let half_width = self.config.interval_z * sigma * (step as f64).sqrt();
                Some(ForecastPoint {
                    key: series.key.clone(),
                    timestamp,
                    issued_at: last_timestamp,
                    step,
                    predicted,
                    low: predicted - half_width,
                    high: predicted + half_width,
                    model,
                })
            })
            .collect();

        Ok(points)
    }

    /// RMSE of one-step predictions over the holdout, floored
    fn residual_scale(&self, model: ForecastModel, values: &[Option<f64>], last: f64) -> f64 {
        let present: Vec<(usize, f64)> = values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (i, v)))
            .collect();
        let start = present.len().saturating_sub(self.config.holdout);

        let residuals: Vec<f64> = present[start..]
            .iter()
            .filter_map(|&(idx, actual)| {
                Fitted::new(model, values, idx)
                    .ok()
                    .map(|fitted| actual - fitted.predict(idx))
            })
            .collect();

        let observed: Vec<f64> = present.iter().map(|p| p.1).collect();
        let sigma = stats::rmse(&residuals)
            .or_else(|| stats::std_dev(&observed))
            .unwrap_or(0.0);

        sigma
            .max(self.config.min_relative_scale * last.abs())
            .max(stats::VARIANCE_EPSILON.sqrt())
    }
}

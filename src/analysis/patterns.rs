//! Pattern Detector
//!
//! Finds within-series structure:
//!
//! - **Trend**: least-squares slope over the sample index with a t-test;
//!   reported as trend-up or trend-down. A single fit decides the sign, so
//!   the two never co-occur for one window.
//! - **Cyclical**: autocorrelation of the detrended series at each candidate
//!   period; the peak is reported with its period.
//! - **Plateau**: a trailing run of low-variance, trendless values.
//!
//! Detection is a pure function of the series. Gaps keep their sample index,
//! so missing periods shift nothing around them.

use crate::analysis::error::{AnalysisError, AnalysisResult, Omission, Stage};
use crate::analysis::features::FeatureSeries;
use crate::analysis::stats::{self, LinearFit};
use crate::config::PatternConfig;
use crate::records::SeriesKey;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    TrendUp,
    TrendDown,
    Cyclical,
    Plateau,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::TrendUp => "trend_up",
            PatternKind::TrendDown => "trend_down",
            PatternKind::Cyclical => "cyclical",
            PatternKind::Plateau => "plateau",
        }
    }

    pub fn is_trend(&self) -> bool {
        matches!(self, PatternKind::TrendUp | PatternKind::TrendDown)
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Span a pattern was detected over
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PatternWindow {
    /// First period start (inclusive)
    pub start: i64,
    /// End of the last period (exclusive)
    pub end: i64,
    /// Cycle length in samples, for cyclical patterns
    pub period: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pattern {
    pub key: SeriesKey,
    pub kind: PatternKind,
    /// Strength in [0, 1]
    pub strength: f64,
    pub window: PatternWindow,
    /// First non-missing period in the window
    pub first_seen: i64,
    /// Last non-missing period in the window
    pub last_seen: i64,
    /// Fitted change per period, for trends
    pub rate: Option<f64>,
}

/// Detects trends, cycles and plateaus in one series
#[derive(Debug, Clone)]
pub struct PatternDetector {
    config: PatternConfig,
}

impl PatternDetector {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    /// All patterns found in `series`
    pub fn detect(&self, series: &FeatureSeries) -> Vec<Pattern> {
        self.detect_with_omissions(series).0
    }

    /// Patterns plus the analyses that had to be skipped
    pub fn detect_with_omissions(&self, series: &FeatureSeries) -> (Vec<Pattern>, Vec<Omission>) {
        let present = series.present();
        if present.len() < self.config.min_points {
            let e = AnalysisError::insufficient(
                format!("patterns of {}", series.key),
                self.config.min_points,
                present.len(),
            );
            tracing::debug!(series = %series.key, error = %e, "Cold start, no patterns");
            return (Vec::new(), vec![Omission::new(Stage::Patterns, series.key.to_string(), &e)]);
        }

        let mut patterns = Vec::new();
        let mut omissions = Vec::new();
        let mut record = |result: AnalysisResult<Option<Pattern>>| match result {
            Ok(Some(pattern)) => patterns.push(pattern),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(series = %series.key, error = %e, "Pattern check skipped");
                omissions.push(Omission::new(Stage::Patterns, series.key.to_string(), &e));
            }
        };

        let fit = fit_series(&present);
        record(fit.clone().and_then(|fit| self.trend(series, &present, &fit)));
        record(self.cycle(series, &present, fit.ok().as_ref()));
        record(self.plateau(series, &present));

        (patterns, omissions)
    }

    fn trend(
        &self,
        series: &FeatureSeries,
        present: &[(usize, i64, f64)],
        fit: &LinearFit,
    ) -> AnalysisResult<Option<Pattern>> {
        let values: Vec<f64> = present.iter().map(|p| p.2).collect();
        let level = stats::mean(&values)
            .unwrap_or_default()
            .abs()
            .max(stats::std_dev(&values).unwrap_or_default());
        if level <= stats::VARIANCE_EPSILON {
            return Ok(None);
        }

        let span = (present[present.len() - 1].0 - present[0].0) as f64;
        let relative_change = (fit.slope * span).abs() / level;
        let strength = fit.r.abs();

        if fit.p_value > self.config.trend_alpha
            || strength < self.config.min_trend_strength
            || relative_change < self.config.min_relative_change
        {
            return Ok(None);
        }

        let kind = if fit.slope > 0.0 {
            PatternKind::TrendUp
        } else {
            PatternKind::TrendDown
        };

        Ok(Some(self.pattern(series, present, kind, strength, None, Some(fit.slope))))
    }

    fn cycle(
        &self,
        series: &FeatureSeries,
        present: &[(usize, i64, f64)],
        fit: Option<&LinearFit>,
    ) -> AnalysisResult<Option<Pattern>> {
        let mut periods = self.config.cycle_periods.clone();
        periods.sort_unstable();
        periods.dedup();

        // Residuals of the linear fit keep a trend from posing as a cycle
        let detrended: Vec<Option<f64>> = series
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                p.value
                    .map(|v| v - fit.map(|f| f.predict(i as f64)).unwrap_or_default())
            })
            .collect();

        let mut best: Option<(usize, f64)> = None;
        for period in periods {
            // Need two full cycles of history
            if present.len() < 2 * period {
                continue;
            }
            let (acf, pairs) = stats::autocorrelation(&detrended, period)?;
            if pairs < period {
                continue;
            }
            if best.map(|(_, b)| acf > b).unwrap_or(true) {
                best = Some((period, acf));
            }
        }

        Ok(best
            .filter(|(_, acf)| *acf >= self.config.cycle_threshold)
            .map(|(period, acf)| {
                self.pattern(series, present, PatternKind::Cyclical, acf.clamp(0.0, 1.0), Some(period), None)
            }))
    }

    fn plateau(
        &self,
        series: &FeatureSeries,
        present: &[(usize, i64, f64)],
    ) -> AnalysisResult<Option<Pattern>> {
        let window = self.config.plateau_window;
        if present.len() < window {
            return Err(AnalysisError::insufficient(
                format!("plateau of {}", series.key),
                window,
                present.len(),
            ));
        }

        let tail = &present[present.len() - window..];
        let values: Vec<f64> = tail.iter().map(|p| p.2).collect();
        let m = stats::mean(&values).unwrap_or_default();
        let sd = stats::std_dev(&values).unwrap_or_default();

        let cv = if sd <= stats::VARIANCE_EPSILON.sqrt() {
            0.0
        } else if m.abs() <= stats::VARIANCE_EPSILON {
            return Ok(None);
        } else {
            sd / m.abs()
        };
        if cv >= self.config.plateau_max_cv {
            return Ok(None);
        }

        // A slow but significant drift is a trend, not a plateau
        if cv > 0.0 {
            let fit = fit_series(tail)?;
            if fit.p_value <= self.config.trend_alpha {
                return Ok(None);
            }
        }

        let strength = (1.0 - cv / self.config.plateau_max_cv).clamp(0.0, 1.0);
        Ok(Some(self.pattern(series, tail, PatternKind::Plateau, strength, None, None)))
    }

    fn pattern(
        &self,
        series: &FeatureSeries,
        present: &[(usize, i64, f64)],
        kind: PatternKind,
        strength: f64,
        period: Option<usize>,
        rate: Option<f64>,
    ) -> Pattern {
        let first_seen = present[0].1;
        let last_seen = present[present.len() - 1].1;
        Pattern {
            key: series.key.clone(),
            kind,
            strength,
            window: PatternWindow {
                start: first_seen,
                end: series.granularity.advance(last_seen, 1).unwrap_or(last_seen),
                period,
            },
            first_seen,
            last_seen,
            rate,
        }
    }
}

/// Least-squares fit of the present values against their sample index
pub fn fit_series(present: &[(usize, i64, f64)]) -> AnalysisResult<LinearFit> {
    let points: Vec<(f64, f64)> = present.iter().map(|(i, _, v)| (*i as f64, *v)).collect();
    stats::linear_regression(&points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Granularity;

    // Jan 1, 2024 00:00 UTC
    const BASE: i64 = 1704067200000;

    fn series(values: &[Option<f64>]) -> FeatureSeries {
        FeatureSeries::from_values(
            "health.steps".parse().unwrap(),
            Granularity::Day,
            BASE,
            values,
        )
    }

    fn detector() -> PatternDetector {
        PatternDetector::new(PatternConfig::default())
    }

    fn kinds(patterns: &[Pattern]) -> Vec<PatternKind> {
        patterns.iter().map(|p| p.kind).collect()
    }

    #[test]
    fn test_detects_upward_trend() {
        let values: Vec<Option<f64>> = (0..20)
            .map(|i| Some(5000.0 + 150.0 * i as f64 + if i % 2 == 0 { 80.0 } else { -80.0 }))
            .collect();

        let patterns = detector().detect(&series(&values));
        let trend = patterns.iter().find(|p| p.kind.is_trend()).unwrap();

        assert_eq!(trend.kind, PatternKind::TrendUp);
        assert!(trend.strength > 0.9 && trend.strength <= 1.0);
        assert!(trend.rate.unwrap() > 140.0);
        assert_eq!(trend.first_seen, BASE);
        assert_eq!(trend.window.end, BASE + 20 * 24 * 3600 * 1000);
    }

    #[test]
    fn test_detects_downward_trend_across_gaps() {
        let mut values: Vec<Option<f64>> = (0..24).map(|i| Some(8.0 - 0.1 * i as f64)).collect();
        values[5] = None;
        values[6] = None;
        values[15] = None;

        let patterns = detector().detect(&series(&values));
        let trend = patterns.iter().find(|p| p.kind.is_trend()).unwrap();

        assert_eq!(trend.kind, PatternKind::TrendDown);
        assert!((trend.rate.unwrap() + 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_weekly_cycle_is_found_with_period() {
        let values: Vec<Option<f64>> = (0..42)
            .map(|i| Some(if i % 7 == 5 || i % 7 == 6 { 12000.0 } else { 6000.0 }))
            .collect();

        let patterns = detector().detect(&series(&values));
        let cycle = patterns
            .iter()
            .find(|p| p.kind == PatternKind::Cyclical)
            .unwrap();

        assert_eq!(cycle.window.period, Some(7));
        assert!(cycle.strength >= 0.5);
        assert!(!patterns.iter().any(|p| p.kind.is_trend()));
    }

    #[test]
    fn test_flat_series_is_a_plateau() {
        let values = vec![Some(7.0); 14];

        let (patterns, omissions) = detector().detect_with_omissions(&series(&values));

        assert_eq!(kinds(&patterns), vec![PatternKind::Plateau]);
        assert_eq!(patterns[0].strength, 1.0);
        // Autocorrelation is undefined for a constant series
        assert!(omissions.iter().all(|o| o.stage == Stage::Patterns));
    }

    #[test]
    fn test_noisy_series_has_no_patterns() {
        let values: Vec<Option<f64>> = [5.0, 9.0, 4.0, 8.0, 3.0, 9.0, 5.0, 7.0, 4.0, 8.0, 6.0, 3.0]
            .iter()
            .map(|v| Some(*v))
            .collect();

        assert!(detector().detect(&series(&values)).is_empty());
    }

    #[test]
    fn test_cold_start_yields_nothing() {
        let values: Vec<Option<f64>> = (0..6).map(|i| Some(i as f64 * 100.0)).collect();

        let (patterns, omissions) = detector().detect_with_omissions(&series(&values));
        assert!(patterns.is_empty());
        assert_eq!(omissions.len(), 1);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let values: Vec<Option<f64>> = (0..35)
            .map(|i| Some(100.0 + i as f64 * 2.0 + (i % 7) as f64 * 5.0))
            .collect();
        let s = series(&values);

        assert_eq!(detector().detect(&s), detector().detect(&s));
    }
}

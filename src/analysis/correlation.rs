//! Correlation Engine
//!
//! Calculates lagged Pearson correlations between series from different
//! domains. Only pairs on the configured allow-list are ever compared.
//!
//! For each pair every lag in the configured range is scanned and only the
//! lag with the largest |r| survives. That candidate becomes an edge only if
//! its overlap reaches the minimum window and its (lag-corrected)
//! significance clears the configured alpha and confidence; weak candidates
//! are dropped, never reported.
//!
//! Lag `k` pairs `metric_a[t]` with `metric_b[t + k]`, where `metric_a` is
//! the smaller key in canonical order. A positive lag therefore means
//! `metric_a` leads.

use crate::analysis::error::{AnalysisError, AnalysisResult, Omission, Stage};
use crate::analysis::features::FeatureSeries;
use crate::analysis::stats;
use crate::config::CorrelationConfig;
use crate::records::{Domain, SeriesKey};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Human-readable correlation strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationStrength {
    Strong,
    Moderate,
    Weak,
}

impl CorrelationStrength {
    pub fn from_coefficient(r: f64) -> Self {
        let abs_r = r.abs();
        if abs_r > 0.7 {
            CorrelationStrength::Strong
        } else if abs_r > 0.5 {
            CorrelationStrength::Moderate
        } else {
            CorrelationStrength::Weak
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationStrength::Strong => "strong",
            CorrelationStrength::Moderate => "moderate",
            CorrelationStrength::Weak => "weak",
        }
    }
}

/// A materialized lagged relationship between two series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationEdge {
    /// Smaller key in canonical order
    pub metric_a: SeriesKey,
    pub metric_b: SeriesKey,
    /// Periods by which `metric_b` trails `metric_a`
    pub lag: i64,
    /// Pearson coefficient in [-1, 1]
    pub coefficient: f64,
    /// 1 - p_value, in [0, 1]
    pub confidence: f64,
    /// Two-sided p-value after lag correction
    pub p_value: f64,
    /// Overlapping samples the coefficient was computed from
    pub sample_size: usize,
    pub strength: CorrelationStrength,
    /// Latest period start contributing to the edge
    pub last_seen: i64,
}

impl CorrelationEdge {
    pub fn domains(&self) -> (Domain, Domain) {
        (self.metric_a.domain, self.metric_b.domain)
    }

    /// Whether the edge links the two given domains, in either order
    pub fn links(&self, x: Domain, y: Domain) -> bool {
        let (a, b) = self.domains();
        (a == x && b == y) || (a == y && b == x)
    }

    pub fn direction(&self) -> &'static str {
        if self.coefficient > 0.0 {
            "positive"
        } else {
            "negative"
        }
    }

    pub fn describe(&self) -> String {
        let timing = match self.lag {
            0 => "on the same period".to_string(),
            k if k > 0 => format!("{} period(s) later", k),
            k => format!("{} period(s) earlier", -k),
        };
        format!(
            "{} {} correlates with {} {} (r={:.2}, {} correlation, n={})",
            self.metric_a,
            self.direction(),
            self.metric_b,
            timing,
            self.coefficient,
            self.strength.as_str(),
            self.sample_size
        )
    }
}

/// Best lag found for one pair before gating
#[derive(Debug, Clone, Copy)]
struct LagCandidate {
    lag: i64,
    r: f64,
    n: usize,
    last_seen: i64,
}

/// Scans allow-listed cross-domain pairs for lagged correlations
#[derive(Debug, Clone)]
pub struct CorrelationEngine {
    config: CorrelationConfig,
}

impl CorrelationEngine {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config }
    }

    /// Edges for every allow-listed pair, strongest first
    pub fn correlate(&self, series: &BTreeMap<SeriesKey, FeatureSeries>) -> Vec<CorrelationEdge> {
        self.correlate_with_omissions(series).0
    }

    pub fn correlate_with_omissions(
        &self,
        series: &BTreeMap<SeriesKey, FeatureSeries>,
    ) -> (Vec<CorrelationEdge>, Vec<Omission>) {
        let pairs: Vec<(SeriesKey, SeriesKey)> = self
            .config
            .allow_list
            .iter()
            .map(|pair| pair.canonical())
            .filter(|(a, b)| a.domain != b.domain)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|(a, b)| series.contains_key(a) && series.contains_key(b))
            .collect();

        let results: Vec<((SeriesKey, SeriesKey), AnalysisResult<Option<CorrelationEdge>>)> = pairs
            .into_par_iter()
            .map(|(a, b)| {
                let result = self.correlate_pair(&series[&a], &series[&b]);
                ((a, b), result)
            })
            .collect();

        let mut edges = Vec::new();
        let mut omissions = Vec::new();
        for ((a, b), result) in results {
            match result {
                Ok(Some(edge)) => {
                    tracing::debug!(
                        metric_a = %edge.metric_a,
                        metric_b = %edge.metric_b,
                        lag = edge.lag,
                        r = edge.coefficient,
                        "Materialized correlation edge"
                    );
                    edges.push(edge);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(metric_a = %a, metric_b = %b, error = %e, "Pair skipped");
                    omissions.push(Omission::new(Stage::Correlation, format!("{} / {}", a, b), &e));
                }
            }
        }

        // Sort by absolute correlation strength (strongest first)
        edges.sort_by(|x, y| {
            y.coefficient
                .abs()
                .total_cmp(&x.coefficient.abs())
                .then_with(|| x.metric_a.cmp(&y.metric_a))
                .then_with(|| x.metric_b.cmp(&y.metric_b))
        });

        (edges, omissions)
    }

    /// Scan all lags of one pair and gate the best one
    ///
    /// `a` must be the canonical first series. Returns `Ok(None)` when the
    /// best lag is not significant.
    pub fn correlate_pair(
        &self,
        a: &FeatureSeries,
        b: &FeatureSeries,
    ) -> AnalysisResult<Option<CorrelationEdge>> {
        if a.granularity != b.granularity {
            return Err(AnalysisError::unstable(
                "correlation",
                format!("granularity mismatch ({} vs {})", a.granularity, b.granularity),
            ));
        }

        let mut best: Option<LagCandidate> = None;
        let mut last_error = None;
        let mut lags_tested = 0usize;

        for lag in self.config.min_lag..=self.config.max_lag {
            let (xs, ys, last_seen) = align_with_lag(a, b, lag);
            if xs.len() < MIN_LAG_PAIRS {
                last_error = Some(AnalysisError::insufficient(
                    format!("{} / {} at lag {}", a.key, b.key, lag),
                    MIN_LAG_PAIRS,
                    xs.len(),
                ));
                continue;
            }

            let r = match stats::pearson(&xs, &ys) {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };
            lags_tested += 1;

            let candidate = LagCandidate {
                lag,
                r,
                n: xs.len(),
                last_seen,
            };
            if best.map(|b| is_better(&candidate, &b)).unwrap_or(true) {
                best = Some(candidate);
            }
        }

        let best = match (best, last_error) {
            (Some(best), _) => best,
            (None, Some(e)) => return Err(e),
            (None, None) => return Ok(None),
        };

        // Only the winning lag is gated on the window
        if best.n < self.config.min_window {
            return Err(AnalysisError::insufficient(
                format!("{} / {} at lag {}", a.key, b.key, best.lag),
                self.config.min_window,
                best.n,
            ));
        }

        let raw_p = stats::correlation_p_value(best.r, best.n);
        let p_value = if self.config.lag_correction {
            (raw_p * lags_tested as f64).min(1.0)
        } else {
            raw_p
        };
        let confidence = (1.0 - p_value).clamp(0.0, 1.0);

        if p_value > self.config.alpha
            || confidence < self.config.min_confidence
        {
            tracing::trace!(
                metric_a = %a.key,
                metric_b = %b.key,
                lag = best.lag,
                r = best.r,
                p = p_value,
                "Best lag not significant"
            );
            return Ok(None);
        }

        Ok(Some(CorrelationEdge {
            metric_a: a.key.clone(),
            metric_b: b.key.clone(),
            lag: best.lag,
            coefficient: best.r.clamp(-1.0, 1.0),
            confidence,
            p_value,
            sample_size: best.n,
            strength: CorrelationStrength::from_coefficient(best.r),
            last_seen: best.last_seen,
        }))
    }
}

/// Fewest aligned pairs for which a lag's coefficient is considered at all
const MIN_LAG_PAIRS: usize = 3;

/// Larger |r| wins; ties go to the smaller |lag|, then the earlier lag
fn is_better(candidate: &LagCandidate, current: &LagCandidate) -> bool {
    const TIE: f64 = 1e-12;
    let diff = candidate.r.abs() - current.r.abs();
    if diff.abs() > TIE {
        return diff > 0.0;
    }
    (candidate.lag.abs(), candidate.lag) < (current.lag.abs(), current.lag)
}

/// Pair `a[t]` with `b[t + lag]`, dropping periods missing on either side
///
/// Returns both value vectors and the latest period start involved.
fn align_with_lag(a: &FeatureSeries, b: &FeatureSeries, lag: i64) -> (Vec<f64>, Vec<f64>, i64) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let mut last_seen = i64::MIN;

    for point in &a.points {
        let Some(x) = point.value else { continue };
        let Some(shifted) = a.granularity.advance(point.timestamp, lag) else { continue };
        if let Some(y) = b.value_at(shifted) {
            xs.push(x);
            ys.push(y);
            last_seen = last_seen.max(point.timestamp).max(shifted);
        }
    }

    (xs, ys, last_seen)
}

//! Anomaly Detector
//!
//! Builds a baseline from all but the most recent `recent_window` present
//! points and checks each recent point against the baseline's expected
//! range `center ± range_multiplier × scale`.
//!
//! With too little history for a baseline the detector emits nothing and
//! reports `InsufficientData`, so a short series never yields false alarms.

use crate::analysis::error::{AnalysisError, AnalysisResult};
use crate::analysis::features::FeatureSeries;
use crate::analysis::stats;
use crate::config::{AnomalyConfig, BaselineEstimator};
use crate::records::SeriesKey;
use serde::Serialize;

/// Scales a MAD to a normal-consistent standard deviation
const MAD_TO_SIGMA: f64 = 1.4826;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyDirection {
    Above,
    Below,
}

impl AnomalyDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyDirection::Above => "above",
            AnomalyDirection::Below => "below",
        }
    }
}

/// A recent value outside its baseline range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyEvent {
    pub key: SeriesKey,
    pub timestamp: i64,
    pub observed: f64,
    pub expected_low: f64,
    pub expected_high: f64,
    /// Distance from the baseline center in baseline scale units
    pub deviation: f64,
    /// In [0, 1), monotonic in `deviation`
    pub severity: f64,
    pub direction: AnomalyDirection,
}

/// Center and spread of the reference period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub center: f64,
    pub scale: f64,
    pub points: usize,
}

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    /// Flag recent points of `series` that fall outside the baseline range
    ///
    /// Events are returned oldest first.
    pub fn detect(&self, series: &FeatureSeries) -> AnalysisResult<Vec<AnomalyEvent>> {
        let present = series.present();
        let recent_len = self.config.recent_window.min(present.len());
        let split = present.len() - recent_len;
        let (history, recent) = present.split_at(split);

        if history.len() < self.config.min_baseline_points {
            return Err(AnalysisError::insufficient(
                format!("baseline of {}", series.key),
                self.config.min_baseline_points,
                history.len(),
            ));
        }

        let history: Vec<f64> = history.iter().map(|p| p.2).collect();
        let baseline = self.baseline(&history)?;
        let k = self.config.range_multiplier;
        let expected_low = baseline.center - k * baseline.scale;
        let expected_high = baseline.center + k * baseline.scale;

        let events: Vec<AnomalyEvent> = recent
            .iter()
            .filter_map(|&(_, timestamp, observed)| {
                let deviation = (observed - baseline.center).abs() / baseline.scale;
                if deviation <= k {
                    return None;
                }
                Some(AnomalyEvent {
                    key: series.key.clone(),
                    timestamp,
                    observed,
                    expected_low,
                    expected_high,
                    deviation,
                    severity: severity(deviation, k),
                    direction: if observed > baseline.center {
                        AnomalyDirection::Above
                    } else {
                        AnomalyDirection::Below
                    },
                })
            })
            .collect();

        if !events.is_empty() {
            tracing::debug!(
                series = %series.key,
                count = events.len(),
                center = baseline.center,
                scale = baseline.scale,
                "Detected anomalies"
            );
        }

        Ok(events)
    }

    /// Estimate center and scale with the configured estimator
    pub fn baseline(&self, values: &[f64]) -> AnalysisResult<Baseline> {
        let (center, spread) = match self.config.baseline {
            BaselineEstimator::MedianMad => (
                stats::median(values),
                stats::mad(values).map(|m| m * MAD_TO_SIGMA),
            ),
            BaselineEstimator::MeanStd => (stats::mean(values), stats::std_dev(values)),
        };
        let (center, spread) = match (center, spread) {
            (Some(c), Some(s)) => (c, s),
            _ => return Err(AnalysisError::insufficient("baseline", 2, values.len())),
        };

        // Floor keeps a perfectly stable history from flagging rounding noise
        let scale = spread.max(self.config.min_relative_scale * center.abs());
        if scale <= stats::VARIANCE_EPSILON {
            return Err(AnalysisError::unstable(
                "anomaly baseline",
                "baseline has zero spread around zero",
            ));
        }

        Ok(Baseline {
            center,
            scale,
            points: values.len(),
        })
    }
}

/// Map a deviation beyond `k` scale units into [0, 1)
fn severity(deviation: f64, k: f64) -> f64 {
    ((deviation - k) / k).max(0.0).tanh()
}

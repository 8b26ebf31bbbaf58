//! Analysis Core
//!
//! Turns raw record streams into signals. Every stage is a pure function of
//! its inputs; per-series and per-pair work is spread over the rayon pool.
//!
//! ## Data Flow
//!
//! 1. [`features`] resamples records into one `FeatureSeries` per metric
//! 2. [`patterns`], [`anomaly`] and [`forecast`] run per series
//! 3. [`correlation`] scans allow-listed cross-domain pairs
//!
//! Failures of a single series or pair surface as [`Omission`]s; only an
//! invalid configuration stops a run.

pub mod anomaly;
pub mod correlation;
pub mod error;
pub mod features;
pub mod forecast;
pub mod patterns;
pub mod stats;

pub use anomaly::{AnomalyDetector, AnomalyDirection, AnomalyEvent, Baseline};
pub use correlation::{CorrelationEdge, CorrelationEngine, CorrelationStrength};
pub use error::{AnalysisError, AnalysisResult, Omission, Stage};
pub use features::{Extraction, FeatureExtractor, FeatureSeries, SeriesPoint};
pub use forecast::{ForecastModel, ForecastPoint, Forecaster};
pub use patterns::{Pattern, PatternDetector, PatternKind, PatternWindow};

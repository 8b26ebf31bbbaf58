//! # LifeSync
//!
//! Cross-domain temporal analytics and recommendation engine for personal
//! data streams (calendar, communication, health, finance).
//!
//! ## Features
//!
//! - **Feature extraction**: per-metric resampling with explicit gaps
//! - **Pattern detection**: trends, cycles and plateaus
//! - **Lagged correlation**: allow-listed cross-domain pairs, best lag only
//! - **Anomalies and forecasts**: robust baselines, intervals that widen
//! - **Recommendations**: rule-driven, fingerprinted, deduplicated, ranked
//!
//! ## Modules
//!
//! - [`records`]: Input records and file adapters
//! - [`analysis`]: Feature, pattern, correlation, anomaly and forecast stages
//! - [`recommend`]: Rule table, ranker and dedup
//! - [`insights`]: Digest windows and aggregation
//! - [`pipeline`]: One-call batch analysis
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lifesync::config::AnalysisConfig;
//! use lifesync::pipeline::{AnalysisRequest, InsightPipeline};
//! use lifesync::records::{Domain, DomainRecord, Granularity};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = InsightPipeline::new(AnalysisConfig::default())?;
//!
//!     let records = vec![
//!         DomainRecord::new(Domain::Health, "sleep_hours", 1704110400000, 6.5).unit("h"),
//!         DomainRecord::new(Domain::Finance, "daily_spend", 1704110400000, 42.0).unit("usd"),
//!     ];
//!
//!     let report = pipeline.run(&AnalysisRequest::new(records, Granularity::Day));
//!     for rec in &report.digest.recommendations {
//!         println!("[{}] {}", rec.priority, rec.message);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod config;
pub mod insights;
pub mod pipeline;
pub mod recommend;
pub mod records;

// Re-export top-level types for convenience
pub use records::{AggregationPolicy, Domain, DomainRecord, Granularity, SeriesKey, TimeRange};

pub use analysis::{
    AnalysisError, AnalysisResult, AnomalyDetector, AnomalyEvent, CorrelationEdge,
    CorrelationEngine, FeatureExtractor, FeatureSeries, ForecastPoint, Forecaster, Omission,
    Pattern, PatternDetector, PatternKind,
};

pub use recommend::{Category, Priority, Ranker, Recommendation, Signal};

pub use insights::{aggregate, DigestWindow, InsightDigest};

pub use pipeline::{AnalysisReport, AnalysisRequest, InsightPipeline};

pub use config::{AnalysisConfig, Config, ConfigError, LoggingConfig};

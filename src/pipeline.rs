//! Analysis pipeline
//!
//! Wires the stages together for one batch:
//!
//! ```text
//! records -> features -> {patterns, anomalies, forecasts} per series
//!                     -> correlation over allow-listed pairs
//!         -> ranker -> digest
//! ```
//!
//! A run is a pure function of the request and the configuration. The
//! configuration is validated once, when the pipeline is built; after that
//! nothing in a run is fatal and every skipped computation is listed in the
//! report's omissions.

use crate::analysis::{
    AnalysisError, AnalysisResult, AnomalyDetector, AnomalyEvent, CorrelationEdge,
    CorrelationEngine, FeatureExtractor, FeatureSeries, ForecastPoint, Forecaster, Omission,
    Pattern, PatternDetector, Stage,
};
use crate::config::AnalysisConfig;
use crate::insights::{aggregate, DigestWindow, InsightDigest};
use crate::recommend::{Ranker, Recommendation};
use crate::records::{DomainRecord, Granularity, SeriesKey, TimeRange};
use rayon::prelude::*;
use serde::Serialize;

/// One batch to analyze
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub records: Vec<DomainRecord>,
    pub granularity: Granularity,
    /// Records outside this range are ignored
    pub range: TimeRange,
    /// Window of the resulting digest
    pub window: DigestWindow,
    /// Reference instant for the digest window; defaults to the latest record
    pub as_of: Option<i64>,
}

impl AnalysisRequest {
    pub fn new(records: Vec<DomainRecord>, granularity: Granularity) -> Self {
        Self {
            records,
            granularity,
            range: TimeRange::unbounded(),
            window: DigestWindow::default(),
            as_of: None,
        }
    }

    pub fn range(mut self, range: TimeRange) -> Self {
        self.range = range;
        self
    }

    pub fn window(mut self, window: DigestWindow) -> Self {
        self.window = window;
        self
    }

    pub fn as_of(mut self, timestamp: i64) -> Self {
        self.as_of = Some(timestamp);
        self
    }
}

/// Shape of one extracted series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesOverview {
    pub key: SeriesKey,
    pub unit: String,
    pub granularity: Granularity,
    pub periods: usize,
    pub present: usize,
    pub first: Option<i64>,
    pub last: Option<i64>,
}

impl From<&FeatureSeries> for SeriesOverview {
    fn from(series: &FeatureSeries) -> Self {
        Self {
            key: series.key.clone(),
            unit: series.unit.clone(),
            granularity: series.granularity,
            periods: series.len(),
            present: series.present_count(),
            first: series.points.first().map(|p| p.timestamp),
            last: series.last_timestamp(),
        }
    }
}

/// Everything one run produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub series: Vec<SeriesOverview>,
    pub patterns: Vec<Pattern>,
    pub edges: Vec<CorrelationEdge>,
    pub anomalies: Vec<AnomalyEvent>,
    pub forecasts: Vec<ForecastPoint>,
    /// All active recommendations of the run, ranked
    pub recommendations: Vec<Recommendation>,
    pub digest: InsightDigest,
    pub omissions: Vec<Omission>,
}

/// Per-series detector output
#[derive(Default)]
struct SeriesOutcome {
    patterns: Vec<Pattern>,
    anomalies: Vec<AnomalyEvent>,
    forecasts: Vec<ForecastPoint>,
    omissions: Vec<Omission>,
}

/// The full analysis core, configured once
#[derive(Debug, Clone)]
pub struct InsightPipeline {
    extractor: FeatureExtractor,
    patterns: PatternDetector,
    correlation: CorrelationEngine,
    anomaly: AnomalyDetector,
    forecaster: Forecaster,
    ranker: Ranker,
}

impl InsightPipeline {
    /// Build a pipeline, failing on an invalid configuration
    pub fn new(config: AnalysisConfig) -> AnalysisResult<Self> {
        if let Err(e) = config.validate() {
            tracing::error!(error = %e, "Rejected analysis configuration");
            return Err(e);
        }

        Ok(Self {
            extractor: FeatureExtractor::new(config.features),
            patterns: PatternDetector::new(config.patterns),
            correlation: CorrelationEngine::new(config.correlation),
            anomaly: AnomalyDetector::new(config.anomaly),
            forecaster: Forecaster::new(config.forecast),
            ranker: Ranker::new(config.ranker),
        })
    }

    pub fn ranker(&self) -> &Ranker {
        &self.ranker
    }

    /// Analyze one batch
    pub fn run(&self, request: &AnalysisRequest) -> AnalysisReport {
        let records: Vec<DomainRecord> = request
            .records
            .iter()
            .filter(|r| request.range.contains(r.timestamp))
            .cloned()
            .collect();
        tracing::info!(
            records = records.len(),
            skipped = request.records.len() - records.len(),
            granularity = %request.granularity,
            "Starting analysis run"
        );

        let extraction = self.extractor.extract(&records, request.granularity);
        let mut omissions = extraction.omissions;

        let outcomes: Vec<SeriesOutcome> = extraction
            .series
            .par_iter()
            .map(|(_, series)| self.analyze_series(series))
            .collect();

        let mut patterns = Vec::new();
        let mut anomalies = Vec::new();
        let mut forecasts = Vec::new();
        for outcome in outcomes {
            patterns.extend(outcome.patterns);
            anomalies.extend(outcome.anomalies);
            forecasts.extend(outcome.forecasts);
            omissions.extend(outcome.omissions);
        }
        patterns.sort_by(|a, b| {
            (&a.key, a.kind, a.window.start).cmp(&(&b.key, b.kind, b.window.start))
        });
        anomalies.sort_by(|a, b| (&a.key, a.timestamp).cmp(&(&b.key, b.timestamp)));
        forecasts.sort_by(|a, b| (&a.key, a.step).cmp(&(&b.key, b.step)));

        let (edges, edge_omissions) = self.correlation.correlate_with_omissions(&extraction.series);
        omissions.extend(edge_omissions);
        omissions.sort_by(|a, b| {
            (a.stage, &a.subject, &a.reason).cmp(&(b.stage, &b.subject, &b.reason))
        });

        let recommendations = self.ranker.rank(&patterns, &edges, &anomalies, &forecasts);

        let as_of = request
            .as_of
            .or_else(|| records.iter().map(|r| r.timestamp).max())
            .unwrap_or_default();
        let digest = aggregate(&recommendations, request.window.resolve(as_of));

        tracing::info!(
            series = extraction.series.len(),
            patterns = patterns.len(),
            edges = edges.len(),
            anomalies = anomalies.len(),
            recommendations = recommendations.len(),
            omissions = omissions.len(),
            "Analysis run complete"
        );

        AnalysisReport {
            series: extraction.series.values().map(SeriesOverview::from).collect(),
            patterns,
            edges,
            anomalies,
            forecasts,
            recommendations,
            digest,
            omissions,
        }
    }

    fn analyze_series(&self, series: &FeatureSeries) -> SeriesOutcome {
        let mut outcome = SeriesOutcome::default();
        let subject = series.key.to_string();
        let skip = |stage: Stage, e: AnalysisError| {
            tracing::debug!(series = %series.key, stage = ?stage, error = %e, "Computation skipped");
            Omission::new(stage, subject.clone(), &e)
        };

        let (patterns, pattern_omissions) = self.patterns.detect_with_omissions(series);
        outcome.omissions.extend(pattern_omissions);

        match self.anomaly.detect(series) {
            Ok(events) => outcome.anomalies = events,
            Err(e) => outcome.omissions.push(skip(Stage::Anomaly, e)),
        }

        match self
            .forecaster
            .forecast(series, &patterns, self.forecaster.horizon())
        {
            Ok(points) => outcome.forecasts = points,
            Err(e) => outcome.omissions.push(skip(Stage::Forecast, e)),
        }

        outcome.patterns = patterns;
        outcome
    }
}

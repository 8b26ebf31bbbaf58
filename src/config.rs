//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.
//!
//! The analysis section is the whole configuration surface of the core:
//! aggregation policies, the cross-domain allow-list, thresholds, lag bounds
//! and minimum sample sizes. It is fixed at startup and checked once by
//! [`AnalysisConfig::validate`]; a malformed configuration fails the run
//! before any record is touched.

use crate::analysis::error::{AnalysisError, AnalysisResult};
use crate::records::{AggregationPolicy, Domain, SeriesKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Largest lag magnitude accepted for the correlation scan
pub const MAX_LAG_MAGNITUDE: i64 = 30;

/// Longest cycle period (in sampling periods) the pattern detector tests
pub const MAX_CYCLE_PERIOD: usize = 8784;

/// Longest recommendation lifetime, ten years
pub const MAX_EXPIRY_HOURS: i64 = 87_600;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Analysis core configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub features: FeatureConfig,

    #[serde(default)]
    pub patterns: PatternConfig,

    #[serde(default)]
    pub correlation: CorrelationConfig,

    #[serde(default)]
    pub anomaly: AnomalyConfig,

    #[serde(default)]
    pub forecast: ForecastConfig,

    #[serde(default)]
    pub ranker: RankerConfig,
}

/// Feature extraction configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeatureConfig {
    /// Minimum non-missing points a series needs to be analyzed at all
    #[serde(default = "default_min_points")]
    pub min_points: usize,

    /// Longest series, in periods, a stream may resample to
    #[serde(default = "default_max_periods")]
    pub max_periods: usize,

    /// Policy for metrics absent from the aggregation table
    #[serde(default = "default_aggregation")]
    pub default_aggregation: AggregationPolicy,

    /// Aggregation policy per `domain.metric`
    #[serde(default = "default_aggregation_table")]
    pub aggregation: BTreeMap<SeriesKey, AggregationPolicy>,
}

fn default_min_points() -> usize {
    7
}

fn default_max_periods() -> usize {
    100_000
}

fn default_aggregation() -> AggregationPolicy {
    AggregationPolicy::Mean
}

fn key(domain: Domain, metric: &str) -> SeriesKey {
    SeriesKey::new(domain, metric)
}

fn default_aggregation_table() -> BTreeMap<SeriesKey, AggregationPolicy> {
    use AggregationPolicy::*;
    use Domain::*;

    BTreeMap::from([
        (key(Calendar, "meeting_minutes"), Sum),
        (key(Calendar, "event_count"), Count),
        (key(Calendar, "free_block_minutes"), Sum),
        (key(Communication, "emails_received"), Sum),
        (key(Communication, "emails_sent"), Sum),
        (key(Communication, "after_hours_messages"), Sum),
        (key(Health, "sleep_hours"), Mean),
        (key(Health, "sleep_efficiency"), Mean),
        (key(Health, "steps"), Sum),
        (key(Health, "active_minutes"), Sum),
        (key(Health, "resting_heart_rate"), Mean),
        (key(Health, "energy_level"), Mean),
        (key(Finance, "daily_spend"), Sum),
        (key(Finance, "transaction_count"), Count),
        (key(Finance, "account_balance"), Last),
        (key(Finance, "savings_rate"), Mean),
    ])
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            min_points: default_min_points(),
            max_periods: default_max_periods(),
            default_aggregation: default_aggregation(),
            aggregation: default_aggregation_table(),
        }
    }
}

impl FeatureConfig {
    /// Aggregation policy for a series
    pub fn policy_for(&self, key: &SeriesKey) -> AggregationPolicy {
        self.aggregation
            .get(key)
            .copied()
            .unwrap_or(self.default_aggregation)
    }
}

/// Pattern detection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PatternConfig {
    /// Minimum non-missing points before any pattern is reported
    #[serde(default = "default_pattern_min_points")]
    pub min_points: usize,

    /// Significance level for the slope t-test
    #[serde(default = "default_trend_alpha")]
    pub trend_alpha: f64,

    /// Minimum |r| of the trend fit
    #[serde(default = "default_min_trend_strength")]
    pub min_trend_strength: f64,

    /// Minimum fitted change over the window relative to the series level
    #[serde(default = "default_min_relative_change")]
    pub min_relative_change: f64,

    /// Candidate cycle lengths in samples
    #[serde(default = "default_cycle_periods")]
    pub cycle_periods: Vec<usize>,

    /// Minimum peak autocorrelation for a cyclical pattern
    #[serde(default = "default_cycle_threshold")]
    pub cycle_threshold: f64,

    /// Trailing window inspected for plateaus
    #[serde(default = "default_plateau_window")]
    pub plateau_window: usize,

    /// Maximum coefficient of variation of a plateau
    #[serde(default = "default_plateau_max_cv")]
    pub plateau_max_cv: f64,
}

fn default_pattern_min_points() -> usize {
    10
}

fn default_trend_alpha() -> f64 {
    0.05
}

fn default_min_trend_strength() -> f64 {
    0.3
}

fn default_min_relative_change() -> f64 {
    0.1
}

fn default_cycle_periods() -> Vec<usize> {
    vec![7, 30]
}

fn default_cycle_threshold() -> f64 {
    0.5
}

fn default_plateau_window() -> usize {
    7
}

fn default_plateau_max_cv() -> f64 {
    0.05
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_points: default_pattern_min_points(),
            trend_alpha: default_trend_alpha(),
            min_trend_strength: default_min_trend_strength(),
            min_relative_change: default_min_relative_change(),
            cycle_periods: default_cycle_periods(),
            cycle_threshold: default_cycle_threshold(),
            plateau_window: default_plateau_window(),
            plateau_max_cv: default_plateau_max_cv(),
        }
    }
}

/// A pair of series the correlation engine is allowed to compare
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MetricPair {
    pub a: SeriesKey,
    pub b: SeriesKey,
}

impl MetricPair {
    pub fn new(a: SeriesKey, b: SeriesKey) -> Self {
        Self { a, b }
    }

    /// Order-independent identity of the pair
    pub fn canonical(&self) -> (SeriesKey, SeriesKey) {
        if self.a <= self.b {
            (self.a.clone(), self.b.clone())
        } else {
            (self.b.clone(), self.a.clone())
        }
    }
}

/// Cross-domain correlation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorrelationConfig {
    /// The only metric pairs that are ever correlated
    #[serde(default = "default_allow_list")]
    pub allow_list: Vec<MetricPair>,

    #[serde(default = "default_min_lag")]
    pub min_lag: i64,

    #[serde(default = "default_max_lag")]
    pub max_lag: i64,

    /// Minimum overlapping samples for an edge, whatever its coefficient
    #[serde(default = "default_min_window")]
    pub min_window: usize,

    /// Maximum p-value of a materialized edge
    #[serde(default = "default_correlation_alpha")]
    pub alpha: f64,

    /// Minimum confidence (1 - p) of a materialized edge
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Multiply p-values by the number of lags scanned
    #[serde(default = "default_lag_correction")]
    pub lag_correction: bool,
}

fn default_allow_list() -> Vec<MetricPair> {
    use Domain::*;

    [
        (key(Health, "sleep_hours"), key(Calendar, "meeting_minutes")),
        (key(Health, "sleep_hours"), key(Finance, "daily_spend")),
        (key(Health, "sleep_hours"), key(Communication, "after_hours_messages")),
        (key(Health, "steps"), key(Calendar, "meeting_minutes")),
        (key(Health, "energy_level"), key(Calendar, "meeting_minutes")),
        (key(Health, "resting_heart_rate"), key(Calendar, "meeting_minutes")),
        (key(Finance, "daily_spend"), key(Communication, "after_hours_messages")),
    ]
    .into_iter()
    .map(|(a, b)| MetricPair::new(a, b))
    .collect()
}

fn default_min_lag() -> i64 {
    -3
}

fn default_max_lag() -> i64 {
    3
}

fn default_min_window() -> usize {
    14
}

fn default_correlation_alpha() -> f64 {
    0.05
}

fn default_min_confidence() -> f64 {
    0.9
}

fn default_lag_correction() -> bool {
    true
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            allow_list: default_allow_list(),
            min_lag: default_min_lag(),
            max_lag: default_max_lag(),
            min_window: default_min_window(),
            alpha: default_correlation_alpha(),
            min_confidence: default_min_confidence(),
            lag_correction: default_lag_correction(),
        }
    }
}

/// Baseline estimator used by the anomaly detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineEstimator {
    /// Median and scaled median absolute deviation
    MedianMad,
    /// Mean and sample standard deviation
    MeanStd,
}

/// Anomaly detection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnomalyConfig {
    #[serde(default = "default_baseline")]
    pub baseline: BaselineEstimator,

    /// Number of most recent points checked against the baseline
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,

    /// Minimum points the baseline must be built from
    #[serde(default = "default_min_baseline_points")]
    pub min_baseline_points: usize,

    /// Expected range is center +/- range_multiplier * scale
    #[serde(default = "default_range_multiplier")]
    pub range_multiplier: f64,

    /// Scale floor as a fraction of |center|
    #[serde(default = "default_min_relative_scale")]
    pub min_relative_scale: f64,
}

fn default_baseline() -> BaselineEstimator {
    BaselineEstimator::MedianMad
}

fn default_recent_window() -> usize {
    7
}

fn default_min_baseline_points() -> usize {
    14
}

fn default_range_multiplier() -> f64 {
    3.0
}

fn default_min_relative_scale() -> f64 {
    0.01
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            baseline: default_baseline(),
            recent_window: default_recent_window(),
            min_baseline_points: default_min_baseline_points(),
            range_multiplier: default_range_multiplier(),
            min_relative_scale: default_min_relative_scale(),
        }
    }
}

/// Forecast configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForecastConfig {
    /// Periods ahead to forecast
    #[serde(default = "default_horizon")]
    pub horizon: usize,

    /// Recent points used to measure residual variance
    #[serde(default = "default_holdout")]
    pub holdout: usize,

    #[serde(default = "default_forecast_min_points")]
    pub min_points: usize,

    /// Normal quantile of the prediction interval
    #[serde(default = "default_interval_z")]
    pub interval_z: f64,

    /// Residual scale floor as a fraction of the last observed level
    #[serde(default = "default_min_relative_scale")]
    pub min_relative_scale: f64,
}

fn default_horizon() -> usize {
    3
}

fn default_holdout() -> usize {
    7
}

fn default_forecast_min_points() -> usize {
    7
}

fn default_interval_z() -> f64 {
    1.96
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon: default_horizon(),
            holdout: default_holdout(),
            min_points: default_forecast_min_points(),
            interval_z: default_interval_z(),
            min_relative_scale: default_min_relative_scale(),
        }
    }
}

/// Score cutoffs mapping a recommendation score to its priority
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriorityCutoffs {
    #[serde(default = "default_critical_cutoff")]
    pub critical: f64,
    #[serde(default = "default_high_cutoff")]
    pub high: f64,
    #[serde(default = "default_medium_cutoff")]
    pub medium: f64,
}

fn default_critical_cutoff() -> f64 {
    0.85
}

fn default_high_cutoff() -> f64 {
    0.65
}

fn default_medium_cutoff() -> f64 {
    0.4
}

impl Default for PriorityCutoffs {
    fn default() -> Self {
        Self {
            critical: default_critical_cutoff(),
            high: default_high_cutoff(),
            medium: default_medium_cutoff(),
        }
    }
}

/// Lifetime of a recommendation per priority, in hours
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExpiryConfig {
    #[serde(default = "default_critical_hours")]
    pub critical_hours: i64,
    #[serde(default = "default_high_hours")]
    pub high_hours: i64,
    #[serde(default = "default_medium_hours")]
    pub medium_hours: i64,
    #[serde(default = "default_low_hours")]
    pub low_hours: i64,
}

fn default_critical_hours() -> i64 {
    24
}

fn default_high_hours() -> i64 {
    72
}

fn default_medium_hours() -> i64 {
    168
}

fn default_low_hours() -> i64 {
    336
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            critical_hours: default_critical_hours(),
            high_hours: default_high_hours(),
            medium_hours: default_medium_hours(),
            low_hours: default_low_hours(),
        }
    }
}

/// Target range for a metric (e.g., sleep at least 7 hours)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Goal {
    pub metric: SeriesKey,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl Goal {
    /// Whether a value falls outside the target range
    pub fn is_breached_by(&self, value: f64) -> bool {
        self.min.map(|min| value < min).unwrap_or(false)
            || self.max.map(|max| value > max).unwrap_or(false)
    }
}

/// Recommendation ranker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RankerConfig {
    #[serde(default)]
    pub priority_cutoffs: PriorityCutoffs,

    /// Anomalies below this severity never become recommendations
    #[serde(default = "default_anomaly_min_severity")]
    pub anomaly_min_severity: f64,

    /// Edges below this |coefficient| never become recommendations
    #[serde(default = "default_edge_min_coefficient")]
    pub edge_min_coefficient: f64,

    #[serde(default = "default_trend_min_strength")]
    pub trend_min_strength: f64,

    #[serde(default = "default_cycle_min_strength")]
    pub cycle_min_strength: f64,

    #[serde(default = "default_goals")]
    pub goals: Vec<Goal>,

    /// Domains the user asked to prioritize
    #[serde(default)]
    pub focus_domains: Vec<Domain>,

    /// Score multiplier for recommendations touching a focus domain
    #[serde(default = "default_focus_boost")]
    pub focus_boost: f64,

    #[serde(default)]
    pub expiry: ExpiryConfig,
}

fn default_anomaly_min_severity() -> f64 {
    0.5
}

fn default_edge_min_coefficient() -> f64 {
    0.6
}

fn default_trend_min_strength() -> f64 {
    0.5
}

fn default_cycle_min_strength() -> f64 {
    0.6
}

fn default_goals() -> Vec<Goal> {
    use Domain::*;

    vec![
        Goal {
            metric: key(Health, "sleep_hours"),
            min: Some(7.0),
            max: None,
        },
        Goal {
            metric: key(Health, "steps"),
            min: Some(8000.0),
            max: None,
        },
        Goal {
            metric: key(Calendar, "meeting_minutes"),
            min: None,
            max: Some(360.0),
        },
        Goal {
            metric: key(Finance, "daily_spend"),
            min: None,
            max: Some(150.0),
        },
        Goal {
            metric: key(Finance, "savings_rate"),
            min: Some(0.1),
            max: None,
        },
    ]
}

fn default_focus_boost() -> f64 {
    1.2
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            priority_cutoffs: PriorityCutoffs::default(),
            anomaly_min_severity: default_anomaly_min_severity(),
            edge_min_coefficient: default_edge_min_coefficient(),
            trend_min_strength: default_trend_min_strength(),
            cycle_min_strength: default_cycle_min_strength(),
            goals: default_goals(),
            focus_domains: Vec::new(),
            focus_boost: default_focus_boost(),
            expiry: ExpiryConfig::default(),
        }
    }
}

impl RankerConfig {
    pub fn goal_for(&self, metric: &SeriesKey) -> Option<&Goal> {
        self.goals.iter().find(|g| &g.metric == metric)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn invalid(message: impl Into<String>) -> AnalysisError {
    AnalysisError::InvalidConfiguration(message.into())
}

fn check_unit_interval(name: &str, value: f64) -> AnalysisResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{} must be within [0, 1], got {}", name, value)))
    }
}

fn check_min_samples(name: &str, value: usize) -> AnalysisResult<()> {
    if value >= 3 {
        Ok(())
    } else {
        Err(invalid(format!("{} must be at least 3, got {}", name, value)))
    }
}

impl AnalysisConfig {
    /// Check every threshold, table and bound
    pub fn validate(&self) -> AnalysisResult<()> {
        check_min_samples("features.min_points", self.features.min_points)?;
        if self.features.max_periods < self.features.min_points {
            return Err(invalid("features.max_periods must be at least features.min_points"));
        }

        let p = &self.patterns;
        check_min_samples("patterns.min_points", p.min_points)?;
        if !(p.trend_alpha > 0.0 && p.trend_alpha < 1.0) {
            return Err(invalid("patterns.trend_alpha must be within (0, 1)"));
        }
        check_unit_interval("patterns.min_trend_strength", p.min_trend_strength)?;
        check_unit_interval("patterns.cycle_threshold", p.cycle_threshold)?;
        if p.min_relative_change < 0.0 || !p.min_relative_change.is_finite() {
            return Err(invalid("patterns.min_relative_change must be non-negative"));
        }
        if let Some(period) = p
            .cycle_periods
            .iter()
            .find(|&&period| !(2..=MAX_CYCLE_PERIOD).contains(&period))
        {
            return Err(invalid(format!(
                "patterns.cycle_periods entries must be within [2, {}], got {}",
                MAX_CYCLE_PERIOD, period
            )));
        }
        if p.plateau_window < 2 {
            return Err(invalid("patterns.plateau_window must be at least 2"));
        }
        if !(p.plateau_max_cv > 0.0 && p.plateau_max_cv.is_finite()) {
            return Err(invalid("patterns.plateau_max_cv must be positive"));
        }

        self.validate_correlation()?;

        let a = &self.anomaly;
        if a.recent_window == 0 {
            return Err(invalid("anomaly.recent_window must be at least 1"));
        }
        check_min_samples("anomaly.min_baseline_points", a.min_baseline_points)?;
        if !(a.range_multiplier > 0.0 && a.range_multiplier.is_finite()) {
            return Err(invalid("anomaly.range_multiplier must be positive"));
        }
        if a.min_relative_scale < 0.0 || !a.min_relative_scale.is_finite() {
            return Err(invalid("anomaly.min_relative_scale must be non-negative"));
        }

        let f = &self.forecast;
        if f.horizon == 0 {
            return Err(invalid("forecast.horizon must be at least 1"));
        }
        if f.holdout < 2 {
            return Err(invalid("forecast.holdout must be at least 2"));
        }
        check_min_samples("forecast.min_points", f.min_points)?;
        if !(f.interval_z > 0.0 && f.interval_z.is_finite()) {
            return Err(invalid("forecast.interval_z must be positive"));
        }
        if f.min_relative_scale < 0.0 || !f.min_relative_scale.is_finite() {
            return Err(invalid("forecast.min_relative_scale must be non-negative"));
        }

        self.validate_ranker()
    }

    fn validate_correlation(&self) -> AnalysisResult<()> {
        let c = &self.correlation;
        if c.min_lag > 0 || c.max_lag < 0 {
            return Err(invalid(format!(
                "correlation lag range [{}, {}] must include 0",
                c.min_lag, c.max_lag
            )));
        }
        if c.min_lag < -MAX_LAG_MAGNITUDE || c.max_lag > MAX_LAG_MAGNITUDE {
            return Err(invalid(format!(
                "correlation lags must stay within +/-{}",
                MAX_LAG_MAGNITUDE
            )));
        }
        check_min_samples("correlation.min_window", c.min_window)?;
        if !(c.alpha > 0.0 && c.alpha < 1.0) {
            return Err(invalid("correlation.alpha must be within (0, 1)"));
        }
        check_unit_interval("correlation.min_confidence", c.min_confidence)?;

        let mut seen = BTreeSet::new();
        for pair in &c.allow_list {
            if pair.a.domain == pair.b.domain {
                return Err(invalid(format!(
                    "allow-list pair {} / {} must span two domains",
                    pair.a, pair.b
                )));
            }
            if !seen.insert(pair.canonical()) {
                return Err(invalid(format!(
                    "allow-list pair {} / {} is listed twice",
                    pair.a, pair.b
                )));
            }
        }
        Ok(())
    }

    fn validate_ranker(&self) -> AnalysisResult<()> {
        let r = &self.ranker;
        let cut = &r.priority_cutoffs;
        check_unit_interval("ranker.priority_cutoffs.critical", cut.critical)?;
        check_unit_interval("ranker.priority_cutoffs.medium", cut.medium)?;
        if !(cut.critical > cut.high && cut.high > cut.medium) {
            return Err(invalid(
                "ranker.priority_cutoffs must satisfy critical > high > medium",
            ));
        }
        check_unit_interval("ranker.anomaly_min_severity", r.anomaly_min_severity)?;
        check_unit_interval("ranker.edge_min_coefficient", r.edge_min_coefficient)?;
        check_unit_interval("ranker.trend_min_strength", r.trend_min_strength)?;
        check_unit_interval("ranker.cycle_min_strength", r.cycle_min_strength)?;
        if !(r.focus_boost >= 1.0 && r.focus_boost.is_finite()) {
            return Err(invalid("ranker.focus_boost must be at least 1"));
        }

        let e = &r.expiry;
        for (name, hours) in [
            ("critical_hours", e.critical_hours),
            ("high_hours", e.high_hours),
            ("medium_hours", e.medium_hours),
            ("low_hours", e.low_hours),
        ] {
            if !(1..=MAX_EXPIRY_HOURS).contains(&hours) {
                return Err(invalid(format!(
                    "ranker.expiry.{} must be within [1, {}], got {}",
                    name, MAX_EXPIRY_HOURS, hours
                )));
            }
        }

        for goal in &r.goals {
            match (goal.min, goal.max) {
                (None, None) => {
                    return Err(invalid(format!("goal for {} has no bound", goal.metric)))
                }
                (Some(min), Some(max)) if min > max => {
                    return Err(invalid(format!("goal for {} has min > max", goal.metric)))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.analysis.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        config.analysis.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        config.analysis.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment
    ///
    /// The first existing file wins. A file that exists but cannot be
    /// read, parsed or validated is an error, not a reason to fall back.
    pub fn load_default() -> Result<Self, ConfigError> {
        let config_paths: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("lifesync").join("config.toml")),
            Some(PathBuf::from("/etc/lifesync/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&config_paths)
    }

    /// Load the first existing file among `paths`, or defaults with env overrides
    pub fn load_first(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        match paths.iter().find(|path| path.exists()) {
            Some(path) => {
                let config = Self::load_with_env(path)?;
                tracing::info!("Loaded config from {:?}", path);
                Ok(config)
            }
            None => {
                tracing::info!("Using default config with environment overrides");
                Self::from_env()
            }
        }
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(level) = lookup("LIFESYNC_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LIFESYNC_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(alpha) = lookup("LIFESYNC_CORRELATION_ALPHA") {
            self.analysis.correlation.alpha =
                parse_override("LIFESYNC_CORRELATION_ALPHA", &alpha)?;
        }
        if let Some(min_points) = lookup("LIFESYNC_MIN_POINTS") {
            self.analysis.features.min_points = parse_override("LIFESYNC_MIN_POINTS", &min_points)?;
        }
        Ok(())
    }
}

fn parse_override<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var,
        value: value.to_string(),
        error: e.to_string(),
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid value {value:?} for {var}: {error}")]
    Env {
        var: &'static str,
        value: String,
        error: String,
    },

    #[error(transparent)]
    Invalid(#[from] AnalysisError),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# LifeSync insights configuration
#
# Environment variables override these settings:
# - LIFESYNC_LOG_LEVEL
# - LIFESYNC_LOG_FORMAT
# - LIFESYNC_CORRELATION_ALPHA
# - LIFESYNC_MIN_POINTS

[analysis.features]
# Series with fewer non-missing points are skipped for the run
min_points = 7

# Streams spanning more periods than this are skipped for the run
max_periods = 100000

# Policy for metrics missing from the table below
default_aggregation = "mean"

[analysis.features.aggregation]
"calendar.meeting_minutes" = "sum"
"calendar.event_count" = "count"
"calendar.free_block_minutes" = "sum"
"communication.emails_received" = "sum"
"communication.emails_sent" = "sum"
"communication.after_hours_messages" = "sum"
"health.sleep_hours" = "mean"
"health.sleep_efficiency" = "mean"
"health.steps" = "sum"
"health.active_minutes" = "sum"
"health.resting_heart_rate" = "mean"
"health.energy_level" = "mean"
"finance.daily_spend" = "sum"
"finance.transaction_count" = "count"
"finance.account_balance" = "last"
"finance.savings_rate" = "mean"

[analysis.patterns]
min_points = 10
trend_alpha = 0.05
min_trend_strength = 0.3
min_relative_change = 0.1
cycle_periods = [7, 30]
cycle_threshold = 0.5
plateau_window = 7
plateau_max_cv = 0.05

[analysis.correlation]
# Lags are in sampling periods; the range must include 0
min_lag = -3
max_lag = 3

# Edges need at least this many overlapping samples
min_window = 14
alpha = 0.05
min_confidence = 0.9
lag_correction = true

# Only these pairs are ever correlated
[[analysis.correlation.allow_list]]
a = "health.sleep_hours"
b = "calendar.meeting_minutes"

[[analysis.correlation.allow_list]]
a = "health.sleep_hours"
b = "finance.daily_spend"

[[analysis.correlation.allow_list]]
a = "health.sleep_hours"
b = "communication.after_hours_messages"

[[analysis.correlation.allow_list]]
a = "health.steps"
b = "calendar.meeting_minutes"

[[analysis.correlation.allow_list]]
a = "health.energy_level"
b = "calendar.meeting_minutes"

[[analysis.correlation.allow_list]]
a = "health.resting_heart_rate"
b = "calendar.meeting_minutes"

[[analysis.correlation.allow_list]]
a = "finance.daily_spend"
b = "communication.after_hours_messages"

[analysis.anomaly]
# Baseline estimator: median_mad or mean_std
baseline = "median_mad"
recent_window = 7
min_baseline_points = 14
range_multiplier = 3.0
min_relative_scale = 0.01

[analysis.forecast]
horizon = 3
holdout = 7
min_points = 7
interval_z = 1.96
min_relative_scale = 0.01

[analysis.ranker]
anomaly_min_severity = 0.5
edge_min_coefficient = 0.6
trend_min_strength = 0.5
cycle_min_strength = 0.6

# Domains to prioritize: calendar, communication, health, finance
focus_domains = []
focus_boost = 1.2

[analysis.ranker.priority_cutoffs]
critical = 0.85
high = 0.65
medium = 0.4

[analysis.ranker.expiry]
critical_hours = 24
high_hours = 72
medium_hours = 168
low_hours = 336

[[analysis.ranker.goals]]
metric = "health.sleep_hours"
min = 7.0

[[analysis.ranker.goals]]
metric = "health.steps"
min = 8000.0

[[analysis.ranker.goals]]
metric = "calendar.meeting_minutes"
max = 360.0

[[analysis.ranker.goals]]
metric = "finance.daily_spend"
max = 150.0

# Share of income saved per period
[[analysis.ranker.goals]]
metric = "finance.savings_rate"
min = 0.1

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn test_generated_config_matches_defaults() {
        let parsed: Config = toml::from_str(&generate_default_config()).unwrap();
        let defaults = AnalysisConfig::default();

        assert!(parsed.analysis.validate().is_ok());
        assert_eq!(parsed.analysis.features.aggregation, defaults.features.aggregation);
        assert_eq!(parsed.analysis.correlation.allow_list, defaults.correlation.allow_list);
        assert_eq!(parsed.analysis.ranker.goals, defaults.ranker.goals);
        assert_eq!(parsed.analysis.anomaly.baseline, BaselineEstimator::MedianMad);
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[analysis.correlation]\nmax_lag = 5\n\n[logging]\nformat = \"json\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.analysis.correlation.max_lag, 5);
        assert_eq!(config.analysis.correlation.min_lag, -3);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.analysis.features.min_points, 7);
    }

    #[test]
    fn test_same_domain_pair_is_rejected() {
        let mut config = AnalysisConfig::default();
        config.correlation.allow_list.push(MetricPair::new(
            "health.steps".parse().unwrap(),
            "health.sleep_hours".parse().unwrap(),
        ));
        assert!(matches!(
            config.validate(),
            Err(AnalysisError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_duplicate_pair_is_rejected_in_either_order() {
        let mut config = AnalysisConfig::default();
        config.correlation.allow_list.push(MetricPair::new(
            "calendar.meeting_minutes".parse().unwrap(),
            "health.sleep_hours".parse().unwrap(),
        ));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lag_range_must_include_zero() {
        let mut config = AnalysisConfig::default();
        config.correlation.min_lag = 1;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.correlation.max_lag = 90;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_ranges() {
        let mut config = AnalysisConfig::default();
        config.correlation.alpha = 0.0;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.ranker.priority_cutoffs.high = 0.9;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.ranker.expiry.low_hours = 0;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.patterns.cycle_periods = vec![1];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_file_reports_invalid_configuration() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[analysis.features]\nmin_points = 1").unwrap();

        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Invalid(AnalysisError::InvalidConfiguration(_)))
        ));
    }

    #[test]
    fn test_invalid_file_on_search_path_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[analysis.features]\nmin_points = 1\n").unwrap();
        let paths = vec![dir.path().join("missing.toml"), path];

        assert!(matches!(
            Config::load_first(&paths),
            Err(ConfigError::Invalid(AnalysisError::InvalidConfiguration(_)))
        ));
    }

    #[test]
    fn test_malformed_file_on_search_path_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[analysis.features\nmin_points = ").unwrap();

        assert!(matches!(
            Config::load_first(&[path]),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_first_existing_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.toml");
        let second = dir.path().join("second.toml");
        std::fs::write(&first, "[analysis.correlation]\nmax_lag = 4\n").unwrap();
        std::fs::write(&second, "[analysis.features]\nmin_points = 1\n").unwrap();

        let config = Config::load_first(&[dir.path().join("missing.toml"), first, second]).unwrap();
        assert_eq!(config.analysis.correlation.max_lag, 4);
    }

    #[test]
    fn test_env_overrides_are_applied() {
        let mut config = Config::default();
        config
            .apply_overrides(|name| match name {
                "LIFESYNC_CORRELATION_ALPHA" => Some("0.01".to_string()),
                "LIFESYNC_MIN_POINTS" => Some(" 10 ".to_string()),
                "LIFESYNC_LOG_FORMAT" => Some("json".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.analysis.correlation.alpha, 0.01);
        assert_eq!(config.analysis.features.min_points, 10);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_unparseable_env_override_is_rejected() {
        let mut config = Config::default();
        let result = config.apply_overrides(|name| {
            (name == "LIFESYNC_MIN_POINTS").then(|| "seven".to_string())
        });
        assert!(matches!(
            result,
            Err(ConfigError::Env { var: "LIFESYNC_MIN_POINTS", .. })
        ));
        assert_eq!(config.analysis.features.min_points, 7);

        let result = config.apply_overrides(|name| {
            (name == "LIFESYNC_CORRELATION_ALPHA").then(|| "5%".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_upper_bounds_are_enforced() {
        let mut config = AnalysisConfig::default();
        config.ranker.expiry.critical_hours = i64::MAX / 1000;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.ranker.expiry.low_hours = MAX_EXPIRY_HOURS;
        assert!(config.validate().is_ok());

        let mut config = AnalysisConfig::default();
        config.patterns.cycle_periods = vec![7, usize::MAX];
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.features.max_periods = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_goals_cover_savings() {
        let ranker = RankerConfig::default();
        let savings = ranker.goal_for(&"finance.savings_rate".parse().unwrap()).unwrap();
        assert_eq!(savings.min, Some(0.1));
        assert_eq!(savings.max, None);
    }

    #[test]
    fn test_unknown_policy_uses_default() {
        let features = FeatureConfig::default();
        let known: SeriesKey = "finance.daily_spend".parse().unwrap();
        let unknown: SeriesKey = "health.hydration_glasses".parse().unwrap();
        assert_eq!(features.policy_for(&known), AggregationPolicy::Sum);
        assert_eq!(features.policy_for(&unknown), AggregationPolicy::Mean);
    }

    #[test]
    fn test_goal_breach() {
        let goal = Goal {
            metric: "health.sleep_hours".parse().unwrap(),
            min: Some(7.0),
            max: None,
        };
        assert!(goal.is_breached_by(6.5));
        assert!(!goal.is_breached_by(7.0));
    }
}

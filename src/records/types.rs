//! Core data types for the record stream consumed by the analysis core
//!
//! This module defines the normalized input the connectors hand over:
//! - `DomainRecord`: A single measurement from one life domain
//! - `SeriesKey`: The `(domain, metric)` identity of a stream
//! - `Granularity`: The sampling grid records are resampled onto
//! - `TimeRange`: A half-open time interval
//! - `Domain` and `AggregationPolicy`: Classification enums

use chrono::{Datelike, Months, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Life-data domain a record belongs to
///
/// Declaration order is significant: it is the canonical ordering used for
/// series identities and correlation edges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Calendar events (meeting load, free blocks)
    Calendar,
    /// Email and messaging metadata
    Communication,
    /// Fitness and sleep data
    Health,
    /// Financial transactions
    Finance,
}

impl Domain {
    /// Get all domains for iteration
    pub fn all() -> &'static [Domain] {
        &[
            Domain::Calendar,
            Domain::Communication,
            Domain::Health,
            Domain::Finance,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Calendar => "calendar",
            Domain::Communication => "communication",
            Domain::Health => "health",
            Domain::Finance => "finance",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "calendar" => Ok(Domain::Calendar),
            "communication" | "email" => Ok(Domain::Communication),
            "health" | "fitness" => Ok(Domain::Health),
            "finance" | "financial" => Ok(Domain::Finance),
            other => Err(format!("unknown domain '{}'", other)),
        }
    }
}

/// How record values are combined within one sampling period
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AggregationPolicy {
    /// Sum values (spend, meeting minutes, message counts)
    Sum,
    /// Average values (sleep efficiency, heart rate)
    Mean,
    /// Use last value in period (account balance, weight)
    Last,
    /// Maximum value
    Max,
    /// Minimum value
    Min,
    /// Count of records
    Count,
}

impl AggregationPolicy {
    /// Aggregate a slice of values (in timestamp order) according to this policy
    pub fn aggregate(&self, values: &[f64]) -> Option<f64> {
        let last = *values.last()?;

        Some(match self {
            AggregationPolicy::Sum => values.iter().sum(),
            AggregationPolicy::Mean => values.iter().sum::<f64>() / values.len() as f64,
            AggregationPolicy::Last => last,
            AggregationPolicy::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            AggregationPolicy::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            AggregationPolicy::Count => values.len() as f64,
        })
    }
}

/// Identity of one `(domain, metric)` stream, rendered as `domain.metric`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SeriesKey {
    pub domain: Domain,
    pub metric: String,
}

impl SeriesKey {
    pub fn new(domain: Domain, metric: impl Into<String>) -> Self {
        Self {
            domain,
            metric: metric.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.metric)
    }
}

impl FromStr for SeriesKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (domain, metric) = s
            .split_once('.')
            .ok_or_else(|| format!("series key '{}' must look like domain.metric", s))?;
        let metric = metric.trim();
        if metric.is_empty() {
            return Err(format!("series key '{}' has an empty metric name", s));
        }
        Ok(Self::new(domain.parse()?, metric))
    }
}

impl TryFrom<String> for SeriesKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SeriesKey> for String {
    fn from(key: SeriesKey) -> Self {
        key.to_string()
    }
}

/// A single normalized measurement produced by a connector
///
/// Immutable once created; the builder methods consume and return `self`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainRecord {
    pub domain: Domain,
    /// Metric name within the domain (e.g., "sleep_hours", "daily_spend")
    pub metric: String,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub value: f64,
    /// Unit of measurement (e.g., "hours", "usd", "count")
    #[serde(default)]
    pub unit: String,
    /// Optional connector-specific metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl DomainRecord {
    pub fn new(domain: Domain, metric: impl Into<String>, timestamp: i64, value: f64) -> Self {
        Self {
            domain,
            metric: metric.into(),
            timestamp,
            value,
            unit: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Builder method: set unit
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Builder method: add a metadata entry
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The stream this record belongs to
    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(self.domain, self.metric.clone())
    }
}

/// Sampling grid for feature series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    /// Weeks start on Monday
    Week,
    /// Calendar months
    Month,
}

const HOUR_MS: i64 = 3600 * 1000;
const DAY_MS: i64 = 24 * HOUR_MS;

impl Granularity {
    /// Truncate a timestamp (ms) to the start of its period
    pub fn truncate(&self, timestamp: i64) -> i64 {
        let dt = match Utc.timestamp_millis_opt(timestamp) {
            chrono::LocalResult::Single(dt) => dt,
            _ => return timestamp,
        };

        let midnight = |d: chrono::DateTime<Utc>| {
            d.with_hour(0)
                .and_then(|d| d.with_minute(0))
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_nanosecond(0))
                .unwrap_or(d)
        };

        let truncated = match self {
            Self::Hour => dt
                .with_minute(0)
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_nanosecond(0))
                .unwrap_or(dt),
            Self::Day => midnight(dt),
            Self::Week => {
                let days_since_monday = dt.weekday().num_days_from_monday() as i64;
                midnight(dt - chrono::Duration::days(days_since_monday))
            }
            Self::Month => midnight(dt.with_day(1).unwrap_or(dt)),
        };

        truncated.timestamp_millis()
    }

    /// Move a period start by `periods` periods (negative moves backwards)
    ///
    /// Returns `None` when the result leaves the representable calendar.
    pub fn advance(&self, bucket_start: i64, periods: i64) -> Option<i64> {
        let step = match self {
            Self::Hour => HOUR_MS,
            Self::Day => DAY_MS,
            Self::Week => 7 * DAY_MS,
            Self::Month => {
                let dt = Utc.timestamp_millis_opt(bucket_start).single()?;
                let months = Months::new(u32::try_from(periods.unsigned_abs()).ok()?);
                let moved = if periods >= 0 {
                    dt.checked_add_months(months)
                } else {
                    dt.checked_sub_months(months)
                };
                return moved.map(|d| d.timestamp_millis());
            }
        };

        let moved = periods
            .checked_mul(step)
            .and_then(|offset| bucket_start.checked_add(offset))?;
        is_representable(moved).then_some(moved)
    }

    /// Get the duration in milliseconds (approximate for months)
    pub fn approx_duration_ms(&self) -> i64 {
        match self {
            Self::Hour => HOUR_MS,
            Self::Day => DAY_MS,
            Self::Week => 7 * DAY_MS,
            Self::Month => 30 * DAY_MS,
        }
    }
}

/// Whether a millisecond timestamp maps to a calendar date
pub fn is_representable(timestamp: i64) -> bool {
    Utc.timestamp_millis_opt(timestamp).single().is_some()
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hour => write!(f, "hour"),
            Self::Day => write!(f, "day"),
            Self::Week => write!(f, "week"),
            Self::Month => write!(f, "month"),
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hour" | "hourly" | "h" => Ok(Self::Hour),
            "day" | "daily" | "d" => Ok(Self::Day),
            "week" | "weekly" | "w" => Ok(Self::Week),
            "month" | "monthly" | "m" => Ok(Self::Month),
            other => Err(format!("unknown granularity '{}'", other)),
        }
    }
}

/// Time range (half-open interval: [start, end)) in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: i64,
    /// End timestamp (exclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a time range, returning None if start >= end
    pub fn try_new(start: i64, end: i64) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// A range covering every representable timestamp
    pub fn unbounded() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }

    /// The `days` days ending (exclusive) at `end`
    pub fn days_before(end: i64, days: i64) -> Self {
        Self {
            start: end - days * DAY_MS,
            end,
        }
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Check if this range overlaps with another
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn duration_millis(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_key_roundtrip() {
        let key: SeriesKey = "health.sleep_hours".parse().unwrap();
        assert_eq!(key.domain, Domain::Health);
        assert_eq!(key.metric, "sleep_hours");
        assert_eq!(key.to_string(), "health.sleep_hours");

        assert!("sleep_hours".parse::<SeriesKey>().is_err());
        assert!("garden.roses".parse::<SeriesKey>().is_err());
        assert!("health.".parse::<SeriesKey>().is_err());
    }

    #[test]
    fn test_series_key_ordering_follows_domain_order() {
        let calendar = SeriesKey::new(Domain::Calendar, "zzz");
        let health = SeriesKey::new(Domain::Health, "aaa");
        let finance = SeriesKey::new(Domain::Finance, "aaa");
        assert!(calendar < health);
        assert!(health < finance);
    }

    #[test]
    fn test_record_serialization() {
        let record = DomainRecord::new(Domain::Finance, "daily_spend", 1_000, 42.5)
            .unit("usd")
            .meta("merchant", "grocer");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"domain\":\"finance\""));

        let restored: DomainRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, restored);
    }

    #[test]
    fn test_aggregation_policies() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];

        assert_eq!(AggregationPolicy::Sum.aggregate(&values), Some(15.0));
        assert_eq!(AggregationPolicy::Mean.aggregate(&values), Some(3.0));
        assert_eq!(AggregationPolicy::Last.aggregate(&values), Some(5.0));
        assert_eq!(AggregationPolicy::Max.aggregate(&values), Some(5.0));
        assert_eq!(AggregationPolicy::Min.aggregate(&values), Some(1.0));
        assert_eq!(AggregationPolicy::Count.aggregate(&values), Some(5.0));

        let empty: Vec<f64> = vec![];
        assert_eq!(AggregationPolicy::Sum.aggregate(&empty), None);
    }

    #[test]
    fn test_granularity_truncate() {
        // Jan 17, 2024 (Wednesday) at 10:30:00 UTC
        let ts = 1705487400000_i64;
        assert_eq!(Granularity::Hour.truncate(ts), 1705485600000);
        assert_eq!(Granularity::Day.truncate(ts), 1705449600000);
        // Monday Jan 15, 2024
        assert_eq!(Granularity::Week.truncate(ts), 1705276800000);
        // Jan 1, 2024
        assert_eq!(Granularity::Month.truncate(ts), 1704067200000);
    }

    #[test]
    fn test_granularity_advance() {
        let jan_1 = 1704067200000_i64;
        assert_eq!(Granularity::Day.advance(jan_1, 2), Some(jan_1 + 2 * DAY_MS));
        assert_eq!(Granularity::Week.advance(jan_1, -1), Some(jan_1 - 7 * DAY_MS));
        // Feb 1, 2024 and Dec 1, 2023
        assert_eq!(Granularity::Month.advance(jan_1, 1), Some(1706745600000));
        assert_eq!(Granularity::Month.advance(jan_1, -1), Some(1701388800000));
    }

    #[test]
    fn test_granularity_advance_out_of_calendar() {
        assert_eq!(Granularity::Day.advance(i64::MAX - 20_000, 1), None);
        assert_eq!(Granularity::Hour.advance(0, i64::MAX), None);
        assert_eq!(Granularity::Week.advance(i64::MIN + 1, -1), None);
        assert_eq!(Granularity::Month.advance(9_000_000_000_000_000_000, 1), None);
        assert!(!is_representable(9_000_000_000_000_000_000));
        assert!(is_representable(1704067200000));
    }

    #[test]
    fn test_time_range_contains() {
        let range = TimeRange::try_new(1000, 2000).unwrap();

        assert!(!range.contains(999));
        assert!(range.contains(1000));
        assert!(range.contains(1999));
        assert!(!range.contains(2000));
        assert!(TimeRange::try_new(2000, 2000).is_none());
    }
}

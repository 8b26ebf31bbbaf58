//! Recommendation types

use crate::analysis::{AnomalyEvent, CorrelationEdge, ForecastPoint, Pattern};
use crate::config::{ExpiryConfig, PriorityCutoffs, MAX_EXPIRY_HOURS};
use crate::records::{Domain, SeriesKey};
use serde::Serialize;
use std::collections::BTreeSet;

const HOUR_MS: i64 = 3600 * 1000;

/// Recommendation priority, ordered `Low < Medium < High < Critical`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Highest to lowest
    pub fn all() -> &'static [Priority] {
        &[
            Priority::Critical,
            Priority::High,
            Priority::Medium,
            Priority::Low,
        ]
    }

    pub fn from_score(score: f64, cutoffs: &PriorityCutoffs) -> Self {
        if score >= cutoffs.critical {
            Priority::Critical
        } else if score >= cutoffs.high {
            Priority::High
        } else if score >= cutoffs.medium {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    /// How long a recommendation of this priority stays active (ms)
    pub fn lifetime_millis(&self, expiry: &ExpiryConfig) -> i64 {
        let hours = match self {
            Priority::Critical => expiry.critical_hours,
            Priority::High => expiry.high_hours,
            Priority::Medium => expiry.medium_hours,
            Priority::Low => expiry.low_hours,
        };
        hours.clamp(1, MAX_EXPIRY_HOURS) * HOUR_MS
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a recommendation is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// A metric just left its usual range
    Alert,
    /// Recovery versus load across domains
    Wellbeing,
    /// Schedule load linked to health
    Schedule,
    /// Spending linked to health or messaging
    Spending,
    /// Any other cross-domain link
    Insight,
    /// A goal is drifting or about to be missed
    Goal,
    /// A recurring rhythm worth planning around
    Routine,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Alert => "alert",
            Category::Wellbeing => "wellbeing",
            Category::Schedule => "schedule",
            Category::Spending => "spending",
            Category::Insight => "insight",
            Category::Goal => "goal",
            Category::Routine => "routine",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detector output that contributed to a recommendation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    Pattern(Pattern),
    Edge(CorrelationEdge),
    Anomaly(AnomalyEvent),
    Forecast(ForecastPoint),
}

impl Signal {
    /// When the signal was last observed
    ///
    /// Forecasts count from the period they were issued at, never from the
    /// future period they predict.
    pub fn timestamp(&self) -> i64 {
        match self {
            Signal::Pattern(p) => p.last_seen,
            Signal::Edge(e) => e.last_seen,
            Signal::Anomaly(a) => a.timestamp,
            Signal::Forecast(f) => f.issued_at,
        }
    }

    /// Series the signal is about
    pub fn series(&self) -> Vec<&SeriesKey> {
        match self {
            Signal::Pattern(p) => vec![&p.key],
            Signal::Edge(e) => vec![&e.metric_a, &e.metric_b],
            Signal::Anomaly(a) => vec![&a.key],
            Signal::Forecast(f) => vec![&f.key],
        }
    }

    /// Stable identity of the signal, free of computed float values
    pub fn identity(&self) -> String {
        match self {
            Signal::Pattern(p) => format!("pattern:{}:{}:{}", p.key, p.kind, p.window.start),
            Signal::Edge(e) => format!("edge:{}:{}:{}", e.metric_a, e.metric_b, e.lag),
            Signal::Anomaly(a) => {
                format!("anomaly:{}:{}:{}", a.key, a.timestamp, a.direction.as_str())
            }
            Signal::Forecast(f) => format!("forecast:{}:{}:{}", f.key, f.issued_at, f.step),
        }
    }
}

/// A ranked, deduplicated action item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    /// Hex SHA-256 of the rule and its triggering signals
    pub fingerprint: String,
    /// Name of the rule that produced it
    pub rule: String,
    pub category: Category,
    pub priority: Priority,
    /// In [0, 1]
    pub score: f64,
    pub message: String,
    /// Contributing signals, most recent first
    pub rationale: Vec<Signal>,
    pub domains: Vec<Domain>,
    /// Latest timestamp among the triggering signals
    pub generated_at: i64,
    /// Always after `generated_at`
    pub expires_at: i64,
    pub dedup_key: String,
}

impl Recommendation {
    pub fn is_active_at(&self, timestamp: i64) -> bool {
        timestamp < self.expires_at
    }

    pub fn touches(&self, domain: Domain) -> bool {
        self.domains.contains(&domain)
    }
}

/// Sorted, distinct domains of a signal set
pub fn domains_of(signals: &[Signal]) -> Vec<Domain> {
    signals
        .iter()
        .flat_map(|s| s.series().into_iter().map(|k| k.domain))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

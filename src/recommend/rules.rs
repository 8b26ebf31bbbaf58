//! Rule table
//!
//! Each rule pairs a trigger with the handler that turns matching signals
//! into candidates, plus a category and a weight. Rules are data: the ranker
//! walks [`RULES`] and calls each handler, never special-casing a rule.
//! Edges go to the first edge rule whose domain pair matches, so the
//! specific pairs must stay ahead of the catch-all.

use super::types::{Category, Signal};
use crate::analysis::{
    AnomalyDirection, AnomalyEvent, CorrelationEdge, ForecastPoint, Pattern, PatternKind,
};
use crate::config::{Goal, RankerConfig};
use crate::records::{Domain, SeriesKey};
use std::collections::BTreeMap;

/// Signal shape a rule reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Recovery metrics falling while schedule or message load rises
    Burnout,
    /// Anomaly with severity above the configured minimum
    Anomaly,
    /// Forecast crossing a goal bound
    ForecastGoalBreach,
    /// Edge between exactly these two domains
    EdgeBetween(Domain, Domain),
    /// Any edge not claimed by a more specific rule
    AnyEdge,
    /// Trend moving away from a goal
    AdverseTrend,
    /// Strong recurring rhythm
    Cycle,
}

/// How far a rule's dedup key reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupScope {
    /// One active recommendation per rule and series set
    Series,
    /// One active recommendation per rule
    Rule,
}

/// Builds candidates for one rule from the run's signals
pub type Handler = fn(&'static Rule, &RankerConfig, &SignalSet<'_>) -> Vec<Candidate>;

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub category: Category,
    pub trigger: Trigger,
    pub handler: Handler,
    /// Rarity and urgency weight in (0, 1]
    pub weight: f64,
    pub dedup: DedupScope,
}

pub const RULES: &[Rule] = &[
    Rule {
        name: "burnout_risk",
        category: Category::Wellbeing,
        trigger: Trigger::Burnout,
        handler: burnout,
        weight: 1.0,
        dedup: DedupScope::Rule,
    },
    Rule {
        name: "anomaly_spike",
        category: Category::Alert,
        trigger: Trigger::Anomaly,
        handler: anomalies,
        weight: 1.0,
        dedup: DedupScope::Series,
    },
    Rule {
        name: "goal_forecast_breach",
        category: Category::Goal,
        trigger: Trigger::ForecastGoalBreach,
        handler: forecast_breaches,
        weight: 0.9,
        dedup: DedupScope::Series,
    },
    Rule {
        name: "schedule_health_link",
        category: Category::Schedule,
        trigger: Trigger::EdgeBetween(Domain::Calendar, Domain::Health),
        handler: edges,
        weight: 0.85,
        dedup: DedupScope::Series,
    },
    Rule {
        name: "spending_health_link",
        category: Category::Spending,
        trigger: Trigger::EdgeBetween(Domain::Health, Domain::Finance),
        handler: edges,
        weight: 0.8,
        dedup: DedupScope::Series,
    },
    Rule {
        name: "cross_domain_link",
        category: Category::Insight,
        trigger: Trigger::AnyEdge,
        handler: edges,
        weight: 0.65,
        dedup: DedupScope::Series,
    },
    Rule {
        name: "adverse_trend",
        category: Category::Goal,
        trigger: Trigger::AdverseTrend,
        handler: adverse_trends,
        weight: 0.75,
        dedup: DedupScope::Series,
    },
    Rule {
        name: "cycle_detected",
        category: Category::Routine,
        trigger: Trigger::Cycle,
        handler: cycles,
        weight: 0.45,
        dedup: DedupScope::Series,
    },
];

/// Everything the detectors produced for one run
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalSet<'a> {
    pub patterns: &'a [Pattern],
    pub edges: &'a [CorrelationEdge],
    pub anomalies: &'a [AnomalyEvent],
    pub forecasts: &'a [ForecastPoint],
}

/// A rule firing before scoring and dedup
#[derive(Debug, Clone)]
pub struct Candidate {
    pub rule: &'static Rule,
    pub signals: Vec<Signal>,
    /// Signal strength in [0, 1]
    pub strength: f64,
    /// Time pressure in (0, 1]
    pub urgency: f64,
    pub message: String,
}

/// Evaluate every rule against the signal set
pub fn candidates(config: &RankerConfig, input: &SignalSet<'_>) -> Vec<Candidate> {
    evaluate(RULES, config, input)
}

/// Evaluate a rule table in order
pub fn evaluate(
    rules: &'static [Rule],
    config: &RankerConfig,
    input: &SignalSet<'_>,
) -> Vec<Candidate> {
    rules
        .iter()
        .flat_map(|rule| (rule.handler)(rule, config, input))
        .collect()
}

/// Readable metric name, e.g. `sleep hours`
pub fn label(key: &SeriesKey) -> String {
    key.metric.replace('_', " ")
}

fn candidate(
    rule: &'static Rule,
    signals: Vec<Signal>,
    strength: f64,
    urgency: f64,
    message: String,
) -> Candidate {
    Candidate {
        rule,
        signals,
        strength: strength.clamp(0.0, 1.0),
        urgency: urgency.clamp(f64::MIN_POSITIVE, 1.0),
        message,
    }
}

fn is_recovery(key: &SeriesKey) -> bool {
    key.domain == Domain::Health
        && matches!(
            key.metric.as_str(),
            "sleep_hours" | "sleep_efficiency" | "energy_level"
        )
}

fn is_load(key: &SeriesKey) -> bool {
    match key.domain {
        Domain::Communication => true,
        Domain::Calendar => key.metric != "free_block_minutes",
        _ => false,
    }
}

fn burnout(rule: &'static Rule, config: &RankerConfig, input: &SignalSet<'_>) -> Vec<Candidate> {
    let mut recovery: Vec<(Signal, f64)> = Vec::new();
    let mut load: Vec<(Signal, f64)> = Vec::new();

    for p in input.patterns {
        if p.strength < config.trend_min_strength {
            continue;
        }
        if p.kind == PatternKind::TrendDown && is_recovery(&p.key) {
            recovery.push((Signal::Pattern(p.clone()), p.strength));
        } else if p.kind == PatternKind::TrendUp && is_load(&p.key) {
            load.push((Signal::Pattern(p.clone()), p.strength));
        }
    }
    for a in input.anomalies {
        if a.severity < config.anomaly_min_severity {
            continue;
        }
        if a.direction == AnomalyDirection::Below && is_recovery(&a.key) {
            recovery.push((Signal::Anomaly(a.clone()), a.severity));
        } else if a.direction == AnomalyDirection::Above && is_load(&a.key) {
            load.push((Signal::Anomaly(a.clone()), a.severity));
        }
    }

    if recovery.is_empty() || load.is_empty() {
        return Vec::new();
    }

    let count = (recovery.len() + load.len()) as f64;
    let strength = recovery.iter().chain(load.iter()).map(|(_, s)| s).sum::<f64>() / count;
    let signals: Vec<Signal> = recovery.into_iter().chain(load).map(|(s, _)| s).collect();

    vec![candidate(
        rule,
        signals,
        strength,
        1.0,
        "Signs of burnout risk: recovery is dropping while your workload rises. \
         Block time for rest and limit after-hours messages."
            .to_string(),
    )]
}

fn anomalies(rule: &'static Rule, config: &RankerConfig, input: &SignalSet<'_>) -> Vec<Candidate> {
    input
        .anomalies
        .iter()
        .filter(|a| a.severity >= config.anomaly_min_severity)
        .map(|a| {
            let message = format!(
                "Unusually {} {} ({:.1}, usual range {:.1} to {:.1})",
                if a.direction == AnomalyDirection::Above { "high" } else { "low" },
                label(&a.key),
                a.observed,
                a.expected_low,
                a.expected_high
            );
            candidate(rule, vec![Signal::Anomaly(a.clone())], a.severity, 1.0, message)
        })
        .collect()
}

fn forecast_breaches(
    rule: &'static Rule,
    config: &RankerConfig,
    input: &SignalSet<'_>,
) -> Vec<Candidate> {
    let mut by_series: BTreeMap<&SeriesKey, Vec<&ForecastPoint>> = BTreeMap::new();
    for f in input.forecasts {
        by_series.entry(&f.key).or_default().push(f);
    }

    by_series
        .into_iter()
        .filter_map(|(key, points)| {
            let goal = config.goal_for(key)?;
            let mut breaching: Vec<&ForecastPoint> = points
                .into_iter()
                .filter(|f| goal.is_breached_by(f.predicted))
                .collect();
            breaching.sort_by_key(|f| f.step);
            let first = *breaching.first()?;

            let (bound, verb) = breach_bound(goal, first.predicted);
            let gap = (first.predicted - bound).abs() / bound.abs().max(1.0);
            let message = format!(
                "{} is forecast to {} your goal of {} within {} period(s)",
                label(key),
                verb,
                bound,
                first.step
            );
            let signals = breaching.iter().map(|f| Signal::Forecast((*f).clone())).collect();
            Some(candidate(
                rule,
                signals,
                0.6 + gap,
                1.0 / (first.step as f64).sqrt(),
                message,
            ))
        })
        .collect()
}

fn breach_bound(goal: &Goal, value: f64) -> (f64, &'static str) {
    match (goal.min, goal.max) {
        (Some(min), _) if value < min => (min, "fall below"),
        (_, Some(max)) => (max, "exceed"),
        (Some(min), None) => (min, "fall below"),
        (None, None) => (value, "miss"),
    }
}

fn edges(rule: &'static Rule, config: &RankerConfig, input: &SignalSet<'_>) -> Vec<Candidate> {
    input
        .edges
        .iter()
        .filter(|e| e.coefficient.abs() >= config.edge_min_coefficient)
        .filter(|e| claiming_rule(e).map(|r| r.name) == Some(rule.name))
        .map(|e| {
            let relation = if e.coefficient > 0.0 {
                "rise and fall together"
            } else {
                "move in opposite directions"
            };
            let timing = match e.lag {
                0 => String::new(),
                k if k > 0 => format!(", {} trailing by {} period(s)", label(&e.metric_b), k),
                k => format!(", {} trailing by {} period(s)", label(&e.metric_a), -k),
            };
            let message = format!(
                "{} and {} {}{} (r={:.2})",
                label(&e.metric_a),
                label(&e.metric_b),
                relation,
                timing,
                e.coefficient
            );
            candidate(
                rule,
                vec![Signal::Edge(e.clone())],
                e.coefficient.abs() * e.confidence,
                1.0,
                message,
            )
        })
        .collect()
}

/// First edge rule in table order that accepts the edge
fn claiming_rule(edge: &CorrelationEdge) -> Option<&'static Rule> {
    RULES.iter().find(|rule| match rule.trigger {
        Trigger::EdgeBetween(x, y) => edge.links(x, y),
        Trigger::AnyEdge => true,
        _ => false,
    })
}

fn adverse_trends(
    rule: &'static Rule,
    config: &RankerConfig,
    input: &SignalSet<'_>,
) -> Vec<Candidate> {
    input
        .patterns
        .iter()
        .filter(|p| p.kind.is_trend() && p.strength >= config.trend_min_strength)
        .filter_map(|p| {
            let goal = config.goal_for(&p.key)?;
            let away = match p.kind {
                PatternKind::TrendDown => goal.min.is_some(),
                PatternKind::TrendUp => goal.max.is_some(),
                _ => false,
            };
            if !away {
                return None;
            }
            let direction = if p.kind == PatternKind::TrendUp { "up" } else { "down" };
            let message = format!(
                "{} has been trending {}, away from your goal",
                label(&p.key),
                direction
            );
            Some(candidate(rule, vec![Signal::Pattern(p.clone())], p.strength, 1.0, message))
        })
        .collect()
}

fn cycles(rule: &'static Rule, config: &RankerConfig, input: &SignalSet<'_>) -> Vec<Candidate> {
    input
        .patterns
        .iter()
        .filter(|p| p.kind == PatternKind::Cyclical && p.strength >= config.cycle_min_strength)
        .map(|p| {
            let message = format!(
                "{} follows a {}-period rhythm; plan around its peaks",
                label(&p.key),
                p.window.period.unwrap_or_default()
            );
            candidate(rule, vec![Signal::Pattern(p.clone())], p.strength, 1.0, message)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{CorrelationStrength, ForecastModel, PatternWindow};

    const BASE: i64 = 1704067200000;
    const DAY: i64 = 24 * 3600 * 1000;

    fn trend(key: &str, kind: PatternKind, strength: f64) -> Pattern {
        Pattern {
            key: key.parse().unwrap(),
            kind,
            strength,
            window: PatternWindow {
                start: BASE,
                end: BASE + 21 * DAY,
                period: None,
            },
            first_seen: BASE,
            last_seen: BASE + 20 * DAY,
            rate: None,
        }
    }

    fn edge(a: &str, b: &str, coefficient: f64) -> CorrelationEdge {
        CorrelationEdge {
            metric_a: a.parse().unwrap(),
            metric_b: b.parse().unwrap(),
            lag: 1,
            coefficient,
            confidence: 0.99,
            p_value: 0.01,
            sample_size: 30,
            strength: CorrelationStrength::from_coefficient(coefficient),
            last_seen: BASE + 20 * DAY,
        }
    }

    fn forecast(key: &str, step: usize, predicted: f64) -> ForecastPoint {
        ForecastPoint {
            key: key.parse().unwrap(),
            timestamp: BASE + (20 + step as i64) * DAY,
            issued_at: BASE + 20 * DAY,
            step,
            predicted,
            low: predicted - 1.0,
            high: predicted + 1.0,
            model: ForecastModel::Trend,
        }
    }

    fn anomaly(key: &str, direction: AnomalyDirection, severity: f64) -> AnomalyEvent {
        AnomalyEvent {
            key: key.parse().unwrap(),
            timestamp: BASE + 20 * DAY,
            observed: 1.0,
            expected_low: 2.0,
            expected_high: 3.0,
            deviation: 4.0,
            severity,
            direction,
        }
    }

    fn names(candidates: &[Candidate]) -> Vec<&'static str> {
        candidates.iter().map(|c| c.rule.name).collect()
    }

    #[test]
    fn test_rule_names_are_unique() {
        let mut names: Vec<&str> = RULES.iter().map(|r| r.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), RULES.len());
    }

    fn low_sleep_only(
        rule: &'static Rule,
        _config: &RankerConfig,
        input: &SignalSet<'_>,
    ) -> Vec<Candidate> {
        input
            .anomalies
            .iter()
            .filter(|a| a.key.metric == "sleep_hours" && a.direction == AnomalyDirection::Below)
            .map(|a| {
                let signals = vec![Signal::Anomaly(a.clone())];
                candidate(rule, signals, a.severity, 0.5, "Short night".to_string())
            })
            .collect()
    }

    static CUSTOM_RULES: &[Rule] = &[Rule {
        name: "short_night",
        category: Category::Alert,
        trigger: Trigger::Anomaly,
        handler: low_sleep_only,
        weight: 0.5,
        dedup: DedupScope::Series,
    }];

    #[test]
    fn test_custom_table_needs_no_dispatch_changes() {
        let events = vec![
            anomaly("health.sleep_hours", AnomalyDirection::Below, 0.8),
            anomaly("finance.daily_spend", AnomalyDirection::Above, 0.9),
        ];
        let input = SignalSet {
            anomalies: &events,
            ..SignalSet::default()
        };

        let out = evaluate(CUSTOM_RULES, &RankerConfig::default(), &input);
        assert_eq!(names(&out), vec!["short_night"]);
        assert_eq!(out[0].urgency, 0.5);
    }

    #[test]
    fn test_edges_go_to_most_specific_rule() {
        let edges = vec![
            edge("calendar.meeting_minutes", "health.sleep_hours", -0.8),
            edge("health.sleep_hours", "finance.daily_spend", -0.7),
            edge("communication.after_hours_messages", "finance.daily_spend", 0.75),
            edge("calendar.meeting_minutes", "health.steps", -0.3),
        ];
        let input = SignalSet {
            edges: &edges,
            ..SignalSet::default()
        };

        let out = candidates(&RankerConfig::default(), &input);
        assert_eq!(
            names(&out),
            vec!["schedule_health_link", "spending_health_link", "cross_domain_link"]
        );
        assert!(out[0].message.contains("opposite directions"));
    }

    #[test]
    fn test_burnout_needs_both_sides() {
        let only_recovery = vec![trend("health.sleep_hours", PatternKind::TrendDown, 0.8)];
        let input = SignalSet {
            patterns: &only_recovery,
            ..SignalSet::default()
        };
        let out = candidates(&RankerConfig::default(), &input);
        assert!(!names(&out).contains(&"burnout_risk"));

        let both = vec![
            trend("health.sleep_hours", PatternKind::TrendDown, 0.8),
            trend("calendar.meeting_minutes", PatternKind::TrendUp, 0.6),
        ];
        let input = SignalSet {
            patterns: &both,
            ..SignalSet::default()
        };
        let out = candidates(&RankerConfig::default(), &input);
        let burnout = out.iter().find(|c| c.rule.name == "burnout_risk").unwrap();
        assert_eq!(burnout.signals.len(), 2);
        assert!((burnout.strength - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_adverse_trend_respects_goal_direction() {
        let patterns = vec![
            trend("health.steps", PatternKind::TrendDown, 0.9),
            trend("health.sleep_hours", PatternKind::TrendUp, 0.9),
            trend("finance.daily_spend", PatternKind::TrendUp, 0.7),
        ];
        let input = SignalSet {
            patterns: &patterns,
            ..SignalSet::default()
        };

        let out: Vec<Candidate> = candidates(&RankerConfig::default(), &input)
            .into_iter()
            .filter(|c| c.rule.name == "adverse_trend")
            .collect();
        assert_eq!(out.len(), 2);
        assert!(out[0].message.starts_with("steps has been trending down"));
        assert!(out[1].message.starts_with("daily spend has been trending up"));
    }

    #[test]
    fn test_forecast_breach_uses_first_breaching_step() {
        let forecasts = vec![
            forecast("health.sleep_hours", 1, 7.2),
            forecast("health.sleep_hours", 2, 6.8),
            forecast("health.sleep_hours", 3, 6.5),
            forecast("health.resting_heart_rate", 1, 90.0),
        ];
        let input = SignalSet {
            forecasts: &forecasts,
            ..SignalSet::default()
        };

        let out = candidates(&RankerConfig::default(), &input);
        assert_eq!(names(&out), vec!["goal_forecast_breach"]);
        assert_eq!(out[0].signals.len(), 2);
        assert!((out[0].urgency - 1.0 / 2f64.sqrt()).abs() < 1e-9);
        assert!(out[0].message.contains("fall below your goal of 7"));
    }

    #[test]
    fn test_weak_signals_are_ignored() {
        let patterns = vec![trend("health.steps", PatternKind::TrendDown, 0.2)];
        let edges = vec![edge("calendar.meeting_minutes", "health.sleep_hours", 0.4)];
        let input = SignalSet {
            patterns: &patterns,
            edges: &edges,
            ..SignalSet::default()
        };
        assert!(candidates(&RankerConfig::default(), &input).is_empty());
    }
}

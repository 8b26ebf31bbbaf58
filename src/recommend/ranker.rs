//! Recommendation Ranker
//!
//! Scores rule candidates, collapses duplicates and orders the result.
//!
//! - score = strength × urgency × rule weight, boosted for focus domains,
//!   clamped to [0, 1]
//! - priority comes from the score via the configured cutoffs
//! - duplicates (same dedup key) keep the higher score; on a tie the
//!   earliest generated one, then the smallest fingerprint
//! - output is ordered by priority, score, most recent signal, fingerprint

use super::fingerprint::{dedup_key, fingerprint};
use super::rules::{self, Candidate, DedupScope, SignalSet};
use super::types::{domains_of, Priority, Recommendation, Signal};
use crate::analysis::{AnomalyEvent, CorrelationEdge, ForecastPoint, Pattern};
use crate::config::RankerConfig;
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Ranker {
    config: RankerConfig,
}

impl Ranker {
    pub fn new(config: RankerConfig) -> Self {
        Self { config }
    }

    /// Turn detector outputs into ranked, deduplicated recommendations
    pub fn rank(
        &self,
        patterns: &[Pattern],
        edges: &[CorrelationEdge],
        anomalies: &[AnomalyEvent],
        forecasts: &[ForecastPoint],
    ) -> Vec<Recommendation> {
        self.rank_signals(&SignalSet {
            patterns,
            edges,
            anomalies,
            forecasts,
        })
    }

    pub fn rank_signals(&self, input: &SignalSet<'_>) -> Vec<Recommendation> {
        let candidates = rules::candidates(&self.config, input);
        let generated = candidates.len();

        let recommendations: Vec<Recommendation> = candidates
            .into_iter()
            .filter_map(|c| self.build(c))
            .collect();
        let mut ranked = deduplicate(recommendations);
        sort_recommendations(&mut ranked);

        tracing::debug!(
            candidates = generated,
            recommendations = ranked.len(),
            "Ranked recommendations"
        );
        ranked
    }

    /// Score one candidate and stamp its identity and lifetime
    ///
    /// Returns `None` for a candidate without signals.
    pub fn build(&self, candidate: Candidate) -> Option<Recommendation> {
        let mut signals = candidate.signals;
        signals.sort_by(|a, b| {
            b.timestamp()
                .cmp(&a.timestamp())
                .then_with(|| a.identity().cmp(&b.identity()))
        });
        let generated_at = signals.iter().map(Signal::timestamp).max()?;

        let rule = candidate.rule;
        let domains = domains_of(&signals);
        let mut score = candidate.strength * candidate.urgency * rule.weight;
        if domains.iter().any(|d| self.config.focus_domains.contains(d)) {
            score *= self.config.focus_boost;
        }
        let score = score.clamp(0.0, 1.0);
        let priority = Priority::from_score(score, &self.config.priority_cutoffs);

        let dedup_key = match rule.dedup {
            DedupScope::Series => dedup_key(rule.name, &signals),
            DedupScope::Rule => rule.name.to_string(),
        };

        Some(Recommendation {
            fingerprint: fingerprint(rule.name, &signals),
            rule: rule.name.to_string(),
            category: rule.category,
            priority,
            score,
            message: candidate.message,
            rationale: signals,
            domains,
            generated_at,
            expires_at: generated_at.saturating_add(priority.lifetime_millis(&self.config.expiry)),
            dedup_key,
        })
    }

    /// Merge recommendations carried over from earlier runs with fresh ones
    ///
    /// Anything expired at `as_of` is dropped; the rest collapse by dedup
    /// key exactly as within a single run.
    pub fn reconcile(
        &self,
        previous: &[Recommendation],
        fresh: Vec<Recommendation>,
        as_of: i64,
    ) -> Vec<Recommendation> {
        let carried = previous.len();
        let active: Vec<Recommendation> = previous
            .iter()
            .cloned()
            .chain(fresh)
            .filter(|r| r.is_active_at(as_of))
            .collect();

        let mut merged = deduplicate(active);
        sort_recommendations(&mut merged);

        tracing::debug!(carried, merged = merged.len(), as_of, "Reconciled recommendations");
        merged
    }
}

/// Keep the preferred recommendation per dedup key
pub fn deduplicate(recommendations: Vec<Recommendation>) -> Vec<Recommendation> {
    let mut best: BTreeMap<String, Recommendation> = BTreeMap::new();
    for rec in recommendations {
        match best.get(&rec.dedup_key) {
            Some(kept) if preference(kept, &rec) != Ordering::Greater => {}
            _ => {
                best.insert(rec.dedup_key.clone(), rec);
            }
        }
    }
    best.into_values().collect()
}

/// `Less` when `a` should survive over `b`
fn preference(a: &Recommendation, b: &Recommendation) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| a.generated_at.cmp(&b.generated_at))
        .then_with(|| a.fingerprint.cmp(&b.fingerprint))
}

/// Priority, then score, then most recent signal, then fingerprint
pub fn sort_recommendations(recommendations: &mut [Recommendation]) {
    recommendations.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.score.total_cmp(&a.score))
            .then_with(|| b.generated_at.cmp(&a.generated_at))
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });
}

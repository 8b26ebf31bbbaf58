//! Insight Aggregator
//!
//! Pure filter, group and sort over recommendations. No analytics happen
//! here; the digest only selects what was generated inside the window and
//! summarizes it per domain.

use crate::recommend::{Category, Priority, Recommendation};
use crate::records::{Domain, TimeRange};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Number of recommendations per priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriorityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl PriorityCounts {
    fn add(&mut self, priority: Priority) {
        match priority {
            Priority::Critical => self.critical += 1,
            Priority::High => self.high += 1,
            Priority::Medium => self.medium += 1,
            Priority::Low => self.low += 1,
        }
    }
}

/// Per-domain summary statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainSummary {
    pub domain: Domain,
    pub total: usize,
    pub by_priority: PriorityCounts,
    pub highest_priority: Option<Priority>,
    pub categories: Vec<Category>,
}

impl DomainSummary {
    fn empty(domain: Domain) -> Self {
        Self {
            domain,
            total: 0,
            by_priority: PriorityCounts::default(),
            highest_priority: None,
            categories: Vec::new(),
        }
    }
}

/// Recommendations of one window, ready for delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightDigest {
    pub window: TimeRange,
    /// By priority, then most recent first
    pub recommendations: Vec<Recommendation>,
    /// One entry per domain, in domain order
    pub summaries: Vec<DomainSummary>,
}

impl InsightDigest {
    /// A well-formed digest with nothing in it
    pub fn empty(window: TimeRange) -> Self {
        aggregate(&[], window)
    }

    pub fn is_empty(&self) -> bool {
        self.recommendations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.recommendations.len()
    }

    pub fn summary(&self, domain: Domain) -> Option<&DomainSummary> {
        self.summaries.iter().find(|s| s.domain == domain)
    }
}

/// Select the recommendations generated inside `window` and summarize them
pub fn aggregate(recommendations: &[Recommendation], window: TimeRange) -> InsightDigest {
    let mut selected: Vec<Recommendation> = recommendations
        .iter()
        .filter(|r| window.contains(r.generated_at))
        .cloned()
        .collect();
    selected.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.generated_at.cmp(&a.generated_at))
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });

    let summaries = Domain::all()
        .iter()
        .map(|&domain| {
            let mut summary = DomainSummary::empty(domain);
            let mut categories = BTreeSet::new();
            for rec in selected.iter().filter(|r| r.touches(domain)) {
                summary.total += 1;
                summary.by_priority.add(rec.priority);
                summary.highest_priority = summary.highest_priority.max(Some(rec.priority));
                categories.insert(rec.category);
            }
            summary.categories = categories.into_iter().collect();
            summary
        })
        .collect();

    InsightDigest {
        window,
        recommendations: selected,
        summaries,
    }
}

impl fmt::Display for InsightDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Insight digest: {} recommendation(s)", self.len())?;
        for rec in &self.recommendations {
            writeln!(
                f,
                "  [{:<8}] {:<9} {:.2}  {}",
                rec.priority.as_str(),
                rec.category.as_str(),
                rec.score,
                rec.message
            )?;
        }
        for summary in self.summaries.iter().filter(|s| s.total > 0) {
            writeln!(
                f,
                "  {}: {} (critical {}, high {}, medium {}, low {})",
                summary.domain,
                summary.total,
                summary.by_priority.critical,
                summary.by_priority.high,
                summary.by_priority.medium,
                summary.by_priority.low
            )?;
        }
        Ok(())
    }
}

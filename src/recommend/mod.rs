//! Recommendation Ranker
//!
//! Converts patterns, correlation edges, anomalies and forecasts into
//! ranked, deduplicated recommendations.
//!
//! - **types**: Priority, Category, Signal, Recommendation
//! - **rules**: the rule table mapping signal shapes to categories
//! - **fingerprint**: deterministic fingerprints and dedup keys
//! - **ranker**: scoring, dedup, ordering and cross-run reconciliation

pub mod fingerprint;
pub mod ranker;
pub mod rules;
pub mod types;

pub use fingerprint::{dedup_key, fingerprint};
pub use ranker::{deduplicate, sort_recommendations, Ranker};
pub use rules::{Candidate, Handler, Rule, SignalSet, Trigger, RULES};
pub use types::{Category, Priority, Recommendation, Signal};

//! Insight digests
//!
//! - **digest**: aggregation of recommendations into an `InsightDigest`
//! - **window**: daily/weekly/monthly presets, trailing and custom windows

pub mod digest;
pub mod window;

pub use digest::{aggregate, DomainSummary, InsightDigest, PriorityCounts};
pub use window::{parse_window, DigestWindow};

//! Analysis error types
//!
//! Only `InvalidConfiguration` is fatal. The other two are raised for a single
//! series, pair or statistic; the caller records them as omissions and the run
//! continues.

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur in the analysis core
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// A series lacks the minimum points required for an analysis
    #[error("Insufficient data for {subject}: need {required} points, found {found}")]
    InsufficientData {
        subject: String,
        required: usize,
        found: usize,
    },

    /// Threshold, table or allow-list is malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A statistic is undefined for the given inputs (e.g., zero variance)
    #[error("Numeric instability in {computation}: {reason}")]
    NumericInstability {
        computation: &'static str,
        reason: String,
    },
}

impl AnalysisError {
    pub fn insufficient(subject: impl Into<String>, required: usize, found: usize) -> Self {
        AnalysisError::InsufficientData {
            subject: subject.into(),
            required,
            found,
        }
    }

    pub fn unstable(computation: &'static str, reason: impl Into<String>) -> Self {
        AnalysisError::NumericInstability {
            computation,
            reason: reason.into(),
        }
    }

    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, AnalysisError::InvalidConfiguration(_))
    }
}

/// Result type alias for analysis operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Pipeline stage an omission happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Patterns,
    Correlation,
    Anomaly,
    Forecast,
}

/// A skipped computation, kept so partial results stay explainable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Omission {
    pub stage: Stage,
    /// Series key or pair the computation was about
    pub subject: String,
    pub reason: String,
}

impl Omission {
    pub fn new(stage: Stage, subject: impl Into<String>, error: &AnalysisError) -> Self {
        Self {
            stage,
            subject: subject.into(),
            reason: error.to_string(),
        }
    }
}

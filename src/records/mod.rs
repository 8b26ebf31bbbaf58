//! Domain Record Stream
//!
//! The normalized input the analysis core consumes. Connectors (calendar sync,
//! email metadata, fitness, transactions) live outside this crate; they hand
//! over `DomainRecord`s either in memory or through the file adapters in
//! [`import`].
//!
//! - **types**: DomainRecord, SeriesKey, Granularity, TimeRange
//! - **import**: CSV/JSON file adapters

pub mod import;
pub mod types;

pub use import::{import_csv, import_json, import_path, ImportError, ImportResult, RecordImport};
pub use types::{
    is_representable, AggregationPolicy, Domain, DomainRecord, Granularity, SeriesKey, TimeRange,
};

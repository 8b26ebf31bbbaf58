//! Record Import
//!
//! File adapters that turn exported connector output into `DomainRecord`s.
//! Two layouts are supported:
//!
//! - CSV with a `domain,metric,timestamp,value[,unit]` header (column order is
//!   free, extra columns become metadata)
//! - JSON arrays of `DomainRecord` objects

use crate::records::types::{Domain, DomainRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while importing records
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type ImportResult<T> = Result<T, ImportError>;

/// Result of an import operation
#[derive(Debug, Default)]
pub struct RecordImport {
    pub records: Vec<DomainRecord>,
    pub rows_processed: usize,
    pub rows_failed: usize,
    pub errors: Vec<String>,
}

const MAX_REPORTED_ERRORS: usize = 100;

/// Column positions resolved from a CSV header row
#[derive(Debug)]
struct CsvColumns {
    domain: usize,
    metric: usize,
    timestamp: usize,
    value: usize,
    unit: Option<usize>,
    extra: Vec<(usize, String)>,
}

impl CsvColumns {
    fn from_headers(headers: &csv::StringRecord) -> ImportResult<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let require = |name: &str| {
            find(name).ok_or_else(|| ImportError::Parse(format!("missing '{}' column", name)))
        };

        let domain = require("domain")?;
        let metric = require("metric")?;
        let timestamp = find("timestamp")
            .or_else(|| find("date"))
            .or_else(|| find("time"))
            .ok_or_else(|| ImportError::Parse("missing 'timestamp' column".to_string()))?;
        let value = require("value")?;
        let unit = find("unit");

        let known = [Some(domain), Some(metric), Some(timestamp), Some(value), unit];
        let extra = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| !known.contains(&Some(*idx)))
            .map(|(idx, h)| (idx, h.trim().to_lowercase().replace(' ', "_")))
            .collect();

        Ok(Self {
            domain,
            metric,
            timestamp,
            value,
            unit,
            extra,
        })
    }
}

/// Import records from a CSV file
pub fn import_csv(path: &Path) -> ImportResult<RecordImport> {
    let reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    read_csv(reader)
}

/// Import records from CSV text (useful for testing)
pub fn import_csv_str(data: &str) -> ImportResult<RecordImport> {
    let reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(data.as_bytes());
    read_csv(reader)
}

fn read_csv<R: std::io::Read>(mut reader: csv::Reader<R>) -> ImportResult<RecordImport> {
    let columns = CsvColumns::from_headers(reader.headers()?)?;
    let mut import = RecordImport::default();

    for (line_num, result) in reader.records().enumerate() {
        // Header is line 1
        let line = line_num + 2;

        match result
            .map_err(ImportError::from)
            .and_then(|row| parse_row(&row, &columns))
        {
            Ok(record) => {
                import.records.push(record);
                import.rows_processed += 1;
            }
            Err(e) => {
                import.rows_failed += 1;
                import.errors.push(format!("Line {}: {}", line, e));
            }
        }
    }

    if import.errors.len() > MAX_REPORTED_ERRORS {
        let total = import.errors.len();
        import.errors.truncate(MAX_REPORTED_ERRORS);
        import
            .errors
            .push(format!("... and {} more errors", total - MAX_REPORTED_ERRORS));
    }

    tracing::debug!(
        rows = import.rows_processed,
        failed = import.rows_failed,
        "Imported records from CSV"
    );

    Ok(import)
}

fn parse_row(row: &csv::StringRecord, columns: &CsvColumns) -> ImportResult<DomainRecord> {
    let field = |idx: usize, name: &str| {
        row.get(idx)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ImportError::Parse(format!("missing {}", name)))
    };

    let domain: Domain = field(columns.domain, "domain")?
        .parse()
        .map_err(ImportError::Parse)?;
    let metric = field(columns.metric, "metric")?;
    let timestamp = parse_timestamp(field(columns.timestamp, "timestamp")?)?;
    let value_str = field(columns.value, "value")?;
    let value: f64 = value_str
        .parse()
        .map_err(|_| ImportError::Parse(format!("invalid value '{}'", value_str)))?;

    let mut record = DomainRecord::new(domain, metric, timestamp, value);
    if let Some(unit) = columns.unit.and_then(|idx| row.get(idx)) {
        record = record.unit(unit.trim());
    }
    for (idx, name) in &columns.extra {
        if let Some(v) = row.get(*idx).map(str::trim).filter(|v| !v.is_empty()) {
            record = record.meta(name.clone(), v);
        }
    }

    Ok(record)
}

/// Parse a timestamp in one of the accepted formats into epoch milliseconds
///
/// Date-only values land at noon UTC so they stay inside the same day
/// whatever the reader's offset.
pub fn parse_timestamp(ts_str: &str) -> ImportResult<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts_str) {
        return Ok(dt.with_timezone(&Utc).timestamp_millis());
    }

    let datetime_formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
    for fmt in datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(ts_str, fmt) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }

    let date_formats = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
    for fmt in date_formats {
        if let Ok(date) = NaiveDate::parse_from_str(ts_str, fmt) {
            if let Some(noon) = date.and_hms_opt(12, 0, 0) {
                return Ok(noon.and_utc().timestamp_millis());
            }
        }
    }

    if let Ok(ms) = ts_str.parse::<i64>() {
        return Ok(ms);
    }

    Err(ImportError::Parse(format!(
        "could not parse timestamp '{}'",
        ts_str
    )))
}

/// Import records from a JSON file containing an array of records
pub fn import_json(path: &Path) -> ImportResult<RecordImport> {
    let content = std::fs::read_to_string(path)?;
    import_json_str(&content)
}

pub fn import_json_str(data: &str) -> ImportResult<RecordImport> {
    let records: Vec<DomainRecord> = serde_json::from_str(data)?;
    Ok(RecordImport {
        rows_processed: records.len(),
        records,
        ..Default::default()
    })
}

/// Import a file, picking the format from its extension
pub fn import_path(path: &Path) -> ImportResult<RecordImport> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => import_json(path),
        Some(ext) if ext.eq_ignore_ascii_case("csv") => import_csv(path),
        _ => Err(ImportError::Parse(format!(
            "unsupported input format: {}",
            path.display()
        ))),
    }
}

//! Feature Extractor
//!
//! Resamples raw `DomainRecord`s onto a fixed granularity, one series per
//! `(domain, metric)`. The aggregation policy of each metric comes from the
//! configured table; it is never inferred from the data.
//!
//! Periods without records stay in the series as explicit gaps (`None`).
//! Zero is a valid value and is never used as filler.

use crate::analysis::error::{AnalysisError, AnalysisResult, Omission, Stage};
use crate::config::FeatureConfig;
use crate::records::{is_representable, DomainRecord, Granularity, SeriesKey};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

/// One sampling period of a feature series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    /// Period start (ms)
    pub timestamp: i64,
    /// Aggregated value, `None` for a gap
    pub value: Option<f64>,
}

/// A regularly sampled signal derived from one record stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSeries {
    pub key: SeriesKey,
    pub granularity: Granularity,
    pub unit: String,
    /// Contiguous periods, oldest first
    pub points: Vec<SeriesPoint>,
}

impl FeatureSeries {
    pub fn new(key: SeriesKey, granularity: Granularity, points: Vec<SeriesPoint>) -> Self {
        Self {
            key,
            granularity,
            unit: String::new(),
            points,
        }
    }

    /// Build a series from consecutive values starting at `start`
    ///
    /// Values that would fall past the end of the calendar are dropped.
    pub fn from_values(
        key: SeriesKey,
        granularity: Granularity,
        start: i64,
        values: &[Option<f64>],
    ) -> Self {
        let start = granularity.truncate(start);
        let points = values
            .iter()
            .enumerate()
            .map_while(|(i, value)| {
                Some(SeriesPoint {
                    timestamp: granularity.advance(start, i as i64)?,
                    value: *value,
                })
            })
            .collect();
        Self::new(key, granularity, points)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of non-missing periods
    pub fn present_count(&self) -> usize {
        self.points.iter().filter(|p| p.value.is_some()).count()
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// Non-missing periods as `(index, timestamp, value)`
    pub fn present(&self) -> Vec<(usize, i64, f64)> {
        self.points
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.value.map(|v| (i, p.timestamp, v)))
            .collect()
    }

    /// Index of the period starting at `timestamp`
    pub fn index_of(&self, timestamp: i64) -> Option<usize> {
        self.points
            .binary_search_by_key(&timestamp, |p| p.timestamp)
            .ok()
    }

    pub fn value_at(&self, timestamp: i64) -> Option<f64> {
        self.index_of(timestamp).and_then(|i| self.points[i].value)
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.points.last().map(|p| p.timestamp)
    }

    pub fn last_present(&self) -> Option<(usize, i64, f64)> {
        self.points
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, p)| p.value.map(|v| (i, p.timestamp, v)))
    }
}

/// Output of one extraction pass
#[derive(Debug, Default)]
pub struct Extraction {
    pub series: BTreeMap<SeriesKey, FeatureSeries>,
    /// Streams skipped for this run
    pub omissions: Vec<Omission>,
}

/// Converts record streams into feature series
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Group records by stream and resample each stream
    ///
    /// Records may arrive in any order and interleaved across streams.
    /// Streams that fail extraction are reported as omissions.
    pub fn extract(&self, records: &[DomainRecord], granularity: Granularity) -> Extraction {
        let mut grouped: BTreeMap<SeriesKey, Vec<&DomainRecord>> = BTreeMap::new();
        for record in records {
            grouped.entry(record.key()).or_default().push(record);
        }

        let results: Vec<(SeriesKey, AnalysisResult<FeatureSeries>)> = grouped
            .into_par_iter()
            .map(|(key, stream)| {
                let result = self.extract_series(&key, &stream, granularity);
                (key, result)
            })
            .collect();

        let mut extraction = Extraction::default();
        for (key, result) in results {
            match result {
                Ok(series) => {
                    extraction.series.insert(key, series);
                }
                Err(e) => {
                    tracing::debug!(series = %key, error = %e, "Skipping series");
                    extraction
                        .omissions
                        .push(Omission::new(Stage::Extraction, key.to_string(), &e));
                }
            }
        }

        extraction
    }

    /// Resample one stream onto `granularity`
    pub fn extract_series(
        &self,
        key: &SeriesKey,
        stream: &[&DomainRecord],
        granularity: Granularity,
    ) -> AnalysisResult<FeatureSeries> {
        let mut usable: Vec<&DomainRecord> = stream
            .iter()
            .copied()
            .filter(|r| r.value.is_finite() && is_representable(r.timestamp))
            .collect();
        if usable.len() < stream.len() {
            tracing::debug!(
                series = %key,
                dropped = stream.len() - usable.len(),
                "Dropped records with non-finite values or out-of-range timestamps"
            );
        }
        // Stable: equal timestamps keep arrival order for last-value policies
        usable.sort_by_key(|r| r.timestamp);

        let policy = self.config.policy_for(key);
        let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
        for record in &usable {
            buckets
                .entry(granularity.truncate(record.timestamp))
                .or_default()
                .push(record.value);
        }

        if buckets.len() < self.config.min_points {
            return Err(AnalysisError::insufficient(
                key.to_string(),
                self.config.min_points,
                buckets.len(),
            ));
        }

        let (first, last) = match (buckets.keys().next(), buckets.keys().next_back()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return Err(AnalysisError::insufficient(key.to_string(), 1, 0)),
        };

        let max_periods = self.config.max_periods;
        let span_exceeded = || {
            AnalysisError::unstable(
                "resampling",
                format!("span exceeds {} {} periods", max_periods, granularity),
            )
        };

        let mut points = Vec::with_capacity(buckets.len());
        let mut period = Some(first);
        while let Some(start) = period.filter(|&p| p <= last) {
            if points.len() >= max_periods {
                return Err(span_exceeded());
            }
            let value = buckets
                .get(&start)
                .and_then(|values| policy.aggregate(values));
            points.push(SeriesPoint {
                timestamp: start,
                value,
            });
            period = granularity.advance(start, 1);
        }

        let unit = usable
            .iter()
            .map(|r| r.unit.as_str())
            .find(|u| !u.is_empty())
            .unwrap_or_default()
            .to_string();

        Ok(FeatureSeries {
            key: key.clone(),
            granularity,
            unit,
            points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Domain;

    const DAY: i64 = 24 * 3600 * 1000;
    // Jan 15, 2024 00:00 UTC
    const BASE: i64 = 1705276800000;

    fn extractor(min_points: usize) -> FeatureExtractor {
        FeatureExtractor::new(FeatureConfig {
            min_points,
            ..FeatureConfig::default()
        })
    }

    fn spend(day: i64, hour: i64, value: f64) -> DomainRecord {
        DomainRecord::new(Domain::Finance, "daily_spend", BASE + day * DAY + hour * 3600 * 1000, value)
            .unit("usd")
    }

    #[test]
    fn test_sum_policy_and_explicit_gaps() {
        let records = vec![
            spend(0, 9, 10.0),
            spend(0, 18, 5.0),
            spend(1, 12, 0.0),
            spend(3, 12, 7.5),
        ];

        let extraction = extractor(3).extract(&records, Granularity::Day);
        let series = &extraction.series[&"finance.daily_spend".parse::<SeriesKey>().unwrap()];

        assert_eq!(series.len(), 4);
        assert_eq!(series.unit, "usd");
        assert_eq!(series.values(), vec![Some(15.0), Some(0.0), None, Some(7.5)]);
        assert_eq!(series.points[2].timestamp, BASE + 2 * DAY);
        assert_eq!(series.present_count(), 3);
    }

    #[test]
    fn test_interleaved_streams_are_tolerated() {
        let mut records = Vec::new();
        for day in (0..5).rev() {
            records.push(DomainRecord::new(Domain::Health, "sleep_hours", BASE + day * DAY, 7.0 + day as f64));
            records.push(spend(day, 12, 20.0));
        }

        let extraction = extractor(5).extract(&records, Granularity::Day);
        assert_eq!(extraction.series.len(), 2);

        let sleep = &extraction.series[&"health.sleep_hours".parse::<SeriesKey>().unwrap()];
        assert_eq!(
            sleep.values(),
            vec![Some(7.0), Some(8.0), Some(9.0), Some(10.0), Some(11.0)]
        );
    }

    #[test]
    fn test_last_policy_uses_latest_record() {
        let records = vec![
            DomainRecord::new(Domain::Finance, "account_balance", BASE + 20 * 3600 * 1000, 900.0),
            DomainRecord::new(Domain::Finance, "account_balance", BASE + 3600 * 1000, 1000.0),
            DomainRecord::new(Domain::Finance, "account_balance", BASE + DAY, 850.0),
        ];

        let extraction = extractor(2).extract(&records, Granularity::Day);
        let series = extraction.series.values().next().unwrap();
        assert_eq!(series.values(), vec![Some(900.0), Some(850.0)]);
    }

    #[test]
    fn test_insufficient_series_is_omitted() {
        let records = vec![spend(0, 12, 1.0), spend(1, 12, 2.0)];

        let extraction = extractor(7).extract(&records, Granularity::Day);
        assert!(extraction.series.is_empty());
        assert_eq!(extraction.omissions.len(), 1);
        assert_eq!(extraction.omissions[0].stage, Stage::Extraction);
        assert_eq!(extraction.omissions[0].subject, "finance.daily_spend");
    }

    #[test]
    fn test_non_finite_values_are_dropped() {
        let records = vec![
            spend(0, 12, 1.0),
            spend(1, 12, f64::NAN),
            spend(2, 12, 3.0),
            spend(3, 12, f64::INFINITY),
            spend(4, 12, 5.0),
        ];

        let extraction = extractor(3).extract(&records, Granularity::Day);
        let series = extraction.series.values().next().unwrap();
        assert_eq!(series.values(), vec![Some(1.0), None, Some(3.0), None, Some(5.0)]);
    }

    #[test]
    fn test_out_of_range_timestamps_are_dropped() {
        let mut records: Vec<DomainRecord> = (0..10)
            .map(|i| {
                DomainRecord::new(Domain::Finance, "daily_spend", 9_000_000_000_000_000_000 + i, 1.0)
            })
            .collect();

        let extraction = extractor(7).extract(&records, Granularity::Month);
        assert!(extraction.series.is_empty());
        assert_eq!(extraction.omissions.len(), 1);
        assert!(extraction.omissions[0].reason.contains("Insufficient data"));

        // In-range records of the same stream survive
        records.extend((0..8).map(|day| spend(day, 12, 2.0)));
        let extraction = extractor(7).extract(&records, Granularity::Day);
        let series = extraction.series.values().next().unwrap();
        assert_eq!(series.len(), 8);
    }

    #[test]
    fn test_timestamps_near_i64_max_do_not_overflow() {
        let records: Vec<DomainRecord> = (0..10)
            .map(|i| DomainRecord::new(Domain::Finance, "daily_spend", i64::MAX - 20_000 + i, 1.0))
            .collect();

        let extraction = extractor(3).extract(&records, Granularity::Day);
        assert!(extraction.series.is_empty());
        assert_eq!(extraction.omissions.len(), 1);
    }

    #[test]
    fn test_span_beyond_period_cap_is_omitted() {
        let records: Vec<DomainRecord> = (0..10)
            .map(|i| DomainRecord::new(Domain::Finance, "daily_spend", i * 100_000_000_000_000, 1.0))
            .collect();

        let extraction = extractor(3).extract(&records, Granularity::Day);
        assert!(extraction.series.is_empty());
        assert_eq!(extraction.omissions.len(), 1);
        assert_eq!(extraction.omissions[0].stage, Stage::Extraction);
        assert!(extraction.omissions[0].reason.contains("span exceeds"));
    }

    #[test]
    fn test_span_at_period_cap_is_kept() {
        let extractor = FeatureExtractor::new(FeatureConfig {
            min_points: 3,
            max_periods: 10,
            ..FeatureConfig::default()
        });
        let records = vec![spend(0, 12, 1.0), spend(4, 12, 2.0), spend(9, 12, 3.0)];
        let extraction = extractor.extract(&records, Granularity::Day);
        assert_eq!(extraction.series.values().next().unwrap().len(), 10);

        let records = vec![spend(0, 12, 1.0), spend(4, 12, 2.0), spend(10, 12, 3.0)];
        let extraction = extractor.extract(&records, Granularity::Day);
        assert!(extraction.series.is_empty());
    }

    #[test]
    fn test_series_lookup_helpers() {
        let key: SeriesKey = "health.steps".parse().unwrap();
        let series = FeatureSeries::from_values(
            key,
            Granularity::Day,
            BASE + 5 * 3600 * 1000,
            &[Some(1.0), None, Some(3.0), None],
        );

        assert_eq!(series.points[0].timestamp, BASE);
        assert_eq!(series.value_at(BASE + 2 * DAY), Some(3.0));
        assert_eq!(series.value_at(BASE + DAY), None);
        assert_eq!(series.last_present(), Some((2, BASE + 2 * DAY, 3.0)));
        assert_eq!(series.last_timestamp(), Some(BASE + 3 * DAY));
    }
}

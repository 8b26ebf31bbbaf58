//! Digest windows
//!
//! Presets resolve against a reference instant (`as_of`) and always end at
//! the close of the day containing it:
//!
//! ```text
//! daily                    the day containing as_of
//! weekly                   the 7 days ending with that day
//! monthly                  one calendar month ending with that day
//! last:<n>d                the n days ending with that day
//! 2024-01-01..2024-01-31   explicit dates, both days included
//! ```

use crate::records::{Granularity, TimeRange};
use chrono::{Months, NaiveDate, TimeZone, Utc};
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case},
    character::complete::{char, digit1, multispace0},
    combinator::{map_res, recognize, value},
    sequence::{delimited, separated_pair, tuple},
    IResult,
};
use serde::Serialize;
use std::str::FromStr;

const DAY_MS: i64 = 24 * 3600 * 1000;

/// Window an insight digest covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestWindow {
    Daily,
    #[default]
    Weekly,
    Monthly,
    /// The last n days
    LastDays(u32),
    /// Explicit half-open range
    Custom(TimeRange),
}

impl DigestWindow {
    /// Concrete range for the reference instant `as_of`
    ///
    /// Custom windows ignore `as_of`.
    pub fn resolve(&self, as_of: i64) -> TimeRange {
        let day_start = Granularity::Day.truncate(as_of);
        let end = Granularity::Day
            .advance(day_start, 1)
            .unwrap_or(day_start.saturating_add(DAY_MS));
        let start = match self {
            DigestWindow::Daily => end - DAY_MS,
            DigestWindow::Weekly => end - 7 * DAY_MS,
            DigestWindow::LastDays(days) => end - i64::from(*days) * DAY_MS,
            DigestWindow::Monthly => match Utc.timestamp_millis_opt(end) {
                chrono::LocalResult::Single(dt) => dt
                    .checked_sub_months(Months::new(1))
                    .map(|d| d.timestamp_millis())
                    .unwrap_or(end - 30 * DAY_MS),
                _ => end - 30 * DAY_MS,
            },
            DigestWindow::Custom(range) => return *range,
        };
        TimeRange { start, end }
    }

    pub fn label(&self) -> String {
        match self {
            DigestWindow::Daily => "daily".to_string(),
            DigestWindow::Weekly => "weekly".to_string(),
            DigestWindow::Monthly => "monthly".to_string(),
            DigestWindow::LastDays(days) => format!("last:{}d", days),
            DigestWindow::Custom(range) => format!("custom:{}..{}", range.start, range.end),
        }
    }
}

impl FromStr for DigestWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_window(s)
    }
}

/// Parse a window expression
pub fn parse_window(input: &str) -> Result<DigestWindow, String> {
    match delimited(multispace0, window, multispace0)(input) {
        Ok(("", window)) => Ok(window),
        Ok((rest, _)) => Err(format!("Unexpected input after window: '{}'", rest)),
        Err(e) => Err(format!("Invalid window '{}': {:?}", input.trim(), e)),
    }
}

fn window(input: &str) -> IResult<&str, DigestWindow> {
    alt((date_range, last_days, preset))(input)
}

fn preset(input: &str) -> IResult<&str, DigestWindow> {
    alt((
        value(DigestWindow::Daily, alt((tag_no_case("daily"), tag_no_case("day")))),
        value(DigestWindow::Weekly, alt((tag_no_case("weekly"), tag_no_case("week")))),
        value(DigestWindow::Monthly, alt((tag_no_case("monthly"), tag_no_case("month")))),
    ))(input)
}

/// `last:7d`
fn last_days(input: &str) -> IResult<&str, DigestWindow> {
    map_res(
        delimited(tag_no_case("last:"), digit1, tag_no_case("d")),
        |digits: &str| match digits.parse::<u32>() {
            Ok(0) => Err("window must cover at least one day".to_string()),
            Ok(days) => Ok(DigestWindow::LastDays(days)),
            Err(e) => Err(e.to_string()),
        },
    )(input)
}

/// `2024-01-01..2024-01-31`, end day included
fn date_range(input: &str) -> IResult<&str, DigestWindow> {
    map_res(separated_pair(date, tag(".."), date), |(first, last)| {
        if last < first {
            return Err(format!("window ends ({}) before it starts ({})", last, first));
        }
        let start = day_start(first);
        let end = day_start(last) + DAY_MS;
        TimeRange::try_new(start, end)
            .map(DigestWindow::Custom)
            .ok_or_else(|| "empty window".to_string())
    })(input)
}

fn date(input: &str) -> IResult<&str, NaiveDate> {
    map_res(
        recognize(tuple((digit1, char('-'), digit1, char('-'), digit1))),
        |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d"),
    )(input)
}

fn day_start(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Wed, Jan 17, 2024 15:30 UTC
    const AS_OF: i64 = 1705505400000;
    // Thu, Jan 18, 2024 00:00 UTC
    const DAY_END: i64 = 1705536000000;

    #[test]
    fn test_parse_presets() {
        assert_eq!(parse_window("daily").unwrap(), DigestWindow::Daily);
        assert_eq!(parse_window("Weekly").unwrap(), DigestWindow::Weekly);
        assert_eq!(parse_window(" month ").unwrap(), DigestWindow::Monthly);
        assert_eq!(parse_window("last:14d").unwrap(), DigestWindow::LastDays(14));
    }

    #[test]
    fn test_parse_date_range() {
        let window = parse_window("2024-01-01..2024-01-31").unwrap();
        assert_eq!(
            window,
            DigestWindow::Custom(TimeRange {
                start: 1704067200000,
                end: 1706745600000,
            })
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_window("fortnightly").is_err());
        assert!(parse_window("last:0d").is_err());
        assert!(parse_window("2024-02-01..2024-01-01").is_err());
        assert!(parse_window("2024-13-01..2024-12-01").is_err());
        assert!(parse_window("daily please").is_err());
    }

    #[test]
    fn test_resolve_presets() {
        let daily = DigestWindow::Daily.resolve(AS_OF);
        assert_eq!(daily.end, DAY_END);
        assert_eq!(daily.duration_millis(), DAY_MS);
        assert!(daily.contains(AS_OF));

        let weekly = DigestWindow::Weekly.resolve(AS_OF);
        assert_eq!(weekly.start, DAY_END - 7 * DAY_MS);

        // Dec 18, 2023 00:00 UTC
        let monthly = DigestWindow::Monthly.resolve(AS_OF);
        assert_eq!(monthly.start, 1702857600000);
        assert_eq!(monthly.end, DAY_END);

        let last = DigestWindow::LastDays(3).resolve(AS_OF);
        assert_eq!(last.start, DAY_END - 3 * DAY_MS);
    }

    #[test]
    fn test_custom_ignores_reference() {
        let range = TimeRange {
            start: 10,
            end: 20,
        };
        assert_eq!(DigestWindow::Custom(range).resolve(AS_OF), range);
        assert_eq!(DigestWindow::LastDays(5).label(), "last:5d");
    }
}

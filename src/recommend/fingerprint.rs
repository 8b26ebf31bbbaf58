//! Deterministic recommendation identity
//!
//! Both functions depend only on the rule name and the identities of the
//! triggering signals, never on their order or on computed float values.
//! Re-running the same batch yields the same fingerprints and dedup keys.

use super::types::Signal;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Hex SHA-256 over the rule name and the sorted signal identities
pub fn fingerprint(rule: &str, signals: &[Signal]) -> String {
    let identities: BTreeSet<String> = signals.iter().map(Signal::identity).collect();

    let mut hasher = Sha256::new();
    hasher.update(rule.as_bytes());
    for identity in &identities {
        hasher.update(b"\n");
        hasher.update(identity.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Rule name plus the sorted series involved
///
/// Anomalies also contribute their direction, so a spike and a drop on the
/// same series stay separate. Timestamps never take part, which lets a
/// repeated finding collapse across runs.
pub fn dedup_key(rule: &str, signals: &[Signal]) -> String {
    let mut parts: BTreeSet<String> = BTreeSet::new();
    for signal in signals {
        for key in signal.series() {
            parts.insert(key.to_string());
        }
        if let Signal::Anomaly(event) = signal {
            parts.insert(format!("{}:{}", event.key, event.direction.as_str()));
        }
    }

    let mut key = rule.to_string();
    for part in parts {
        key.push('|');
        key.push_str(&part);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnomalyDirection, AnomalyEvent, Pattern, PatternKind, PatternWindow};

    const BASE: i64 = 1704067200000;
    const DAY: i64 = 24 * 3600 * 1000;

    fn anomaly(timestamp: i64, observed: f64) -> Signal {
        Signal::Anomaly(AnomalyEvent {
            key: "health.sleep_hours".parse().unwrap(),
            timestamp,
            observed,
            expected_low: 6.0,
            expected_high: 9.0,
            deviation: 5.0,
            severity: 0.6,
            direction: AnomalyDirection::Below,
        })
    }

    fn trend() -> Signal {
        Signal::Pattern(Pattern {
            key: "calendar.meeting_minutes".parse().unwrap(),
            kind: PatternKind::TrendUp,
            strength: 0.8,
            window: PatternWindow {
                start: BASE,
                end: BASE + 20 * DAY,
                period: None,
            },
            first_seen: BASE,
            last_seen: BASE + 19 * DAY,
            rate: Some(12.0),
        })
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = fingerprint("burnout_risk", &[anomaly(BASE, 4.0), trend()]);
        let b = fingerprint("burnout_risk", &[trend(), anomaly(BASE, 4.0)]);

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_tracks_signal_set_and_rule() {
        let base = fingerprint("anomaly_spike", &[anomaly(BASE, 4.0)]);

        assert_eq!(base, fingerprint("anomaly_spike", &[anomaly(BASE, 3.5)]));
        assert_ne!(base, fingerprint("anomaly_spike", &[anomaly(BASE + DAY, 4.0)]));
        assert_ne!(base, fingerprint("burnout_risk", &[anomaly(BASE, 4.0)]));
    }

    #[test]
    fn test_dedup_key_ignores_timestamps() {
        let first = dedup_key("anomaly_spike", &[anomaly(BASE, 4.0)]);
        let later = dedup_key("anomaly_spike", &[anomaly(BASE + 2 * DAY, 3.0)]);

        assert_eq!(first, later);
        assert_eq!(
            first,
            "anomaly_spike|health.sleep_hours|health.sleep_hours:below"
        );
    }

    #[test]
    fn test_dedup_key_sorts_series() {
        let key = dedup_key("burnout_risk", &[trend(), anomaly(BASE, 4.0)]);
        assert_eq!(
            key,
            "burnout_risk|calendar.meeting_minutes|health.sleep_hours|health.sleep_hours:below"
        );
    }
}

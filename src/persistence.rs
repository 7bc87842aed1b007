//! Daily runtime history persistence
//!
//! The generator's accumulated daily runtime is not kept in a private file on
//! disk; it round-trips through the Settings service's `AccumulatedDaily`
//! string exactly the way the original implementation stored it: a JSON object
//! mapping the Unix timestamp of local midnight (as a decimal string) to the
//! number of seconds the generator ran that day, capped at the most recent 30
//! days. This module is the codec for that string plus the in-memory
//! accumulator the controller updates once per tick.

use crate::error::Result;
use std::collections::BTreeMap;

/// Maximum number of days of history retained in `AccumulatedDaily`.
pub const MAX_HISTORY_DAYS: usize = 30;

/// Parsed/accumulated view of a generator instance's daily runtime history.
///
/// Keyed by the Unix timestamp of local midnight for the day in question,
/// valued by accumulated running seconds for that day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailyHistory {
    days: BTreeMap<i64, u64>,
}

impl DailyHistory {
    /// An empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `AccumulatedDaily` settings value. An empty or unparsable
    /// string is treated as an empty history rather than an error, matching
    /// the tolerant behavior of a freshly provisioned settings node.
    pub fn from_json_str(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::new();
        }

        let parsed: Result<BTreeMap<String, u64>> =
            serde_json::from_str(raw).map_err(Into::into);

        let days = match parsed {
            Ok(map) => map
                .into_iter()
                .filter_map(|(k, v)| k.parse::<i64>().ok().map(|ts| (ts, v)))
                .collect(),
            Err(_) => BTreeMap::new(),
        };

        Self { days }
    }

    /// Serialize back to the `{"<unix_midnight>": seconds}` shape, string
    /// keys and all, so the value round-trips byte-for-byte with what the
    /// original implementation would have written.
    pub fn to_json_string(&self) -> Result<String> {
        let string_keyed: BTreeMap<String, u64> = self
            .days
            .iter()
            .map(|(ts, secs)| (ts.to_string(), *secs))
            .collect();
        Ok(serde_json::to_string(&string_keyed)?)
    }

    /// Seconds recorded for a given local-midnight timestamp, or 0.
    pub fn seconds_for_day(&self, midnight_ts: i64) -> u64 {
        self.days.get(&midnight_ts).copied().unwrap_or(0)
    }

    /// Total accumulated seconds across all retained days.
    pub fn total_seconds(&self) -> u64 {
        self.days.values().sum()
    }

    /// Add `seconds` of runtime to the entry for `midnight_ts`, creating it if
    /// needed, then prune to the most recent [`MAX_HISTORY_DAYS`] entries.
    pub fn add_runtime(&mut self, midnight_ts: i64, seconds: u64) {
        *self.days.entry(midnight_ts).or_insert(0) += seconds;
        self.prune();
    }

    /// Overwrite today's entry outright (used when the controller recomputes
    /// the running total for the in-progress day rather than accumulating).
    pub fn set_day(&mut self, midnight_ts: i64, seconds: u64) {
        self.days.insert(midnight_ts, seconds);
        self.prune();
    }

    fn prune(&mut self) {
        while self.days.len() > MAX_HISTORY_DAYS {
            if let Some(&oldest) = self.days.keys().next() {
                self.days.remove(&oldest);
            } else {
                break;
            }
        }
    }

    /// Iterate over (midnight_ts, seconds) pairs, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (i64, u64)> + '_ {
        self.days.iter().map(|(k, v)| (*k, *v))
    }

    /// Number of distinct days retained.
    pub fn len(&self) -> usize {
        self.days.len()
    }

    /// Whether no days are retained.
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string_is_empty_history() {
        let history = DailyHistory::from_json_str("");
        assert!(history.is_empty());
        assert_eq!(history.total_seconds(), 0);
    }

    #[test]
    fn test_roundtrip_shape_matches_original() {
        let raw = r#"{"1700000000": 120}"#;
        let history = DailyHistory::from_json_str(raw);
        assert_eq!(history.seconds_for_day(1_700_000_000), 120);

        let out = history.to_json_string().unwrap();
        assert_eq!(out, raw.replace(' ', ""));
    }

    #[test]
    fn test_add_runtime_accumulates() {
        let mut history = DailyHistory::new();
        history.add_runtime(1_700_000_000, 30);
        history.add_runtime(1_700_000_000, 45);
        assert_eq!(history.seconds_for_day(1_700_000_000), 75);
    }

    #[test]
    fn test_prune_keeps_most_recent_30_days() {
        let mut history = DailyHistory::new();
        for day in 0..40i64 {
            history.set_day(day * 86_400, 60);
        }
        assert_eq!(history.len(), MAX_HISTORY_DAYS);
        // the oldest 10 days should have been evicted
        assert_eq!(history.seconds_for_day(0), 0);
        assert_eq!(history.seconds_for_day(39 * 86_400), 60);
    }

    #[test]
    fn test_malformed_json_treated_as_empty() {
        let history = DailyHistory::from_json_str("not json");
        assert!(history.is_empty());
    }
}

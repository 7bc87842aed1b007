//! Statistics & accumulators (§4.6): daily and lifetime runtime seconds.
//!
//! The in-progress day's seconds live only in memory; they're folded into
//! the [`crate::persistence::DailyHistory`] exactly at local midnight, the
//! same point at which the original implementation rotated its JSON blob.

use crate::persistence::DailyHistory;

/// Accumulates runtime for one generator instance across ticks.
#[derive(Debug, Clone)]
pub struct Statistics {
    history: DailyHistory,
    accumulated_runtime_s: u64,
    daily_runtime_s: f64,
    current_midnight_ts: Option<i64>,
}

impl Statistics {
    /// Restore from the persisted `AccumulatedDaily` JSON blob and lifetime
    /// counter (§6 `/AccumulatedRuntime`).
    pub fn load(daily_raw: &str, accumulated_runtime_s: u64) -> Self {
        Self {
            history: DailyHistory::from_json_str(daily_raw),
            accumulated_runtime_s,
            daily_runtime_s: 0.0,
            current_midnight_ts: None,
        }
    }

    /// Runtime recorded for `midnight_ts` (yesterday, typically, for the
    /// test-run scheduler's `SkipRuntime` check).
    pub fn seconds_for_day(&self, midnight_ts: i64) -> u64 {
        self.history.seconds_for_day(midnight_ts)
    }

    pub fn daily_runtime_seconds(&self) -> u64 {
        self.daily_runtime_s.round() as u64
    }

    pub fn accumulated_runtime_seconds(&self) -> u64 {
        self.accumulated_runtime_s
    }

    /// Advance by `delta_secs` of wall-clock time, crediting it to the
    /// running total if `running`. `today_midnight_ts` is the Unix
    /// timestamp of local midnight as of this tick; a change since the last
    /// tick triggers the midnight rollover. Returns `true` if a rollover
    /// happened (callers use this to decide whether to persist).
    pub fn tick(&mut self, today_midnight_ts: i64, running: bool, delta_secs: f64) -> bool {
        let mut rolled_over = false;
        match self.current_midnight_ts {
            None => self.current_midnight_ts = Some(today_midnight_ts),
            Some(prev) if prev != today_midnight_ts => {
                self.history.add_runtime(prev, self.daily_runtime_seconds());
                self.daily_runtime_s = 0.0;
                self.current_midnight_ts = Some(today_midnight_ts);
                rolled_over = true;
            }
            _ => {}
        }

        if running && delta_secs > 0.0 {
            self.daily_runtime_s += delta_secs;
            self.accumulated_runtime_s += delta_secs.round() as u64;
        }

        rolled_over
    }

    /// Serialized `AccumulatedDaily` value, ready to persist.
    pub fn daily_history_json(&self) -> crate::error::Result<String> {
        self.history.to_json_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_while_running() {
        let mut stats = Statistics::load("", 0);
        stats.tick(1_000, true, 1.0);
        stats.tick(1_000, true, 1.0);
        stats.tick(1_000, false, 1.0);
        assert_eq!(stats.daily_runtime_seconds(), 2);
        assert_eq!(stats.accumulated_runtime_seconds(), 2);
    }

    #[test]
    fn test_midnight_rollover_flushes_to_history() {
        let mut stats = Statistics::load("", 0);
        stats.tick(1_000, true, 30.0);
        let rolled = stats.tick(87_400, true, 1.0);
        assert!(rolled);
        assert_eq!(stats.seconds_for_day(1_000), 30);
        assert_eq!(stats.daily_runtime_seconds(), 1);
    }

    #[test]
    fn test_restores_from_json() {
        let stats = Statistics::load(r#"{"1700000000": 120}"#, 500);
        assert_eq!(stats.seconds_for_day(1_700_000_000), 120);
        assert_eq!(stats.accumulated_runtime_seconds(), 500);
    }
}

//! Test-Run Scheduler (§4.5): a time-driven condition that votes start at a
//! configured local instant and stops on duration elapsed or (optionally)
//! battery-full, independent of any telemetry threshold.

use crate::conditions::Vote;
use chrono::{DateTime, NaiveDate, TimeZone, Timelike};
use std::time::{Duration, Instant};

/// Resolved `TestRun/*` settings for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct TestRunSettings {
    pub enabled: bool,
    /// `StartDate`, in whole days since the Unix epoch.
    pub start_date_days: i64,
    /// `StartTime`, seconds since local midnight.
    pub start_time_s: i64,
    pub interval_days: i64,
    pub duration_s: i64,
    pub skip_runtime_s: i64,
    pub run_till_battery_full: bool,
}

/// Days since 1970-01-01 for a local calendar date, matching the epoch-day
/// convention `StartDate` is stored in.
fn days_since_epoch(date: NaiveDate) -> i64 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    (date - epoch).num_days()
}

/// Mutable scheduler state, created once at settings-load time.
#[derive(Debug, Clone, Default)]
pub struct TestRunState {
    active: bool,
    started_at: Option<Instant>,
    /// Epoch-day already evaluated today, so a 1 Hz tick loop doesn't
    /// re-fire (or re-skip) repeatedly past the scheduled instant.
    evaluated_day: Option<i64>,
}

impl TestRunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Evaluate one tick. `yesterday_runtime_s` is the accumulated runtime
    /// recorded for the previous local day (for `SkipRuntime`); `soc` is the
    /// current battery state of charge, if known.
    pub fn tick<Tz: TimeZone>(
        &mut self,
        now: Instant,
        local_now: &DateTime<Tz>,
        settings: &TestRunSettings,
        yesterday_runtime_s: u64,
        soc: Option<f64>,
    ) -> Vote {
        if !settings.enabled {
            self.active = false;
            self.started_at = None;
            return Vote::Indifferent;
        }

        if self.active {
            if settings.run_till_battery_full {
                if soc.is_some_and(|s| s >= 100.0) {
                    self.active = false;
                    self.started_at = None;
                    return Vote::Stop;
                }
                return Vote::Start;
            }
            let elapsed = self
                .started_at
                .map(|since| now.saturating_duration_since(since))
                .unwrap_or_default();
            if elapsed >= Duration::from_secs(settings.duration_s.max(0) as u64) {
                self.active = false;
                self.started_at = None;
                return Vote::Stop;
            }
            return Vote::Start;
        }

        if settings.interval_days <= 0 {
            return Vote::Indifferent;
        }

        let today = days_since_epoch(local_now.date_naive());
        let seconds_since_midnight = local_now.num_seconds_from_midnight() as i64;

        let due_today = today >= settings.start_date_days
            && (today - settings.start_date_days) % settings.interval_days == 0;

        if !due_today || seconds_since_midnight < settings.start_time_s {
            return Vote::Indifferent;
        }

        if self.evaluated_day == Some(today) {
            return Vote::Indifferent;
        }
        self.evaluated_day = Some(today);

        if yesterday_runtime_s as i64 > settings.skip_runtime_s {
            return Vote::Indifferent;
        }

        if settings.run_till_battery_full && soc.is_some_and(|s| s >= 100.0) {
            return Vote::Indifferent;
        }

        self.active = true;
        self.started_at = Some(now);
        Vote::Start
    }
}

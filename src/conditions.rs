//! Condition evaluators (§4.3): tri-state start/stop votes with debounce.
//!
//! Each threshold-based condition (`soc`, `acload`, `batterycurrent`,
//! `batteryvoltage`, and the two alarm conditions) shares the same
//! hysteresis shape: while not yet requesting start, watch the start
//! predicate and debounce on `start_timer_s`; once requesting start, watch
//! the stop predicate and debounce on `stop_timer_s` before relinquishing.
//! `testrun` has its own schedule-driven shape and lives in [`crate::scheduler`].

use std::time::{Duration, Instant};

/// A condition's tri-state vote for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Start,
    Stop,
    Indifferent,
}

/// The seven condition kinds, in the fixed priority order used to pick
/// `running_by_condition` (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionKind {
    Soc,
    AcLoad,
    BatteryCurrent,
    BatteryVoltage,
    InverterHighTemp,
    InverterOverload,
    TestRun,
}

impl ConditionKind {
    /// Fixed evaluation/priority order (§4.3).
    pub const PRIORITY_ORDER: [ConditionKind; 7] = [
        ConditionKind::Soc,
        ConditionKind::AcLoad,
        ConditionKind::BatteryCurrent,
        ConditionKind::BatteryVoltage,
        ConditionKind::InverterHighTemp,
        ConditionKind::InverterOverload,
        ConditionKind::TestRun,
    ];

    /// The settings short-name prefix under `Generator{N}/...`, or `None`
    /// for conditions that don't read the threshold registry (`testrun`,
    /// handled by the scheduler).
    pub fn settings_prefix(self) -> Option<&'static str> {
        match self {
            ConditionKind::Soc => Some("Soc"),
            ConditionKind::AcLoad => Some("AcLoad"),
            ConditionKind::BatteryCurrent => Some("BatteryCurrent"),
            ConditionKind::BatteryVoltage => Some("BatteryVoltage"),
            ConditionKind::InverterHighTemp => Some("InverterHighTemp"),
            ConditionKind::InverterOverload => Some("InverterOverload"),
            ConditionKind::TestRun => None,
        }
    }

    /// The published `/RunningByCondition` tag (§6).
    pub fn tag(self) -> &'static str {
        match self {
            ConditionKind::Soc => "soc",
            ConditionKind::AcLoad => "acload",
            ConditionKind::BatteryCurrent => "batterycurrent",
            ConditionKind::BatteryVoltage => "batteryvoltage",
            ConditionKind::InverterHighTemp => "inverterhightemp",
            ConditionKind::InverterOverload => "inverteroverload",
            ConditionKind::TestRun => "testrun",
        }
    }

    /// Whether this kind has a quiet-hours start/stop threshold override.
    /// The two alarm conditions don't (they have no threshold at all).
    pub fn has_quiet_hours_values(self) -> bool {
        matches!(
            self,
            ConditionKind::Soc
                | ConditionKind::AcLoad
                | ConditionKind::BatteryCurrent
                | ConditionKind::BatteryVoltage
        )
    }
}

/// Resolved thresholds for one evaluation, after quiet-hours substitution.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub start_value: f64,
    pub stop_value: f64,
    pub start_timer: Duration,
    pub stop_timer: Duration,
}

/// Mutable per-tick state for one threshold-based condition (§3 "Condition
/// record"). Lives for the process lifetime once created at settings-load
/// time.
#[derive(Debug, Clone)]
pub struct ConditionState {
    kind: ConditionKind,
    /// Hysteresis latch: once true, the condition is currently justifying
    /// (or trying to justify) a RUNNING state and is watching the stop
    /// predicate instead of the start predicate.
    requesting_start: bool,
    /// Monotonic instant the currently-tracked predicate first became true,
    /// cleared whenever it goes false or inputs become invalid.
    reached_since: Option<Instant>,
    valid: bool,
}

impl ConditionState {
    pub fn new(kind: ConditionKind) -> Self {
        Self {
            kind,
            requesting_start: false,
            reached_since: None,
            valid: false,
        }
    }

    pub fn kind(&self) -> ConditionKind {
        self.kind
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Whether this condition is currently the one holding the generator
    /// running (i.e. it would contribute `Vote::Start` or has not yet
    /// relinquished via `Vote::Stop`).
    pub fn is_requesting_start(&self) -> bool {
        self.requesting_start
    }

    /// Force-clear the latch, e.g. when the condition is disabled or the
    /// generator transitions to STOPPED by some other means.
    pub fn reset(&mut self) {
        self.requesting_start = false;
        self.reached_since = None;
        self.valid = false;
    }

    /// Evaluate one tick. `input` is the raw measurement (already
    /// sign-adjusted per kind), `None` meaning the telemetry is invalid or
    /// absent. `start_pred`/`stop_pred` compare the raw value against the
    /// resolved threshold.
    pub fn tick(
        &mut self,
        now: Instant,
        enabled: bool,
        input: Option<f64>,
        thresholds: Thresholds,
        start_pred: impl Fn(f64, f64) -> bool,
        stop_pred: impl Fn(f64, f64) -> bool,
    ) -> Vote {
        if !enabled {
            self.reached_since = None;
            self.valid = false;
            return Vote::Indifferent;
        }

        let Some(value) = input else {
            self.reached_since = None;
            self.valid = false;
            return Vote::Indifferent;
        };
        self.valid = true;

        if !self.requesting_start {
            let raw = start_pred(value, thresholds.start_value);
            if raw {
                let since = *self.reached_since.get_or_insert(now);
                if now.saturating_duration_since(since) >= thresholds.start_timer {
                    self.requesting_start = true;
                    self.reached_since = None;
                    return Vote::Start;
                }
                Vote::Indifferent
            } else {
                self.reached_since = None;
                Vote::Indifferent
            }
        } else {
            let raw = stop_pred(value, thresholds.stop_value);
            if raw {
                let since = *self.reached_since.get_or_insert(now);
                if now.saturating_duration_since(since) >= thresholds.stop_timer {
                    self.requesting_start = false;
                    self.reached_since = None;
                    return Vote::Stop;
                }
                Vote::Start
            } else {
                self.reached_since = None;
                Vote::Start
            }
        }
    }
}

/// `soc ≤ StartValue` / `soc ≥ StopValue`.
pub fn soc_start(value: f64, threshold: f64) -> bool {
    value <= threshold
}
pub fn soc_stop(value: f64, threshold: f64) -> bool {
    value >= threshold
}

/// `P ≥ StartValue` / `P ≤ StopValue`.
pub fn acload_start(value: f64, threshold: f64) -> bool {
    value >= threshold
}
pub fn acload_stop(value: f64, threshold: f64) -> bool {
    value <= threshold
}

/// `−I ≥ StartValue` / `−I ≤ StopValue` (input already sign-flipped).
pub fn batterycurrent_start(value: f64, threshold: f64) -> bool {
    value >= threshold
}
pub fn batterycurrent_stop(value: f64, threshold: f64) -> bool {
    value <= threshold
}

/// `V ≤ StartValue` / `V ≥ StopValue`.
pub fn batteryvoltage_start(value: f64, threshold: f64) -> bool {
    value <= threshold
}
pub fn batteryvoltage_stop(value: f64, threshold: f64) -> bool {
    value >= threshold
}

/// Alarm conditions: input is `1.0`/`0.0`; thresholds are unused.
pub fn alarm_start(value: f64, _threshold: f64) -> bool {
    value >= 1.0
}
pub fn alarm_stop(value: f64, _threshold: f64) -> bool {
    value < 1.0
}

//! Generator state machine (§4.4): consumes condition votes, manual start,
//! auto-start-enable, minimum-runtime, communication-loss policy, and
//! hardware error signals, and produces a commanded state plus reason tag.

use crate::bus::{BusMonitor, Value};
use crate::conditions::{
    ConditionKind, ConditionState, Thresholds, Vote, acload_start, acload_stop, alarm_start,
    alarm_stop, batterycurrent_start, batterycurrent_stop, batteryvoltage_start,
    batteryvoltage_stop, soc_start, soc_stop,
};
use crate::error::Result;
use crate::quiet_hours;
use crate::scheduler::{TestRunSettings, TestRunState};
use crate::settings::SettingsMirror;
use crate::statistics::Statistics;
use crate::telemetry::{AcLoadMode, InverterAlarm, Telemetry};
use chrono::{DateTime, TimeZone, Timelike};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Commanded generator state (§2, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Stopped,
    Running,
    Warmup,
    Cooldown,
    Error,
}

impl GeneratorState {
    pub fn as_i64(self) -> i64 {
        match self {
            GeneratorState::Stopped => 0,
            GeneratorState::Running => 1,
            GeneratorState::Warmup => 2,
            GeneratorState::Cooldown => 3,
            GeneratorState::Error => 4,
        }
    }

    fn wants_start_published(self) -> bool {
        matches!(self, GeneratorState::Running | GeneratorState::Warmup)
    }
}

/// Error taxonomy (§7), published as `/Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    None,
    RemoteInFault,
    RemoteDisabled,
    RemoteIncompatible,
}

impl ErrorKind {
    pub fn as_i64(self) -> i64 {
        match self {
            ErrorKind::None => 0,
            ErrorKind::RemoteInFault => 1,
            ErrorKind::RemoteDisabled => 2,
            ErrorKind::RemoteIncompatible => 3,
        }
    }
}

/// `/Alarms/NoGeneratorAtAcIn` (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoGenAlarm {
    Ok,
    Armed,
    Fired,
}

impl NoGenAlarm {
    pub fn as_i64(self) -> i64 {
        match self {
            NoGenAlarm::Ok => 0,
            NoGenAlarm::Armed => 1,
            NoGenAlarm::Fired => 2,
        }
    }
}

/// What currently justifies (or last justified) RUNNING, published as
/// `/RunningByCondition` (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunningReason {
    Condition(ConditionKind),
    Manual,
    LossOfCommunication,
}

impl RunningReason {
    pub fn tag(&self) -> &'static str {
        match self {
            RunningReason::Condition(k) => k.tag(),
            RunningReason::Manual => "manual",
            RunningReason::LossOfCommunication => "lossofcommunication",
        }
    }
}

const COMM_LOSS_THRESHOLD: Duration = Duration::from_secs(5 * 60);
const NO_GEN_ALARM_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// One generator instance's full mutable record (§3 "Generator record").
pub struct Generator {
    instance: &'static str,
    own_service: String,
    /// `Some` for the CAN-connected Fischer-Panda instance.
    genset_service: Option<String>,
    /// The real bus service name backing `/AutoSelectedBatteryMeasurement`,
    /// resolved by the controller via device-instance lookup and refreshed
    /// every tick (§4.1).
    battery_service: Option<String>,

    conditions: HashMap<ConditionKind, ConditionState>,
    testrun: TestRunState,
    statistics: Statistics,

    state: GeneratorState,
    running_since: Option<Instant>,
    running_by_condition: Option<RunningReason>,
    error: ErrorKind,
    no_gen_alarm: NoGenAlarm,
    transition_deadline: Option<Instant>,
    comm_loss_since: Option<Instant>,
    last_tick: Option<Instant>,
    last_soc: Option<f64>,
}

impl Generator {
    pub async fn new(
        instance: &'static str,
        own_service: String,
        genset_service: Option<String>,
        settings: &dyn SettingsMirror,
    ) -> Self {
        let mut conditions = HashMap::new();
        for kind in ConditionKind::PRIORITY_ORDER {
            if kind != ConditionKind::TestRun {
                conditions.insert(kind, ConditionState::new(kind));
            }
        }

        let daily_raw = settings
            .get(&format!("{instance}/AccumulatedDaily"))
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let accumulated = settings.get_i64(&format!("{instance}/AccumulatedRuntime"), 0).max(0) as u64;

        Self {
            instance,
            own_service,
            genset_service,
            battery_service: None,
            conditions,
            testrun: TestRunState::new(),
            statistics: Statistics::load(&daily_raw, accumulated),
            state: GeneratorState::Stopped,
            running_since: None,
            running_by_condition: None,
            error: ErrorKind::None,
            no_gen_alarm: NoGenAlarm::Ok,
            transition_deadline: None,
            comm_loss_since: None,
            last_tick: None,
            last_soc: None,
        }
    }

    pub fn state(&self) -> GeneratorState {
        self.state
    }

    pub fn running_by_condition_tag(&self) -> &'static str {
        self.running_by_condition.as_ref().map(RunningReason::tag).unwrap_or("")
    }

    pub fn error(&self) -> ErrorKind {
        self.error
    }

    /// Update the discovered CAN genset service backing this instance, or
    /// clear it if the device has disappeared from the bus. `None` for the
    /// relay-controlled `Generator0` instance, which has no genset peer.
    pub fn set_genset_service(&mut self, service: Option<String>) {
        self.genset_service = service;
    }

    /// Update the resolved battery service backing
    /// `/AutoSelectedBatteryMeasurement`, or clear it if the device-instance
    /// lookup no longer matches any known service.
    pub fn set_battery_service(&mut self, service: Option<String>) {
        self.battery_service = service;
    }

    fn path(&self, leaf: &str) -> String {
        format!("/{}/{leaf}", self.instance)
    }

    fn sn(&self, suffix: &str) -> String {
        format!("{}/{suffix}", self.instance)
    }

    fn thresholds(&self, settings: &dyn SettingsMirror, kind: ConditionKind, quiet_active: bool) -> Thresholds {
        let prefix = kind.settings_prefix().unwrap_or("");
        let mut start_value = settings.get_f64(&self.sn(&format!("{prefix}/StartValue")), 0.0);
        let mut stop_value = settings.get_f64(&self.sn(&format!("{prefix}/StopValue")), 0.0);
        if quiet_active && kind.has_quiet_hours_values() {
            start_value = settings.get_f64(&self.sn(&format!("{prefix}/QuietHoursStartValue")), start_value);
            stop_value = settings.get_f64(&self.sn(&format!("{prefix}/QuietHoursStopValue")), stop_value);
        }
        let start_timer =
            Duration::from_secs_f64(settings.get_f64(&self.sn(&format!("{prefix}/StartTimer")), 0.0).max(0.0));
        let stop_timer =
            Duration::from_secs_f64(settings.get_f64(&self.sn(&format!("{prefix}/StopTimer")), 0.0).max(0.0));
        Thresholds {
            start_value,
            stop_value,
            start_timer,
            stop_timer,
        }
    }

    /// Whether an external AC input overrides the acload evaluator per
    /// `StopWhenAc{1,2}Available` (§4.3, §4.4).
    fn ac_input_override_active(&self, telemetry: &Telemetry<'_>, settings: &dyn SettingsMirror) -> bool {
        let status = telemetry.active_input_status();
        let Some(true) = status.connected else { return false };
        match status.active_input {
            Some(1) => settings.get_bool(&self.sn("StopWhenAc1Available"), false),
            Some(2) => settings.get_bool(&self.sn("StopWhenAc2Available"), false),
            _ => false,
        }
    }

    fn evaluate_conditions(
        &mut self,
        now: Instant,
        telemetry: &Telemetry<'_>,
        settings: &dyn SettingsMirror,
        quiet_active: bool,
    ) -> HashMap<ConditionKind, Vote> {
        let mut votes = HashMap::new();

        let th = self.thresholds(settings, ConditionKind::Soc, quiet_active);
        let enabled = settings.get_bool(&self.sn("Soc/Enabled"), false);
        let input = telemetry.battery_soc().as_f64();
        let soc = self.conditions.get_mut(&ConditionKind::Soc).unwrap();
        votes.insert(ConditionKind::Soc, soc.tick(now, enabled, input, th, soc_start, soc_stop));

        let mode = AcLoadMode::from_i64(settings.get_i64(&self.sn("AcLoad/Measurement"), 0));
        let th = self.thresholds(settings, ConditionKind::AcLoad, quiet_active);
        let enabled = settings.get_bool(&self.sn("AcLoad/Enabled"), false);
        let input = telemetry.ac_load_power(mode);
        let override_active = mode == AcLoadMode::InverterOutput && self.ac_input_override_active(telemetry, settings);
        let acload = self.conditions.get_mut(&ConditionKind::AcLoad).unwrap();
        let mut vote = acload.tick(now, enabled, input, th, acload_start, acload_stop);
        if override_active {
            acload.reset();
            vote = Vote::Stop;
        }
        votes.insert(ConditionKind::AcLoad, vote);

        let th = self.thresholds(settings, ConditionKind::BatteryCurrent, quiet_active);
        let enabled = settings.get_bool(&self.sn("BatteryCurrent/Enabled"), false);
        let input = telemetry.battery_current_discharge();
        let cur = self.conditions.get_mut(&ConditionKind::BatteryCurrent).unwrap();
        votes.insert(
            ConditionKind::BatteryCurrent,
            cur.tick(now, enabled, input, th, batterycurrent_start, batterycurrent_stop),
        );

        let th = self.thresholds(settings, ConditionKind::BatteryVoltage, quiet_active);
        let enabled = settings.get_bool(&self.sn("BatteryVoltage/Enabled"), false);
        let input = telemetry.battery_voltage().as_f64();
        let volt = self.conditions.get_mut(&ConditionKind::BatteryVoltage).unwrap();
        votes.insert(
            ConditionKind::BatteryVoltage,
            volt.tick(now, enabled, input, th, batteryvoltage_start, batteryvoltage_stop),
        );

        let th = self.thresholds(settings, ConditionKind::InverterHighTemp, quiet_active);
        let enabled = settings.get_bool(&self.sn("InverterHighTemp/Enabled"), false);
        let input = telemetry
            .inverter_alarm(InverterAlarm::HighTemperature)
            .map(|b| if b { 1.0 } else { 0.0 });
        let ht = self.conditions.get_mut(&ConditionKind::InverterHighTemp).unwrap();
        votes.insert(
            ConditionKind::InverterHighTemp,
            ht.tick(now, enabled, input, th, alarm_start, alarm_stop),
        );

        let th = self.thresholds(settings, ConditionKind::InverterOverload, quiet_active);
        let enabled = settings.get_bool(&self.sn("InverterOverload/Enabled"), false);
        let input = telemetry.inverter_alarm(InverterAlarm::Overload).map(|b| if b { 1.0 } else { 0.0 });
        let ol = self.conditions.get_mut(&ConditionKind::InverterOverload).unwrap();
        votes.insert(
            ConditionKind::InverterOverload,
            ol.tick(now, enabled, input, th, alarm_start, alarm_stop),
        );

        votes
    }

    fn evaluate_testrun<Tz: TimeZone>(
        &mut self,
        now: Instant,
        local_now: &DateTime<Tz>,
        settings: &dyn SettingsMirror,
    ) -> Vote {
        let trs = TestRunSettings {
            enabled: settings.get_bool(&self.sn("TestRun/Enabled"), false),
            start_date_days: settings.get_i64(&self.sn("TestRun/StartDate"), 0),
            start_time_s: settings.get_i64(&self.sn("TestRun/StartTime"), 0),
            interval_days: settings.get_i64(&self.sn("TestRun/Interval"), 1),
            duration_s: settings.get_i64(&self.sn("TestRun/Duration"), 0),
            skip_runtime_s: settings.get_i64(&self.sn("TestRun/SkipRuntime"), 0),
            run_till_battery_full: settings.get_bool(&self.sn("TestRun/RunTillBatteryFull"), false),
        };

        let yesterday_midnight = midnight_ts(local_now) - 86_400;
        let yesterday_runtime = self.statistics.seconds_for_day(yesterday_midnight);
        self.testrun.tick(now, local_now, &trs, yesterday_runtime, self.last_soc)
    }

    /// Required telemetry health check for the 5-minute communication-loss
    /// timer (§4.4): the vebus service must be resolvable and reporting.
    fn telemetry_healthy(&self, telemetry: &Telemetry<'_>) -> bool {
        telemetry.vebus_service().is_some()
    }

    fn evaluate_hardware_error(&self, bus: &dyn BusMonitor, want_running: bool) -> ErrorKind {
        let Some(genset) = &self.genset_service else {
            return ErrorKind::None;
        };
        let error_code = bus.get_value(genset, "/ErrorCode").as_i64();
        match error_code {
            Some(code) if code != 0 => return ErrorKind::RemoteInFault,
            Some(_) => {}
            None => {
                if want_running {
                    return ErrorKind::RemoteIncompatible;
                }
            }
        }
        if want_running {
            let autostart = bus.get_value(genset, "/AutoStart").as_i64();
            if autostart == Some(0) {
                return ErrorKind::RemoteDisabled;
            }
        }
        ErrorKind::None
    }

    #[allow(clippy::too_many_lines)]
    pub async fn tick<Tz: TimeZone>(
        &mut self,
        now: Instant,
        local_now: DateTime<Tz>,
        instance_enabled: bool,
        settings: &dyn SettingsMirror,
        bus: &dyn BusMonitor,
    ) -> Result<()> {
        let delta_secs = self.last_tick.map(|prev| now.saturating_duration_since(prev).as_secs_f64()).unwrap_or(0.0);
        self.last_tick = Some(now);

        if !instance_enabled {
            self.force_stopped();
            self.publish(now, bus).await?;
            self.accrue_statistics(&local_now, delta_secs, settings).await?;
            return Ok(());
        }

        let telemetry = Telemetry::new(bus, self.battery_service.clone());

        let qh_enabled = settings.get_bool(&self.sn("QuietHours/Enabled"), false);
        let quiet_active = qh_enabled
            && quiet_hours::is_within_window(
                seconds_since_midnight(&local_now),
                settings.get_i64(&self.sn("QuietHours/StartTime"), 0),
                settings.get_i64(&self.sn("QuietHours/EndTime"), 0),
            );

        self.last_soc = telemetry.battery_soc().as_f64();
        let votes = self.evaluate_conditions(now, &telemetry, settings, quiet_active);
        let testrun_vote = self.evaluate_testrun(now, &local_now, settings);

        let auto_reason = ConditionKind::PRIORITY_ORDER.iter().find_map(|kind| {
            let vote = if *kind == ConditionKind::TestRun { testrun_vote } else { *votes.get(kind).unwrap_or(&Vote::Indifferent) };
            (vote == Vote::Start).then_some(*kind)
        });

        let manual_start = matches!(bus.get_value(&self.own_service, &self.path("ManualStart")).as_i64(), Some(1));
        let auto_start_enabled = settings.get_bool(&self.sn("AutoStartEnabled"), false);

        let want_running = manual_start || (auto_start_enabled && auto_reason.is_some());

        let hw_error = self.evaluate_hardware_error(bus, want_running);
        if hw_error != ErrorKind::None {
            self.error = hw_error;
            self.state = GeneratorState::Error;
            self.transition_deadline = None;
            self.publish(now, bus).await?;
            self.accrue_statistics(&local_now, delta_secs, settings).await?;
            return Ok(());
        }
        self.error = ErrorKind::None;

        let comm_healthy = self.telemetry_healthy(&telemetry);
        if comm_healthy {
            self.comm_loss_since = None;
        } else {
            self.comm_loss_since.get_or_insert(now);
        }
        let comm_loss_active = self.comm_loss_since.is_some_and(|since| now.saturating_duration_since(since) >= COMM_LOSS_THRESHOLD);
        let comm_policy = settings.get_i64(&self.sn("OnLossCommunication"), 0);

        let natural_reason = if manual_start {
            Some(RunningReason::Manual)
        } else if auto_start_enabled {
            auto_reason.map(RunningReason::Condition)
        } else {
            None
        };

        let currently_active = matches!(self.state, GeneratorState::Running | GeneratorState::Warmup | GeneratorState::Cooldown);

        let (mut target_running, mut target_reason) = if comm_loss_active {
            match comm_policy {
                1 => (true, Some(RunningReason::LossOfCommunication)),
                2 => (currently_active, self.running_by_condition.clone()),
                _ => (false, None),
            }
        } else {
            (natural_reason.is_some(), natural_reason)
        };

        if currently_active && !target_running {
            let bypass_min_runtime = matches!(self.running_by_condition, Some(RunningReason::Manual)) && !manual_start;
            if !bypass_min_runtime {
                let min_runtime = Duration::from_secs_f64(
                    (settings.get_f64(&self.sn("MinimumRuntime"), 0.0) * 60.0).max(0.0),
                );
                if let Some(since) = self.running_since
                    && now.saturating_duration_since(since) < min_runtime
                {
                    target_running = true;
                    target_reason = self.running_by_condition.clone();
                }
            }
        }

        let warmup_time = Duration::from_secs_f64(settings.get_f64(&self.sn("WarmupTime"), 0.0).max(0.0));
        let cooldown_time = Duration::from_secs_f64(settings.get_f64(&self.sn("CooldownTime"), 0.0).max(0.0));

        match (currently_active, target_running) {
            (false, true) => {
                self.running_since = Some(now);
                self.running_by_condition = target_reason;
                if warmup_time > Duration::ZERO {
                    self.state = GeneratorState::Warmup;
                    self.transition_deadline = Some(now + warmup_time);
                } else {
                    self.state = GeneratorState::Running;
                    self.transition_deadline = None;
                }
            }
            (true, true) => {
                if let Some(reason) = target_reason {
                    self.running_by_condition = Some(reason);
                }
                match self.state {
                    GeneratorState::Warmup => {
                        if self.transition_deadline.is_some_and(|d| now >= d) {
                            self.state = GeneratorState::Running;
                            self.transition_deadline = None;
                        }
                    }
                    GeneratorState::Cooldown => {
                        self.state = GeneratorState::Running;
                        self.transition_deadline = None;
                    }
                    _ => {}
                }
            }
            (true, false) => match self.state {
                GeneratorState::Cooldown => {
                    if self.transition_deadline.is_some_and(|d| now >= d) {
                        self.state = GeneratorState::Stopped;
                        self.running_since = None;
                        self.running_by_condition = None;
                        self.transition_deadline = None;
                        self.no_gen_alarm = NoGenAlarm::Ok;
                    }
                }
                _ if cooldown_time > Duration::ZERO => {
                    self.state = GeneratorState::Cooldown;
                    self.transition_deadline = Some(now + cooldown_time);
                }
                _ => {
                    self.state = GeneratorState::Stopped;
                    self.running_since = None;
                    self.running_by_condition = None;
                    self.no_gen_alarm = NoGenAlarm::Ok;
                }
            },
            (false, false) => {
                self.state = GeneratorState::Stopped;
            }
        }

        self.update_no_gen_alarm(now, &telemetry);

        self.publish(now, bus).await?;
        self.accrue_statistics(&local_now, delta_secs, settings).await?;
        Ok(())
    }

    fn force_stopped(&mut self) {
        self.state = GeneratorState::Stopped;
        self.running_since = None;
        self.running_by_condition = None;
        self.error = ErrorKind::None;
        self.no_gen_alarm = NoGenAlarm::Ok;
        self.transition_deadline = None;
    }

    fn update_no_gen_alarm(&mut self, now: Instant, telemetry: &Telemetry<'_>) {
        let running_non_manual =
            self.state == GeneratorState::Running && !matches!(self.running_by_condition, Some(RunningReason::Manual));
        if !running_non_manual {
            self.no_gen_alarm = NoGenAlarm::Ok;
            return;
        }

        let Some(connected) = telemetry.active_input_status().connected else {
            self.no_gen_alarm = NoGenAlarm::Ok;
            return;
        };
        let source_ok = telemetry.active_in_source().map(|s| s == 2).unwrap_or(true);
        let gen_present = connected && source_ok;

        if gen_present {
            self.no_gen_alarm = NoGenAlarm::Ok;
            return;
        }

        let since = self.running_since.unwrap_or(now);
        self.no_gen_alarm = if now.saturating_duration_since(since) >= NO_GEN_ALARM_THRESHOLD {
            NoGenAlarm::Fired
        } else {
            NoGenAlarm::Armed
        };
    }

    async fn publish(&self, now: Instant, bus: &dyn BusMonitor) -> Result<()> {
        bus.set_value(&self.own_service, &self.path("State"), Some(Value::Int(self.state.as_i64())))
            .await?;
        bus.set_value(
            &self.own_service,
            &self.path("RunningByCondition"),
            Some(Value::Str(self.running_by_condition_tag().to_string())),
        )
        .await?;
        bus.set_value(&self.own_service, &self.path("Error"), Some(Value::Int(self.error.as_i64())))
            .await?;
        bus.set_value(
            &self.own_service,
            &self.path("Alarms/NoGeneratorAtAcIn"),
            Some(Value::Int(self.no_gen_alarm.as_i64())),
        )
        .await?;

        let runtime_s = self.running_since.map_or(0, |since| now.saturating_duration_since(since).as_secs());
        bus.set_value(&self.own_service, &self.path("Runtime"), Some(Value::Int(runtime_s as i64)))
            .await?;
        bus.set_value(
            &self.own_service,
            &self.path("TodayRuntime"),
            Some(Value::Int(self.statistics.daily_runtime_seconds() as i64)),
        )
        .await?;
        bus.set_value(
            &self.own_service,
            &self.path("AccumulatedRuntime"),
            Some(Value::Int(self.statistics.accumulated_runtime_seconds() as i64)),
        )
        .await?;

        let start = if self.state.wants_start_published() { 1 } else { 0 };
        if let Some(genset) = &self.genset_service {
            bus.set_value(genset, "/Start", Some(Value::Int(start))).await?;
        }
        bus.set_value(&self.own_service, &self.path("Start"), Some(Value::Int(start))).await?;

        Ok(())
    }

    async fn accrue_statistics(
        &mut self,
        local_now: &DateTime<impl TimeZone>,
        delta_secs: f64,
        settings: &dyn SettingsMirror,
    ) -> Result<()> {
        let running = self.state == GeneratorState::Running || self.state == GeneratorState::Warmup;
        let rolled_over = self.statistics.tick(midnight_ts(local_now), running, delta_secs);

        if rolled_over {
            let json = self.statistics.daily_history_json()?;
            settings.set(&self.sn("AccumulatedDaily"), Value::Str(json)).await?;
        }

        settings
            .set(
                &self.sn("AccumulatedRuntime"),
                Value::Int(self.statistics.accumulated_runtime_seconds() as i64),
            )
            .await?;

        Ok(())
    }
}


fn seconds_since_midnight(dt: &DateTime<impl TimeZone>) -> i64 {
    i64::from(dt.num_seconds_from_midnight())
}

/// Unix timestamp of local midnight for `dt`'s calendar date, in `dt`'s own
/// time zone (not naively reinterpreted as UTC).
fn midnight_ts(dt: &DateTime<impl TimeZone>) -> i64 {
    let naive_midnight = dt.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default();
    dt.timezone()
        .from_local_datetime(&naive_midnight)
        .single()
        .map(|d| d.timestamp())
        .unwrap_or_else(|| naive_midnight.and_utc().timestamp())
}

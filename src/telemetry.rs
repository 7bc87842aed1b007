//! Telemetry aggregator: typed accessors over the bus monitor's snapshot.
//!
//! Condition evaluators never talk to the [`crate::bus::BusMonitor`] trait
//! directly; they go through here so the AC-load measurement-mode handling,
//! inverter-alarm source selection, and battery-service resolution logic
//! (spec §4.3) lives in one place.

use crate::bus::{BusMonitor, Reading};

pub const SYSTEM_SERVICE: &str = "com.victronenergy.system";

/// AC-load measurement mode, `AcLoad/Measurement` (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcLoadMode {
    TotalConsumption,
    InverterOutput,
    HighestPhase,
}

impl AcLoadMode {
    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => AcLoadMode::InverterOutput,
            2 => AcLoadMode::HighestPhase,
            _ => AcLoadMode::TotalConsumption,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InverterAlarm {
    Overload,
    HighTemperature,
}

impl InverterAlarm {
    fn path_suffix(self) -> &'static str {
        match self {
            InverterAlarm::Overload => "Overload",
            InverterAlarm::HighTemperature => "HighTemperature",
        }
    }
}

/// Status of the active AC input, as reported by the vebus service.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActiveInputStatus {
    /// `/Ac/ActiveIn/Connected`, or `None` if unsupported.
    pub connected: Option<bool>,
    /// `/Ac/ActiveIn/ActiveInput`: which input is active (2 = generator).
    pub active_input: Option<i64>,
}

/// Bus-name prefix for battery monitor services, used to enumerate
/// candidates when resolving `/AutoSelectedBatteryMeasurement` (§4.1).
pub const BATTERY_PREFIX: &str = "com.victronenergy.battery.";

/// Parse the device instance encoded in `/AutoSelectedBatteryMeasurement`,
/// e.g. `"com_victronenergy_battery_258/Dc/0"` -> `258`. The leading segment
/// is **not** a sanitized, reversible service name — it embeds the battery's
/// `/DeviceInstance`, which the real service name (`com.victronenergy.
/// battery.ttyO5`, say) never contains. Callers resolve the actual service
/// by matching this instance against each candidate's own `/DeviceInstance`
/// (the same discovery-then-match shape used for the genset service).
pub fn battery_device_instance(raw: &str) -> Option<i64> {
    let first = raw.splitn(2, '/').next()?;
    first.rsplit('_').next()?.parse().ok()
}

/// Aggregates telemetry from the system, vebus, selected battery, and genset
/// services into the typed readings condition evaluators need. The battery
/// service name is resolved externally (device-instance lookup requires an
/// async bus scan) and passed in rather than derived here.
pub struct Telemetry<'a> {
    bus: &'a dyn BusMonitor,
    battery_service: Option<String>,
}

impl<'a> Telemetry<'a> {
    pub fn new(bus: &'a dyn BusMonitor, battery_service: Option<String>) -> Self {
        Self { bus, battery_service }
    }

    /// `/VebusService` on the system service: the name of the multi/inverter
    /// service currently selected as "the" vebus device.
    pub fn vebus_service(&self) -> Option<String> {
        match self.bus.get_value(SYSTEM_SERVICE, "/VebusService") {
            Reading::Value(v) => v.as_str().map(str::to_string),
            _ => None,
        }
    }

    /// The Dc-index path prefix carried after the first `/` in
    /// `/AutoSelectedBatteryMeasurement`, e.g. `"/Dc/0"`. Unlike the leading
    /// segment, this really is a literal path fragment, not an encoded name.
    fn battery_prefix(&self) -> String {
        let raw = match self
            .bus
            .get_value(SYSTEM_SERVICE, "/AutoSelectedBatteryMeasurement")
        {
            Reading::Value(v) => v.as_str().map(str::to_string),
            _ => None,
        };
        let suffix = raw.as_deref().and_then(|r| r.splitn(2, '/').nth(1)).unwrap_or("Dc/0").to_string();
        format!("/{suffix}")
    }

    fn battery_path(&self, leaf: &str) -> Option<(String, String)> {
        let service = self.battery_service.clone()?;
        Some((service, format!("{}/{leaf}", self.battery_prefix())))
    }

    /// Battery SoC percentage, read from the selected battery measurement,
    /// falling back to the vebus service's own `/Soc` (matching the
    /// original implementation's single-battery-device fixtures).
    pub fn battery_soc(&self) -> Reading {
        if let Some((service, path)) = self.battery_path("Soc") {
            let reading = self.bus.get_value(&service, &path);
            if !reading.is_absent() {
                return reading;
            }
        }
        if let Some(vebus) = self.vebus_service() {
            return self.bus.get_value(&vebus, "/Soc");
        }
        Reading::Absent
    }

    pub fn battery_voltage(&self) -> Reading {
        match self.battery_path("Voltage") {
            Some((service, path)) => self.bus.get_value(&service, &path),
            None => Reading::Absent,
        }
    }

    /// Battery current, sign-flipped per spec (`−I`): positive means
    /// discharging.
    pub fn battery_current_discharge(&self) -> Option<f64> {
        let (service, path) = self.battery_path("Current")?;
        self.bus.get_value(&service, &path).as_f64().map(|i| -i)
    }

    /// AC load power in watts for the given measurement mode, `None` if any
    /// required input is invalid.
    pub fn ac_load_power(&self, mode: AcLoadMode) -> Option<f64> {
        match mode {
            AcLoadMode::TotalConsumption => {
                let l1 = self
                    .bus
                    .get_value(SYSTEM_SERVICE, "/Ac/Consumption/L1/Power")
                    .as_f64()?;
                let l2 = self
                    .bus
                    .get_value(SYSTEM_SERVICE, "/Ac/Consumption/L2/Power")
                    .as_f64()?;
                let l3 = self
                    .bus
                    .get_value(SYSTEM_SERVICE, "/Ac/Consumption/L3/Power")
                    .as_f64()?;
                Some(l1 + l2 + l3)
            }
            AcLoadMode::InverterOutput => {
                let vebus = self.vebus_service()?;
                let total = self.bus.get_value(&vebus, "/Ac/Out/P");
                if let Some(p) = total.as_f64() {
                    return Some(p);
                }
                let l1 = self.bus.get_value(&vebus, "/Ac/Out/L1/P").as_f64()?;
                let l2 = self.bus.get_value(&vebus, "/Ac/Out/L2/P").as_f64()?;
                let l3 = self.bus.get_value(&vebus, "/Ac/Out/L3/P").as_f64()?;
                Some(l1 + l2 + l3)
            }
            AcLoadMode::HighestPhase => {
                let vebus = self.vebus_service()?;
                let l1 = self.bus.get_value(&vebus, "/Ac/Out/L1/P").as_f64()?;
                let l2 = self.bus.get_value(&vebus, "/Ac/Out/L2/P").as_f64()?;
                let l3 = self.bus.get_value(&vebus, "/Ac/Out/L3/P").as_f64()?;
                Some(l1.max(l2).max(l3))
            }
        }
    }

    /// Inverter alarm state: prefer per-phase paths, fall back to the
    /// aggregate; `None` if both are unavailable (§4.3).
    pub fn inverter_alarm(&self, alarm: InverterAlarm) -> Option<bool> {
        let vebus = self.vebus_service()?;
        let suffix = alarm.path_suffix();

        let per_phase: Vec<Reading> = ["L1", "L2", "L3"]
            .iter()
            .map(|phase| self.bus.get_value(&vebus, &format!("/Alarms/{phase}/{suffix}")))
            .collect();

        if per_phase.iter().any(|r| !matches!(r, Reading::Null | Reading::Absent)) {
            return Some(per_phase.iter().any(|r| r.as_i64() == Some(1)));
        }

        let aggregate = self.bus.get_value(&vebus, &format!("/Alarms/{suffix}"));
        match aggregate {
            Reading::Value(v) => v.as_i64().map(|i| i == 1),
            _ => None,
        }
    }

    /// Active-input status from the vebus service.
    pub fn active_input_status(&self) -> ActiveInputStatus {
        let Some(vebus) = self.vebus_service() else {
            return ActiveInputStatus::default();
        };
        let connected = match self.bus.get_value(&vebus, "/Ac/ActiveIn/Connected") {
            Reading::Value(v) => v.as_i64().map(|i| i != 0),
            _ => None,
        };
        let active_input = self.bus.get_value(&vebus, "/Ac/ActiveIn/ActiveInput").as_i64();
        ActiveInputStatus {
            connected,
            active_input,
        }
    }

    /// `/Ac/ActiveIn/Source` on the system service: 2 == generator.
    pub fn active_in_source(&self) -> Option<i64> {
        self.bus
            .get_value(SYSTEM_SERVICE, "/Ac/ActiveIn/Source")
            .as_i64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBus;
    use crate::bus::Value;

    fn seeded_bus() -> MemoryBus {
        let bus = MemoryBus::new();
        seed_fixtures(&bus);
        bus
    }

    /// Matches `examples/original_source/test/generator_test.py`'s fixture:
    /// the encoded value embeds the battery's `/DeviceInstance` (`258`), a
    /// number with no relation to the registered service name (`ttyO5`).
    fn seed_fixtures(bus: &MemoryBus) {
        bus.seed(
            SYSTEM_SERVICE,
            &[
                ("/Ac/Consumption/L1/Power", Value::Float(650.0)),
                ("/Ac/Consumption/L2/Power", Value::Float(650.0)),
                ("/Ac/Consumption/L3/Power", Value::Float(650.0)),
                ("/Ac/ActiveIn/Source", Value::Int(2)),
                (
                    "/AutoSelectedBatteryMeasurement",
                    Value::Str("com_victronenergy_battery_258/Dc/0".to_string()),
                ),
                ("/VebusService", Value::Str("com.victronenergy.vebus.ttyO1".to_string())),
            ],
        );
        bus.seed(
            "com.victronenergy.vebus.ttyO1",
            &[
                ("/Ac/Out/L1/P", Value::Float(500.0)),
                ("/Ac/Out/L2/P", Value::Float(500.0)),
                ("/Ac/Out/L3/P", Value::Float(500.0)),
                ("/Ac/Out/P", Value::Float(1500.0)),
                ("/Alarms/L1/Overload", Value::Int(0)),
                ("/Alarms/L2/Overload", Value::Int(0)),
                ("/Alarms/L3/Overload", Value::Int(0)),
                ("/Ac/ActiveIn/ActiveInput", Value::Int(1)),
                ("/Ac/ActiveIn/Connected", Value::Int(0)),
            ],
        );
        bus.seed(
            "com.victronenergy.battery.ttyO5",
            &[
                ("/DeviceInstance", Value::Int(258)),
                ("/Dc/0/Voltage", Value::Float(14.4)),
                ("/Dc/0/Current", Value::Float(10.0)),
                ("/Soc", Value::Float(87.0)),
            ],
        );
    }

    /// The resolved battery service name a caller (the controller, in
    /// production) would hand to `Telemetry::new` after matching the
    /// `/DeviceInstance` the fixture above registers.
    const RESOLVED_BATTERY: &str = "com.victronenergy.battery.ttyO5";

    #[test]
    fn test_battery_device_instance_parses_trailing_number() {
        assert_eq!(battery_device_instance("com_victronenergy_battery_258/Dc/0"), Some(258));
        assert_eq!(battery_device_instance("garbage"), None);
    }

    #[test]
    fn test_total_consumption_sums_phases() {
        let bus = seeded_bus();
        let telemetry = Telemetry::new(&bus, Some(RESOLVED_BATTERY.to_string()));
        assert_eq!(
            telemetry.ac_load_power(AcLoadMode::TotalConsumption),
            Some(1950.0)
        );
    }

    #[test]
    fn test_inverter_output_prefers_total() {
        let bus = seeded_bus();
        let telemetry = Telemetry::new(&bus, Some(RESOLVED_BATTERY.to_string()));
        assert_eq!(telemetry.ac_load_power(AcLoadMode::InverterOutput), Some(1500.0));
    }

    #[test]
    fn test_highest_phase() {
        let bus = seeded_bus();
        let telemetry = Telemetry::new(&bus, Some(RESOLVED_BATTERY.to_string()));
        assert_eq!(telemetry.ac_load_power(AcLoadMode::HighestPhase), Some(500.0));
    }

    #[test]
    fn test_battery_resolution_via_auto_selected() {
        let bus = seeded_bus();
        let telemetry = Telemetry::new(&bus, Some(RESOLVED_BATTERY.to_string()));
        assert_eq!(telemetry.battery_voltage().as_f64(), Some(14.4));
        assert_eq!(telemetry.battery_current_discharge(), Some(-10.0));
    }

    #[test]
    fn test_battery_path_absent_until_service_is_resolved() {
        let bus = seeded_bus();
        let telemetry = Telemetry::new(&bus, None);
        assert_eq!(telemetry.battery_voltage().as_f64(), None);
    }

    #[test]
    fn test_inverter_alarm_per_phase() {
        let bus = seeded_bus();
        let telemetry = Telemetry::new(&bus, Some(RESOLVED_BATTERY.to_string()));
        assert_eq!(telemetry.inverter_alarm(InverterAlarm::Overload), Some(false));
        bus.poke(
            "com.victronenergy.vebus.ttyO1",
            "/Alarms/L2/Overload",
            Some(Value::Int(1)),
        );
        assert_eq!(telemetry.inverter_alarm(InverterAlarm::Overload), Some(true));
    }

    #[test]
    fn test_active_input_status() {
        let bus = seeded_bus();
        let telemetry = Telemetry::new(&bus);
        let status = telemetry.active_input_status();
        assert_eq!(status.connected, Some(false));
        assert_eq!(status.active_input, Some(1));
    }
}

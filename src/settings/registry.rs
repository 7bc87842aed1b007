//! Static path ↔ short-name registry for the settings subtrees enumerated in
//! spec §3: the shared globals plus the per-instance `Generator0` and
//! `FischerPanda0` condition/schedule/behavior trees.

use crate::bus::Value;

/// One registered settings path: its full D-Bus path under
/// `com.victronenergy.settings`, the short-name the rest of the crate
/// addresses it by, and the value to seed it with before the first remote
/// read completes.
#[derive(Debug, Clone)]
pub struct Entry {
    pub path: String,
    pub short_name: String,
    pub default: Value,
}

/// The relative short-names shared by every generator instance, paired with
/// their defaults. `{instance}` is substituted with `Generator0` or
/// `FischerPanda0` to build both the path and the short-name.
fn per_instance_suffixes() -> Vec<(&'static str, Value)> {
    vec![
        ("AutoStartEnabled", Value::Int(0)),
        ("MinimumRuntime", Value::Float(0.0)),
        ("OnLossCommunication", Value::Int(0)),
        ("StopWhenAc1Available", Value::Int(0)),
        ("StopWhenAc2Available", Value::Int(0)),
        ("AccumulatedDaily", Value::Str(String::new())),
        ("AccumulatedRuntime", Value::Int(0)),
        ("WarmupTime", Value::Float(0.0)),
        ("CooldownTime", Value::Float(0.0)),
        ("Alarms/NoGeneratorAtAcIn", Value::Int(0)),
        ("QuietHours/Enabled", Value::Int(0)),
        ("QuietHours/StartTime", Value::Int(0)),
        ("QuietHours/EndTime", Value::Int(0)),
        ("Soc/Enabled", Value::Int(0)),
        ("Soc/StartValue", Value::Float(0.0)),
        ("Soc/StopValue", Value::Float(0.0)),
        ("Soc/StartTimer", Value::Float(0.0)),
        ("Soc/StopTimer", Value::Float(0.0)),
        ("Soc/QuietHoursStartValue", Value::Float(0.0)),
        ("Soc/QuietHoursStopValue", Value::Float(0.0)),
        ("AcLoad/Enabled", Value::Int(0)),
        ("AcLoad/Measurement", Value::Int(0)),
        ("AcLoad/StartValue", Value::Float(0.0)),
        ("AcLoad/StopValue", Value::Float(0.0)),
        ("AcLoad/StartTimer", Value::Float(0.0)),
        ("AcLoad/StopTimer", Value::Float(0.0)),
        ("AcLoad/QuietHoursStartValue", Value::Float(0.0)),
        ("AcLoad/QuietHoursStopValue", Value::Float(0.0)),
        ("BatteryCurrent/Enabled", Value::Int(0)),
        ("BatteryCurrent/StartValue", Value::Float(0.0)),
        ("BatteryCurrent/StopValue", Value::Float(0.0)),
        ("BatteryCurrent/StartTimer", Value::Float(0.0)),
        ("BatteryCurrent/StopTimer", Value::Float(0.0)),
        ("BatteryCurrent/QuietHoursStartValue", Value::Float(0.0)),
        ("BatteryCurrent/QuietHoursStopValue", Value::Float(0.0)),
        ("BatteryVoltage/Enabled", Value::Int(0)),
        ("BatteryVoltage/StartValue", Value::Float(0.0)),
        ("BatteryVoltage/StopValue", Value::Float(0.0)),
        ("BatteryVoltage/StartTimer", Value::Float(0.0)),
        ("BatteryVoltage/StopTimer", Value::Float(0.0)),
        ("BatteryVoltage/QuietHoursStartValue", Value::Float(0.0)),
        ("BatteryVoltage/QuietHoursStopValue", Value::Float(0.0)),
        ("InverterHighTemp/Enabled", Value::Int(0)),
        ("InverterHighTemp/StartTimer", Value::Float(0.0)),
        ("InverterHighTemp/StopTimer", Value::Float(0.0)),
        ("InverterOverload/Enabled", Value::Int(0)),
        ("InverterOverload/StartTimer", Value::Float(0.0)),
        ("InverterOverload/StopTimer", Value::Float(0.0)),
        ("TestRun/Enabled", Value::Int(0)),
        ("TestRun/StartDate", Value::Int(0)),
        ("TestRun/StartTime", Value::Int(0)),
        ("TestRun/Interval", Value::Int(1)),
        ("TestRun/Duration", Value::Int(0)),
        ("TestRun/SkipRuntime", Value::Int(0)),
        ("TestRun/RunTillBatteryFull", Value::Int(0)),
    ]
}

/// Build the full entry list for one generator instance (`Generator0` or
/// `FischerPanda0`).
pub fn entries_for_instance(instance: &str) -> Vec<Entry> {
    per_instance_suffixes()
        .into_iter()
        .map(|(suffix, default)| Entry {
            path: format!("/Settings/{instance}/{suffix}"),
            short_name: format!("{instance}/{suffix}"),
            default,
        })
        .collect()
}

/// Globals shared across both instances, not namespaced per generator.
pub fn shared_entries() -> Vec<Entry> {
    vec![
        Entry {
            path: "/Settings/Relay/Function".to_string(),
            short_name: "Relay/Function".to_string(),
            default: Value::Int(0),
        },
        Entry {
            path: "/Settings/System/TimeZone".to_string(),
            short_name: "System/TimeZone".to_string(),
            default: Value::Str("UTC".to_string()),
        },
        Entry {
            path: "/Settings/Services/FischerPandaAutoStartStop".to_string(),
            short_name: "Services/FischerPandaAutoStartStop".to_string(),
            default: Value::Int(0),
        },
    ]
}

/// All entries for both recognized instances plus the shared globals.
pub fn all_entries() -> Vec<Entry> {
    let mut entries = shared_entries();
    entries.extend(entries_for_instance("Generator0"));
    entries.extend(entries_for_instance("FischerPanda0"));
    entries
}

//! End-to-end scenarios from spec.md §8, exercised against the in-memory
//! `BusMonitor`/`SettingsMirror` doubles exactly as `generator_test.py`
//! exercised the original against its dummy services.

use chrono::Utc;
use genstart::bus::memory::MemoryBus;
use genstart::bus::Value;
use genstart::engine::{ErrorKind, Generator, GeneratorState};
use genstart::settings::memory::MemorySettings;
use std::time::{Duration, Instant};

const OWN_SERVICE: &str = "com.victronenergy.generator.startstop0";
const SYSTEM: &str = "com.victronenergy.system";
const VEBUS: &str = "com.victronenergy.vebus.ttyO1";
const BATTERY: &str = "com.victronenergy.battery.ttyO5";

fn base_bus() -> MemoryBus {
    let bus = MemoryBus::new();
    bus.seed(OWN_SERVICE, &[("/Generator0/ManualStart", Value::Int(0))]);
    bus.seed(
        SYSTEM,
        &[
            ("/Ac/Consumption/L1/Power", Value::Float(0.0)),
            ("/Ac/Consumption/L2/Power", Value::Float(0.0)),
            ("/Ac/Consumption/L3/Power", Value::Float(0.0)),
            ("/Ac/ActiveIn/Source", Value::Int(2)),
            (
                "/AutoSelectedBatteryMeasurement",
                Value::Str("com_victronenergy_battery_258/Dc/0".to_string()),
            ),
            ("/VebusService", Value::Str(VEBUS.to_string())),
        ],
    );
    bus.seed(
        VEBUS,
        &[
            ("/Ac/Out/L1/P", Value::Float(0.0)),
            ("/Ac/Out/L2/P", Value::Float(0.0)),
            ("/Ac/Out/L3/P", Value::Float(0.0)),
            ("/Ac/Out/P", Value::Float(0.0)),
            ("/Ac/ActiveIn/ActiveInput", Value::Int(2)),
            ("/Ac/ActiveIn/Connected", Value::Int(1)),
            ("/Soc", Value::Float(80.0)),
        ],
    );
    bus.seed(
        BATTERY,
        &[
            ("/DeviceInstance", Value::Int(258)),
            ("/Dc/0/Voltage", Value::Float(24.0)),
            ("/Dc/0/Current", Value::Float(0.0)),
        ],
    );
    bus
}

async fn generator0(settings: &MemorySettings) -> Generator {
    Generator::new("Generator0", OWN_SERVICE.to_string(), None, settings).await
}

fn now_utc() -> chrono::DateTime<chrono_tz::Tz> {
    Utc::now().with_timezone(&chrono_tz::UTC)
}

#[tokio::test]
async fn s1_acload_start() {
    let bus = base_bus();
    bus.poke(SYSTEM, "/Ac/Consumption/L1/Power", Some(Value::Float(1900.0)));
    bus.poke(SYSTEM, "/Ac/Consumption/L2/Power", Some(Value::Float(100.0)));
    bus.poke(SYSTEM, "/Ac/Consumption/L3/Power", Some(Value::Float(600.0)));

    let settings = MemorySettings::new();
    settings.set_by_path("/Settings/Generator0/AutoStartEnabled", Value::Int(1));
    settings.set_by_path("/Settings/Generator0/AcLoad/Enabled", Value::Int(1));
    settings.set_by_path("/Settings/Generator0/AcLoad/Measurement", Value::Int(0));
    settings.set_by_path("/Settings/Generator0/AcLoad/StartValue", Value::Float(2600.0));
    settings.set_by_path("/Settings/Generator0/AcLoad/StopValue", Value::Float(800.0));

    let mut gen = generator0(&settings).await;
    gen.tick(Instant::now(), now_utc(), true, &settings, &bus).await.unwrap();

    assert_eq!(gen.state(), GeneratorState::Running);
    assert_eq!(gen.running_by_condition_tag(), "acload");
}

#[tokio::test]
async fn s2_active_input_override_stops_acload() {
    let bus = base_bus();
    bus.poke(VEBUS, "/Ac/Out/P", Some(Value::Float(3000.0)));
    bus.poke(VEBUS, "/Ac/ActiveIn/ActiveInput", Some(Value::Int(1)));
    bus.poke(VEBUS, "/Ac/ActiveIn/Connected", Some(Value::Int(1)));

    let settings = MemorySettings::new();
    settings.set_by_path("/Settings/Generator0/AutoStartEnabled", Value::Int(1));
    settings.set_by_path("/Settings/Generator0/AcLoad/Enabled", Value::Int(1));
    settings.set_by_path("/Settings/Generator0/AcLoad/Measurement", Value::Int(1));
    settings.set_by_path("/Settings/Generator0/AcLoad/StartValue", Value::Float(1000.0));
    settings.set_by_path("/Settings/Generator0/AcLoad/StopValue", Value::Float(500.0));
    settings.set_by_path("/Settings/Generator0/StopWhenAc1Available", Value::Int(1));

    let mut gen = generator0(&settings).await;
    gen.tick(Instant::now(), now_utc(), true, &settings, &bus).await.unwrap();
    assert_eq!(gen.state(), GeneratorState::Stopped, "active AC input 1 overrides acload");

    bus.poke(VEBUS, "/Ac/ActiveIn/Connected", Some(Value::Int(0)));
    gen.tick(Instant::now(), now_utc(), true, &settings, &bus).await.unwrap();
    assert_eq!(gen.state(), GeneratorState::Running, "override lifts once input disconnects");
}

#[tokio::test]
async fn s3_condition_cascade_without_stopped_transition() {
    let bus = base_bus();
    let settings = MemorySettings::new();
    settings.set_by_path("/Settings/Generator0/AutoStartEnabled", Value::Int(1));

    settings.set_by_path("/Settings/Generator0/Soc/Enabled", Value::Int(1));
    settings.set_by_path("/Settings/Generator0/Soc/StartValue", Value::Float(60.0));
    settings.set_by_path("/Settings/Generator0/Soc/StopValue", Value::Float(65.0));

    settings.set_by_path("/Settings/Generator0/AcLoad/Enabled", Value::Int(1));
    settings.set_by_path("/Settings/Generator0/AcLoad/Measurement", Value::Int(0));
    settings.set_by_path("/Settings/Generator0/AcLoad/StartValue", Value::Float(1000.0));
    settings.set_by_path("/Settings/Generator0/AcLoad/StopValue", Value::Float(500.0));

    settings.set_by_path("/Settings/Generator0/BatteryCurrent/Enabled", Value::Int(1));
    settings.set_by_path("/Settings/Generator0/BatteryCurrent/StartValue", Value::Float(50.0));
    settings.set_by_path("/Settings/Generator0/BatteryCurrent/StopValue", Value::Float(20.0));

    settings.set_by_path("/Settings/Generator0/BatteryVoltage/Enabled", Value::Int(1));
    settings.set_by_path("/Settings/Generator0/BatteryVoltage/StartValue", Value::Float(21.0));
    settings.set_by_path("/Settings/Generator0/BatteryVoltage/StopValue", Value::Float(24.5));

    bus.poke(BATTERY, "/Dc/0/Soc", Some(Value::Float(60.0)));
    bus.poke(BATTERY, "/Dc/0/Voltage", Some(Value::Float(24.0)));
    bus.poke(BATTERY, "/Dc/0/Current", Some(Value::Float(0.0)));

    let mut gen = generator0(&settings).await;
    gen.set_battery_service(Some(BATTERY.to_string()));
    let t0 = Instant::now();
    gen.tick(t0, now_utc(), true, &settings, &bus).await.unwrap();
    assert_eq!(gen.state(), GeneratorState::Running);
    assert_eq!(gen.running_by_condition_tag(), "soc", "soc fires first at priority order");

    bus.poke(BATTERY, "/Dc/0/Soc", Some(Value::Float(70.0)));
    bus.poke(SYSTEM, "/Ac/Consumption/L1/Power", Some(Value::Float(1200.0)));
    let t1 = t0 + Duration::from_secs(1);
    gen.tick(t1, now_utc(), true, &settings, &bus).await.unwrap();
    assert_eq!(gen.state(), GeneratorState::Running, "no STOPPED transition on handoff");
    assert_eq!(gen.running_by_condition_tag(), "acload");

    bus.poke(SYSTEM, "/Ac/Consumption/L1/Power", Some(Value::Float(0.0)));
    bus.poke(BATTERY, "/Dc/0/Current", Some(Value::Float(-60.0)));
    let t2 = t1 + Duration::from_secs(1);
    gen.tick(t2, now_utc(), true, &settings, &bus).await.unwrap();
    assert_eq!(gen.running_by_condition_tag(), "batterycurrent");

    bus.poke(BATTERY, "/Dc/0/Current", Some(Value::Float(0.0)));
    bus.poke(BATTERY, "/Dc/0/Voltage", Some(Value::Float(20.0)));
    let t3 = t2 + Duration::from_secs(1);
    gen.tick(t3, now_utc(), true, &settings, &bus).await.unwrap();
    assert_eq!(gen.running_by_condition_tag(), "batteryvoltage");

    bus.poke(BATTERY, "/Dc/0/Voltage", Some(Value::Float(25.0)));
    let t4 = t3 + Duration::from_secs(1);
    gen.tick(t4, now_utc(), true, &settings, &bus).await.unwrap();
    assert_eq!(gen.state(), GeneratorState::Stopped, "every condition has relinquished");
}

#[tokio::test]
async fn s4_comm_loss_stop_after_five_minutes() {
    let bus = base_bus();
    bus.poke(SYSTEM, "/Ac/Consumption/L1/Power", Some(Value::Float(2000.0)));

    let settings = MemorySettings::new();
    settings.set_by_path("/Settings/Generator0/AutoStartEnabled", Value::Int(1));
    settings.set_by_path("/Settings/Generator0/AcLoad/Enabled", Value::Int(1));
    settings.set_by_path("/Settings/Generator0/AcLoad/StartValue", Value::Float(1000.0));
    settings.set_by_path("/Settings/Generator0/OnLossCommunication", Value::Int(0));

    let mut gen = generator0(&settings).await;
    let t0 = Instant::now();
    gen.tick(t0, now_utc(), true, &settings, &bus).await.unwrap();
    assert_eq!(gen.state(), GeneratorState::Running);

    bus.poke(SYSTEM, "/VebusService", None);
    let t1 = t0 + Duration::from_secs(200);
    gen.tick(t1, now_utc(), true, &settings, &bus).await.unwrap();
    assert_eq!(gen.state(), GeneratorState::Running, "comm loss window has not elapsed yet");

    let t2 = t0 + Duration::from_secs(301);
    gen.tick(t2, now_utc(), true, &settings, &bus).await.unwrap();
    assert_eq!(gen.state(), GeneratorState::Stopped, "5-minute window elapsed, policy 0 stops");
}

#[tokio::test]
async fn s5_testrun_skipped_when_skip_runtime_exceeded() {
    let bus = base_bus();
    let settings = MemorySettings::new();
    settings.set_by_path("/Settings/Generator0/AutoStartEnabled", Value::Int(1));
    settings.set_by_path("/Settings/Generator0/TestRun/Enabled", Value::Int(1));
    settings.set_by_path("/Settings/Generator0/TestRun/Interval", Value::Int(4));
    settings.set_by_path("/Settings/Generator0/TestRun/Duration", Value::Int(10));
    settings.set_by_path("/Settings/Generator0/TestRun/SkipRuntime", Value::Int(1));

    let local_now = now_utc();
    let today_midnight = local_now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
    settings.set_by_path("/Settings/Generator0/TestRun/StartDate", Value::Int(today_midnight / 86_400));
    settings.set_by_path("/Settings/Generator0/TestRun/StartTime", Value::Int(0));
    settings.set_by_path(
        "/Settings/Generator0/AccumulatedDaily",
        Value::Str(format!(r#"{{"{}": 3000}}"#, today_midnight - 86_400)),
    );

    let mut gen = generator0(&settings).await;
    gen.tick(Instant::now(), local_now, true, &settings, &bus).await.unwrap();
    assert_eq!(gen.state(), GeneratorState::Stopped, "yesterday's runtime exceeded SkipRuntime");
}

#[tokio::test]
async fn s6_remote_fault_then_clear_returns_to_prior_state() {
    let genset = "com.victronenergy.genset.socketcan_can1_di0_uc0";
    let bus = base_bus();
    bus.poke(SYSTEM, "/Ac/Consumption/L1/Power", Some(Value::Float(2000.0)));
    bus.seed(
        genset,
        &[("/ErrorCode", Value::Int(0)), ("/AutoStart", Value::Int(1))],
    );

    let settings = MemorySettings::new();
    settings.set_by_path("/Settings/FischerPanda0/AutoStartEnabled", Value::Int(1));
    settings.set_by_path("/Settings/FischerPanda0/AcLoad/Enabled", Value::Int(1));
    settings.set_by_path("/Settings/FischerPanda0/AcLoad/StartValue", Value::Float(1000.0));

    let mut gen = Generator::new("FischerPanda0", OWN_SERVICE.to_string(), Some(genset.to_string()), &settings).await;
    let t0 = Instant::now();
    gen.tick(t0, now_utc(), true, &settings, &bus).await.unwrap();
    assert_eq!(gen.state(), GeneratorState::Running);
    assert_eq!(gen.running_by_condition_tag(), "acload");

    bus.poke(genset, "/ErrorCode", Some(Value::Int(17)));
    let t1 = t0 + Duration::from_secs(1);
    gen.tick(t1, now_utc(), true, &settings, &bus).await.unwrap();
    assert_eq!(gen.state(), GeneratorState::Error);
    assert_eq!(gen.error(), ErrorKind::RemoteInFault);

    bus.poke(genset, "/ErrorCode", Some(Value::Int(0)));
    let t2 = t1 + Duration::from_secs(1);
    gen.tick(t2, now_utc(), true, &settings, &bus).await.unwrap();
    assert_eq!(gen.state(), GeneratorState::Running, "clears back to the condition-driven state");
    assert_eq!(gen.error(), ErrorKind::None);
}

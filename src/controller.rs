//! Top-level orchestration (§5): owns the bus monitor, the settings mirror,
//! and both generator instances, and drives the single-threaded cooperative
//! event loop — a 1 Hz tick plus reactions to bus/settings change
//! notifications, exactly as the original's gobject-style timer loop did.

use crate::bus::{BusMonitor, Reading, Value};
use crate::config::Config;
use crate::engine::Generator;
use crate::error::Result;
use crate::logging::get_logger;
use crate::settings::SettingsMirror;
use crate::telemetry::{battery_device_instance, BATTERY_PREFIX};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::interval;

pub const SYSTEM_SERVICE: &str = "com.victronenergy.system";
const GENSET_PREFIX: &str = "com.victronenergy.genset.";
const TICK_INTERVAL: Duration = Duration::from_secs(1);

fn system_paths() -> &'static [&'static str] {
    &[
        "/Ac/Consumption/L1/Power",
        "/Ac/Consumption/L2/Power",
        "/Ac/Consumption/L3/Power",
        "/Ac/PvOnOutput/L1/Power",
        "/Ac/PvOnOutput/L2/Power",
        "/Ac/PvOnOutput/L3/Power",
        "/Ac/PvOnGrid/L1/Power",
        "/Ac/PvOnGrid/L2/Power",
        "/Ac/PvOnGrid/L3/Power",
        "/Ac/PvOnGenset/L1/Power",
        "/Ac/PvOnGenset/L2/Power",
        "/Ac/PvOnGenset/L3/Power",
        "/Dc/Pv/Power",
        "/Ac/ActiveIn/Source",
        "/AutoSelectedBatteryMeasurement",
        "/VebusService",
        "/Relay/0/State",
    ]
}

fn vebus_paths() -> &'static [&'static str] {
    &[
        "/Ac/Out/L1/P",
        "/Ac/Out/L2/P",
        "/Ac/Out/L3/P",
        "/Ac/Out/P",
        "/Ac/ActiveIn/Connected",
        "/Ac/ActiveIn/ActiveInput",
        "/Alarms/Overload",
        "/Alarms/HighTemperature",
        "/Alarms/L1/Overload",
        "/Alarms/L2/Overload",
        "/Alarms/L3/Overload",
        "/Alarms/L1/HighTemperature",
        "/Alarms/L2/HighTemperature",
        "/Alarms/L3/HighTemperature",
        "/Soc",
    ]
}

fn battery_paths() -> &'static [&'static str] {
    &["/Dc/0/Voltage", "/Dc/0/Current", "/Soc", "/DeviceInstance"]
}

fn genset_paths() -> &'static [&'static str] {
    &["/Start", "/AutoStart", "/ErrorCode", "/Connected", "/ProductId"]
}

fn own_instance_paths(instance: &str) -> Vec<(String, Option<Value>)> {
    [
        "State",
        "RunningByCondition",
        "ManualStart",
        "Error",
        "Alarms/NoGeneratorAtAcIn",
        "Runtime",
        "TodayRuntime",
        "AccumulatedRuntime",
        "Start",
    ]
    .iter()
    .map(|leaf| (format!("/{instance}/{leaf}"), Some(Value::Int(0))))
    .collect()
}

/// Owns the collaborators and both generator records, and drives the event
/// loop described in §5. Construct with [`Controller::new`], then run with
/// [`Controller::run`].
pub struct Controller {
    bus: Arc<dyn BusMonitor>,
    settings: Arc<dyn SettingsMirror>,
    fallback_tz: String,
    watched: Mutex<HashSet<String>>,
    generator0: Generator,
    fischerpanda0: Generator,
}

impl Controller {
    /// Register the owned service tree and the `com.victronenergy.system`
    /// watch, and build both generator records from the settings mirror's
    /// already-restored state.
    pub async fn new(bus: Arc<dyn BusMonitor>, settings: Arc<dyn SettingsMirror>, config: &Config) -> Result<Self> {
        let own_service = format!("com.victronenergy.{}", config.service_name);

        let mut own_paths = HashMap::new();
        own_paths.extend(own_instance_paths("Generator0"));
        own_paths.extend(own_instance_paths("FischerPanda0"));
        bus.add_service(&own_service, own_paths).await?;

        let sys_paths = system_paths().iter().map(|p| ((*p).to_string(), None)).collect();
        bus.add_service(SYSTEM_SERVICE, sys_paths).await?;

        let generator0 = Generator::new("Generator0", own_service.clone(), None, settings.as_ref()).await;
        let fischerpanda0 = Generator::new("FischerPanda0", own_service.clone(), None, settings.as_ref()).await;

        Ok(Self {
            bus,
            settings,
            fallback_tz: config.timezone.clone(),
            watched: Mutex::new(HashSet::from([own_service, SYSTEM_SERVICE.to_string()])),
            generator0,
            fischerpanda0,
        })
    }

    async fn ensure_watched(&self, name: &str, paths: &[&str]) -> Result<()> {
        let already_watched = self.watched.lock().unwrap_or_else(|e| e.into_inner()).contains(name);
        if already_watched {
            return Ok(());
        }
        let initial = paths.iter().map(|p| ((*p).to_string(), None)).collect();
        self.bus.add_service(name, initial).await?;
        self.watched.lock().unwrap_or_else(|e| e.into_inner()).insert(name.to_string());
        Ok(())
    }

    /// Resolve `/AutoSelectedBatteryMeasurement` to a real bus service name.
    ///
    /// The encoded value (e.g. `"com_victronenergy_battery_258/Dc/0"`) is
    /// *not* a sanitized, reversible service name — the trailing number is
    /// the battery's `/DeviceInstance`, which has no relation to the
    /// connection-derived suffix the service is actually registered under
    /// (`com.victronenergy.battery.ttyO5`, say; §B). Resolving it requires
    /// watching every currently known `com.victronenergy.battery.*` service
    /// and matching on `/DeviceInstance`, the same discovery-then-match
    /// shape used for the genset service below.
    async fn discover_battery_service(&self) -> Result<Option<String>> {
        let Reading::Value(v) = self.bus.get_value(SYSTEM_SERVICE, "/AutoSelectedBatteryMeasurement") else {
            return Ok(None);
        };
        let Some(instance) = v.as_str().and_then(battery_device_instance) else {
            return Ok(None);
        };

        for candidate in self.bus.discover_services(BATTERY_PREFIX).await? {
            self.ensure_watched(&candidate, battery_paths()).await?;
            if self.bus.get_value(&candidate, "/DeviceInstance").as_i64() == Some(instance) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Pick up newly-appeared vebus, battery, and genset services as the
    /// system reports them, and return the currently known battery and
    /// genset service names (if any).
    async fn discover_topology(&self) -> Result<(Option<String>, Option<String>)> {
        if let Reading::Value(v) = self.bus.get_value(SYSTEM_SERVICE, "/VebusService")
            && let Some(name) = v.as_str()
        {
            self.ensure_watched(name, vebus_paths()).await?;
        }

        let battery = self.discover_battery_service().await?;

        let genset = self.bus.discover_services(GENSET_PREFIX).await?.into_iter().next();
        if let Some(name) = &genset {
            self.ensure_watched(name, genset_paths()).await?;
        }
        Ok((battery, genset))
    }

    fn resolve_timezone(&self) -> chrono_tz::Tz {
        self.settings
            .get("System/TimeZone")
            .and_then(|v| v.as_str().map(str::to_string))
            .and_then(|s| s.parse::<chrono_tz::Tz>().ok())
            .or_else(|| self.fallback_tz.parse::<chrono_tz::Tz>().ok())
            .unwrap_or(chrono_tz::UTC)
    }

    /// One pass of the event loop (§5): refresh topology, resolve local
    /// time, and tick both generator instances in their fixed order.
    async fn tick_once(&mut self, now: Instant) -> Result<()> {
        let (battery, genset) = self.discover_topology().await?;
        self.fischerpanda0.set_genset_service(genset.clone());
        self.generator0.set_battery_service(battery.clone());
        self.fischerpanda0.set_battery_service(battery);

        let tz = self.resolve_timezone();
        let local_now = Utc::now().with_timezone(&tz);

        let relay_enabled = self.settings.get_i64("Relay/Function", 0) == 1;
        self.generator0
            .tick(now, local_now.clone(), relay_enabled, self.settings.as_ref(), self.bus.as_ref())
            .await?;

        let fischer_enabled = self.settings.get_bool("Services/FischerPandaAutoStartStop", false) && genset.is_some();
        self.fischerpanda0
            .tick(now, local_now, fischer_enabled, self.settings.as_ref(), self.bus.as_ref())
            .await?;

        Ok(())
    }

    /// Run the event loop until the process is asked to stop. Never returns
    /// `Ok` in normal operation — only on a propagated collaborator error,
    /// per §6's "non-zero on unrecoverable bus disconnect" exit contract.
    pub async fn run(mut self) -> Result<()> {
        let logger = get_logger("controller");
        logger.info("entering event loop");

        let mut ticker = interval(TICK_INTERVAL);
        let mut bus_rx = self.bus.subscribe();
        let mut settings_rx = self.settings.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = bus_rx.recv() => {}
                _ = settings_rx.recv() => {}
            }

            if let Err(e) = self.tick_once(Instant::now()).await {
                logger.error(&format!("tick failed: {e}"));
                return Err(e);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn generator0(&self) -> &Generator {
        &self.generator0
    }

    #[cfg(test)]
    pub(crate) fn fischerpanda0(&self) -> &Generator {
        &self.fischerpanda0
    }

    #[cfg(test)]
    pub(crate) async fn tick_for_test(&mut self, now: Instant) -> Result<()> {
        self.tick_once(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBus;
    use crate::engine::GeneratorState;
    use crate::settings::memory::MemorySettings;

    async fn seeded() -> (Controller, Arc<MemoryBus>, Arc<MemorySettings>) {
        let bus = Arc::new(MemoryBus::new());
        let settings = Arc::new(MemorySettings::new());
        bus.seed(
            SYSTEM_SERVICE,
            &[
                ("/Ac/Consumption/L1/Power", Value::Float(0.0)),
                ("/Ac/Consumption/L2/Power", Value::Float(0.0)),
                ("/Ac/Consumption/L3/Power", Value::Float(0.0)),
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
                ("/Ac/Out/L1/P", Value::Float(0.0)),
                ("/Ac/Out/L2/P", Value::Float(0.0)),
                ("/Ac/Out/L3/P", Value::Float(0.0)),
                ("/Ac/Out/P", Value::Float(0.0)),
                ("/Ac/ActiveIn/ActiveInput", Value::Int(1)),
                ("/Ac/ActiveIn/Connected", Value::Int(0)),
                ("/Soc", Value::Float(87.0)),
            ],
        );
        bus.seed(
            "com.victronenergy.battery.ttyO5",
            &[
                ("/DeviceInstance", Value::Int(258)),
                ("/Dc/0/Voltage", Value::Float(14.4)),
                ("/Dc/0/Current", Value::Float(10.0)),
            ],
        );
        settings.set_by_path("/Settings/Relay/Function", Value::Int(1));

        let config = Config::default();
        let controller = Controller::new(bus.clone(), settings.clone(), &config).await.unwrap();
        (controller, bus, settings)
    }

    #[tokio::test]
    async fn test_registers_own_service_tree() {
        let (_controller, bus, _settings) = seeded().await;
        assert_eq!(
            bus.get_value("com.victronenergy.generator.startstop0", "/Generator0/State").as_i64(),
            Some(0)
        );
    }

    #[tokio::test]
    async fn test_relay_disabled_forces_stopped_without_ticking_conditions() {
        let (mut controller, bus, settings) = seeded().await;
        settings.set_by_path("/Settings/Relay/Function", Value::Int(0));
        bus.seed("com.victronenergy.vebus.ttyO1", &[("/Ac/Out/P", Value::Float(5000.0))]);
        controller.tick_for_test(Instant::now()).await.unwrap();
        assert_eq!(controller.generator0().state(), GeneratorState::Stopped);
    }

    #[tokio::test]
    async fn test_discovers_genset_and_ticks_fischerpanda() {
        let (mut controller, bus, settings) = seeded().await;
        bus.seed(
            "com.victronenergy.genset.socketcan_can1_di0_uc0",
            &[
                ("/Start", Value::Int(0)),
                ("/AutoStart", Value::Int(1)),
                ("/Connected", Value::Int(1)),
                ("/ErrorCode", Value::Int(0)),
            ],
        );
        settings.set_by_path("/Settings/Services/FischerPandaAutoStartStop", Value::Int(1));
        controller.tick_for_test(Instant::now()).await.unwrap();
        assert_eq!(controller.fischerpanda0().error(), crate::engine::ErrorKind::None);
    }
}

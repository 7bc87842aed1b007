//! Real [`BusMonitor`] backed by the Venus OS D-Bus system bus.
//!
//! Every Victron service exposes each path as a `com.victronenergy.BusItem`
//! object implementing `GetValue`/`SetValue` and a `PropertiesChanged` signal.
//! We mirror a declared set of paths per service: on `add_service` we read
//! the initial value of each path once, then rely entirely on
//! `PropertiesChanged` notifications delivered by a background task per
//! watched path — the core itself never polls.

use super::{BusMonitor, ChangeEvent, ChangeKind, Reading, Value};
use crate::error::{GenstartError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use zbus::zvariant::Value as ZValue;
use zbus::{Connection, proxy};

const CHANNEL_CAPACITY: usize = 256;

#[proxy(
    interface = "com.victronenergy.BusItem",
    default_service = "com.victronenergy.system"
)]
trait BusItem {
    #[zbus(name = "GetValue")]
    fn get_value(&self) -> zbus::Result<zbus::zvariant::OwnedValue>;

    #[zbus(name = "SetValue")]
    fn set_value(&self, value: zbus::zvariant::Value<'_>) -> zbus::Result<i32>;

    #[zbus(signal, name = "PropertiesChanged")]
    fn properties_changed(
        &self,
        changes: HashMap<String, zbus::zvariant::OwnedValue>,
    ) -> zbus::Result<()>;
}

#[derive(Default)]
struct Snapshot {
    services: HashMap<String, HashMap<String, Option<Value>>>,
}

/// D-Bus-backed bus monitor.
pub struct VictronBus {
    connection: Connection,
    snapshot: Mutex<Snapshot>,
    tx: broadcast::Sender<ChangeEvent>,
}

impl VictronBus {
    /// Connect to the Venus OS system bus (or session bus in development,
    /// selected via `DBUS_SESSION_BUS_ADDRESS` being set).
    pub async fn connect() -> Result<Arc<Self>> {
        let connection = Connection::system()
            .await
            .map_err(|e| GenstartError::bus(format!("failed to connect to system bus: {e}")))?;
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Ok(Arc::new(Self {
            connection,
            snapshot: Mutex::new(Snapshot::default()),
            tx,
        }))
    }

    async fn build_proxy(&self, service: &str, path: &str) -> Result<BusItemProxy<'_>> {
        BusItemProxy::builder(&self.connection)
            .destination(service.to_string())
            .map_err(|e| GenstartError::bus(e.to_string()))?
            .path(path.to_string())
            .map_err(|e| GenstartError::bus(e.to_string()))?
            .build()
            .await
            .map_err(|e| GenstartError::bus(e.to_string()))
    }

    async fn read_one(&self, service: &str, path: &str) -> Reading {
        let Ok(proxy) = self.build_proxy(service, path).await else {
            return Reading::Absent;
        };
        match proxy.get_value().await {
            Ok(owned) => owned_to_reading(&owned),
            Err(_) => Reading::Null,
        }
    }

    /// Start watching a registered path for signal-driven updates. Spawns a
    /// background task that lives for the process lifetime; the core never
    /// awaits it directly, only reacts to the events it forwards.
    pub fn watch(self: &Arc<Self>, service: &str, path: &str) {
        let this = Arc::clone(self);
        let service = service.to_string();
        let path = path.to_string();
        tokio::spawn(async move {
            let Ok(proxy) = this.build_proxy(&service, &path).await else {
                return;
            };
            let Ok(mut stream) = proxy.receive_properties_changed().await else {
                return;
            };
            use tokio_stream::StreamExt;
            while let Some(signal) = stream.next().await {
                let Ok(args) = signal.args() else { continue };
                if let Some(v) = args.changes.get("Value") {
                    let reading = owned_to_reading(v);
                    this.store_and_notify(&service, &path, reading);
                }
            }
        });
    }

    fn store_and_notify(&self, service: &str, path: &str, reading: Reading) {
        let value = match reading {
            Reading::Value(v) => Some(v),
            _ => None,
        };
        {
            let mut snap = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = snap.services.get_mut(service) {
                entry.insert(path.to_string(), value);
            }
        }
        let _ = self.tx.send(ChangeEvent {
            service: service.to_string(),
            path: path.to_string(),
            kind: ChangeKind::ValueChanged,
        });
    }
}

fn owned_to_reading(value: &zbus::zvariant::OwnedValue) -> Reading {
    let zv: &ZValue = value;
    match zv {
        ZValue::I16(i) => Reading::Value(Value::Int(*i as i64)),
        ZValue::I32(i) => Reading::Value(Value::Int(*i as i64)),
        ZValue::I64(i) => Reading::Value(Value::Int(*i)),
        ZValue::U8(i) => Reading::Value(Value::Int(*i as i64)),
        ZValue::U16(i) => Reading::Value(Value::Int(*i as i64)),
        ZValue::U32(i) => Reading::Value(Value::Int(*i as i64)),
        ZValue::U64(i) => Reading::Value(Value::Int(*i as i64)),
        ZValue::F64(f) => Reading::Value(Value::Float(*f)),
        ZValue::Str(s) => Reading::Value(Value::Str(s.to_string())),
        ZValue::Array(arr) if arr.is_empty() => Reading::Null,
        _ => Reading::Null,
    }
}

#[async_trait]
impl BusMonitor for VictronBus {
    async fn add_service(
        &self,
        name: &str,
        initial_values: HashMap<String, Option<Value>>,
    ) -> Result<()> {
        let mut values = initial_values;
        for (path, slot) in values.iter_mut() {
            if let Reading::Value(v) = self.read_one(name, path).await {
                *slot = Some(v);
            }
        }

        let paths: Vec<String> = values.keys().cloned().collect();

        {
            let mut snap = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
            snap.services.insert(name.to_string(), values);
        }

        for path in paths {
            self.watch(name, &path);
        }

        let _ = self.tx.send(ChangeEvent {
            service: name.to_string(),
            path: String::new(),
            kind: ChangeKind::ServiceAdded,
        });

        Ok(())
    }

    async fn remove_service(&self, name: &str) -> Result<()> {
        {
            let mut snap = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
            snap.services.remove(name);
        }
        let _ = self.tx.send(ChangeEvent {
            service: name.to_string(),
            path: String::new(),
            kind: ChangeKind::ServiceRemoved,
        });
        Ok(())
    }

    async fn set_value(&self, name: &str, path: &str, value: Option<Value>) -> Result<()> {
        let proxy = self.build_proxy(name, path).await?;

        let zvalue = match &value {
            Some(Value::Int(i)) => ZValue::from(*i as i32),
            Some(Value::Float(f)) => ZValue::from(*f),
            Some(Value::Str(s)) => ZValue::from(s.as_str()),
            None => ZValue::from(0i32),
        };

        proxy
            .set_value(zvalue)
            .await
            .map_err(|e| GenstartError::bus(format!("SetValue {name}{path} failed: {e}")))?;

        let mut snap = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = snap.services.get_mut(name) {
            entry.insert(path.to_string(), value);
        }

        Ok(())
    }

    fn get_value(&self, name: &str, path: &str) -> Reading {
        let snap = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        match snap.services.get(name) {
            None => Reading::Absent,
            Some(service) => match service.get(path) {
                None | Some(None) => Reading::Null,
                Some(Some(v)) => Reading::Value(v.clone()),
            },
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    async fn discover_services(&self, prefix: &str) -> Result<Vec<String>> {
        let proxy = zbus::fdo::DBusProxy::new(&self.connection)
            .await
            .map_err(|e| GenstartError::bus(format!("DBusProxy creation failed: {e}")))?;
        let names = proxy
            .list_names()
            .await
            .map_err(|e| GenstartError::bus(format!("ListNames failed: {e}")))?;
        Ok(names.into_iter().map(|n| n.to_string()).filter(|n| n.starts_with(prefix)).collect())
    }
}

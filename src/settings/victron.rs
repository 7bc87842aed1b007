//! Real [`SettingsMirror`] backed by `com.victronenergy.settings`.
//!
//! Uses the same `com.victronenergy.BusItem` GetValue/SetValue/PropertiesChanged
//! contract as the bus monitor, scoped to the settings service.

use super::registry::all_entries;
use super::{SettingChange, SettingsMirror};
use crate::bus::Value;
use crate::error::{GenstartError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use zbus::zvariant::Value as ZValue;
use zbus::{Connection, proxy};

const SETTINGS_SERVICE: &str = "com.victronenergy.settings";
const CHANNEL_CAPACITY: usize = 256;

#[proxy(
    interface = "com.victronenergy.BusItem",
    default_service = "com.victronenergy.settings"
)]
trait SettingsItem {
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

struct Store {
    values: HashMap<String, Value>,
    short_name_to_path: HashMap<String, String>,
    path_to_short_name: HashMap<String, String>,
}

/// D-Bus-backed settings mirror.
pub struct VictronSettings {
    connection: Connection,
    store: Mutex<Store>,
    tx: broadcast::Sender<SettingChange>,
}

impl VictronSettings {
    /// Connect and perform the initial read of every registered settings
    /// path, then start a background watcher per path.
    pub async fn connect() -> Result<Arc<Self>> {
        let connection = Connection::system()
            .await
            .map_err(|e| GenstartError::bus(format!("failed to connect to system bus: {e}")))?;

        let entries = all_entries();
        let mut values = HashMap::new();
        let mut short_name_to_path = HashMap::new();
        let mut path_to_short_name = HashMap::new();

        for entry in &entries {
            short_name_to_path.insert(entry.short_name.clone(), entry.path.clone());
            path_to_short_name.insert(entry.path.clone(), entry.short_name.clone());
            values.insert(entry.short_name.clone(), entry.default.clone());
        }

        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        let mirror = Arc::new(Self {
            connection,
            store: Mutex::new(Store {
                values,
                short_name_to_path,
                path_to_short_name,
            }),
            tx,
        });

        for entry in &entries {
            if let Ok(read) = mirror.read_one(&entry.path).await {
                mirror.store_value(&entry.short_name, read);
            }
            mirror.watch(entry.path.clone(), entry.short_name.clone());
        }

        Ok(mirror)
    }

    async fn build_proxy(&self, path: &str) -> Result<SettingsItemProxy<'_>> {
        SettingsItemProxy::builder(&self.connection)
            .destination(SETTINGS_SERVICE)
            .map_err(|e| GenstartError::settings(e.to_string()))?
            .path(path.to_string())
            .map_err(|e| GenstartError::settings(e.to_string()))?
            .build()
            .await
            .map_err(|e| GenstartError::settings(e.to_string()))
    }

    async fn read_one(&self, path: &str) -> Result<Value> {
        let proxy = self.build_proxy(path).await?;
        let owned = proxy
            .get_value()
            .await
            .map_err(|e| GenstartError::settings(format!("GetValue {path} failed: {e}")))?;
        Ok(owned_to_value(&owned))
    }

    fn store_value(&self, short_name: &str, value: Value) {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.values.insert(short_name.to_string(), value);
    }

    fn watch(self: &Arc<Self>, path: String, short_name: String) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(proxy) = this.build_proxy(&path).await else {
                return;
            };
            let Ok(mut stream) = proxy.receive_properties_changed().await else {
                return;
            };
            use tokio_stream::StreamExt;
            while let Some(signal) = stream.next().await {
                let Ok(args) = signal.args() else { continue };
                if let Some(v) = args.changes.get("Value") {
                    let value = owned_to_value(v);
                    this.store_value(&short_name, value.clone());
                    let _ = this.tx.send(SettingChange {
                        short_name: short_name.clone(),
                        value,
                    });
                }
            }
        });
    }
}

fn owned_to_value(value: &zbus::zvariant::OwnedValue) -> Value {
    let zv: &ZValue = value;
    match zv {
        ZValue::I16(i) => Value::Int(*i as i64),
        ZValue::I32(i) => Value::Int(*i as i64),
        ZValue::I64(i) => Value::Int(*i),
        ZValue::U8(i) => Value::Int(*i as i64),
        ZValue::U16(i) => Value::Int(*i as i64),
        ZValue::U32(i) => Value::Int(*i as i64),
        ZValue::U64(i) => Value::Int(*i as i64),
        ZValue::F64(f) => Value::Float(*f),
        ZValue::Str(s) => Value::Str(s.to_string()),
        _ => Value::Int(0),
    }
}

fn value_to_zvalue(value: &Value) -> ZValue<'static> {
    match value {
        Value::Int(i) => ZValue::from(*i as i32),
        Value::Float(f) => ZValue::from(*f),
        Value::Str(s) => ZValue::from(s.clone()),
    }
}

#[async_trait]
impl SettingsMirror for VictronSettings {
    fn get(&self, short_name: &str) -> Option<Value> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.values.get(short_name).cloned()
    }

    async fn set(&self, short_name: &str, value: Value) -> Result<()> {
        let path = {
            let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            store
                .short_name_to_path
                .get(short_name)
                .cloned()
                .ok_or_else(|| GenstartError::settings(format!("unknown short-name: {short_name}")))?
        };

        let proxy = self.build_proxy(&path).await?;
        proxy
            .set_value(value_to_zvalue(&value))
            .await
            .map_err(|e| GenstartError::settings(format!("SetValue {path} failed: {e}")))?;

        self.store_value(short_name, value);
        Ok(())
    }

    fn short_name_of(&self, path: &str) -> Option<String> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.path_to_short_name.get(path).cloned()
    }

    fn subscribe(&self) -> broadcast::Receiver<SettingChange> {
        self.tx.subscribe()
    }
}

//! In-memory [`SettingsMirror`] double, mirroring the role of the original
//! test suite's `MockSettingsDevice`.

use super::registry::{all_entries, Entry};
use super::{SettingChange, SettingsMirror};
use crate::bus::Value;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

struct Store {
    values: HashMap<String, Value>,
    path_to_short_name: HashMap<String, String>,
}

/// An in-process settings mirror used by unit and integration tests. Seeded
/// with the full registry's defaults so every short-name the crate might
/// query resolves to something, exactly like a freshly provisioned
/// Venus OS settings node.
pub struct MemorySettings {
    store: Mutex<Store>,
    tx: broadcast::Sender<SettingChange>,
}

impl MemorySettings {
    pub fn new() -> Self {
        let entries: Vec<Entry> = all_entries();
        let mut values = HashMap::new();
        let mut path_to_short_name = HashMap::new();
        for entry in entries {
            path_to_short_name.insert(entry.path.clone(), entry.short_name.clone());
            values.insert(entry.short_name, entry.default);
        }
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            store: Mutex::new(Store {
                values,
                path_to_short_name,
            }),
            tx,
        }
    }

    /// Test convenience mirroring the original suite's `_set_setting(path, value)`.
    pub fn set_by_path(&self, path: &str, value: Value) {
        let short_name = {
            let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            store.path_to_short_name.get(path).cloned()
        };
        if let Some(short_name) = short_name {
            self.set_by_short_name(&short_name, value);
        }
    }

    fn set_by_short_name(&self, short_name: &str, value: Value) {
        {
            let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            store.values.insert(short_name.to_string(), value.clone());
        }
        let _ = self.tx.send(SettingChange {
            short_name: short_name.to_string(),
            value,
        });
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettingsMirror for MemorySettings {
    fn get(&self, short_name: &str) -> Option<Value> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.values.get(short_name).cloned()
    }

    async fn set(&self, short_name: &str, value: Value) -> Result<()> {
        self.set_by_short_name(short_name, value);
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

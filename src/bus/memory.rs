//! In-memory [`BusMonitor`] double, mirroring the role of the original test
//! suite's `MockDbusMonitor` and its `dummy*.py` fixture services.

use super::{BusMonitor, ChangeEvent, ChangeKind, Reading, Value};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct Snapshot {
    services: HashMap<String, HashMap<String, Option<Value>>>,
}

/// An in-process bus used by unit and integration tests. Behaves exactly
/// like the real monitor's contract: absent services return [`Reading::Absent`],
/// present-but-unset paths return [`Reading::Null`].
pub struct MemoryBus {
    snapshot: Mutex<Snapshot>,
    tx: broadcast::Sender<ChangeEvent>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            snapshot: Mutex::new(Snapshot::default()),
            tx,
        }
    }

    /// Synchronous convenience used heavily by tests to seed fixtures.
    pub fn seed(&self, name: &str, values: &[(&str, Value)]) {
        let mut snap = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        let entry = snap.services.entry(name.to_string()).or_default();
        for (path, value) in values {
            entry.insert((*path).to_string(), Some(value.clone()));
        }
    }

    /// Convenience for tests: set a single value and emit a change event.
    pub fn poke(&self, name: &str, path: &str, value: Option<Value>) {
        let present = {
            let mut snap = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(service) = snap.services.get_mut(name) {
                service.insert(path.to_string(), value);
                true
            } else {
                false
            }
        };
        if present {
            let _ = self.tx.send(ChangeEvent {
                service: name.to_string(),
                path: path.to_string(),
                kind: ChangeKind::ValueChanged,
            });
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusMonitor for MemoryBus {
    async fn add_service(
        &self,
        name: &str,
        initial_values: HashMap<String, Option<Value>>,
    ) -> Result<()> {
        {
            let mut snap = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
            snap.services.insert(name.to_string(), initial_values);
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
        self.poke(name, path, value);
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
        let snap = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        Ok(snap.services.keys().filter(|n| n.starts_with(prefix)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_absent_service_reads_null() {
        let bus = MemoryBus::new();
        assert_eq!(bus.get_value("com.victronenergy.vebus.ttyO1", "/Soc"), Reading::Absent);
    }

    #[tokio::test]
    async fn test_present_but_unset_path_reads_null() {
        let bus = MemoryBus::new();
        bus.add_service("com.victronenergy.vebus.ttyO1", HashMap::new())
            .await
            .unwrap();
        assert_eq!(bus.get_value("com.victronenergy.vebus.ttyO1", "/Soc"), Reading::Null);
    }

    #[tokio::test]
    async fn test_set_value_and_read_back() {
        let bus = MemoryBus::new();
        bus.add_service("com.victronenergy.vebus.ttyO1", HashMap::new())
            .await
            .unwrap();
        bus.set_value("com.victronenergy.vebus.ttyO1", "/Soc", Some(Value::Float(55.0)))
            .await
            .unwrap();
        assert_eq!(
            bus.get_value("com.victronenergy.vebus.ttyO1", "/Soc").as_f64(),
            Some(55.0)
        );
    }

    #[tokio::test]
    async fn test_subscribers_see_change_events() {
        let bus = MemoryBus::new();
        let mut rx = bus.subscribe();
        bus.add_service("com.victronenergy.system", HashMap::new())
            .await
            .unwrap();
        let evt = rx.recv().await.unwrap();
        assert_eq!(evt.kind, ChangeKind::ServiceAdded);
    }

    #[tokio::test]
    async fn test_discover_services_by_prefix() {
        let bus = MemoryBus::new();
        bus.add_service("com.victronenergy.genset.socketcan_can1_di0_uc0", HashMap::new())
            .await
            .unwrap();
        bus.add_service("com.victronenergy.vebus.ttyO1", HashMap::new()).await.unwrap();
        let found = bus.discover_services("com.victronenergy.genset.").await.unwrap();
        assert_eq!(found, vec!["com.victronenergy.genset.socketcan_can1_di0_uc0".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_service_makes_reads_absent() {
        let bus = MemoryBus::new();
        bus.add_service("com.victronenergy.system", HashMap::new())
            .await
            .unwrap();
        bus.remove_service("com.victronenergy.system").await.unwrap();
        assert_eq!(
            bus.get_value("com.victronenergy.system", "/Ac/ActiveIn/Source"),
            Reading::Absent
        );
    }
}

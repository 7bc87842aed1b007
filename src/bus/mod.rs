//! Bus Monitor collaborator contract
//!
//! The bus monitor mirrors a declared set of remote service paths into a
//! local snapshot and notifies subscribers on value changes and service
//! appearance/disappearance. The core never polls it; it only reacts to
//! change notifications delivered on the broadcast channel returned by
//! [`BusMonitor::subscribe`].
//!
//! Two implementations exist: [`victron`] talks to the real D-Bus system bus
//! used by Venus OS, and [`memory`] is an in-process test double standing in
//! for the dummy services used by the original implementation's test suite.

pub mod memory;
pub mod victron;

use async_trait::async_trait;
use std::collections::HashMap;

/// A scalar value carried by a bus path.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Str(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

/// Result of reading a single `(service, path)` pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// The service is not present on the bus at all.
    Absent,
    /// The service is present but the value is unavailable.
    Null,
    /// A concrete value.
    Value(Value),
}

impl Reading {
    pub fn is_absent(&self) -> bool {
        matches!(self, Reading::Absent)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Reading::Value(v) => v.as_f64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Reading::Value(v) => v.as_i64(),
            _ => None,
        }
    }
}

/// Notification delivered when a mirrored value changes, or when a service
/// appears/disappears (`path` is empty for service-level events).
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub service: String,
    pub path: String,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    ValueChanged,
    ServiceAdded,
    ServiceRemoved,
}

/// Collaborator contract for the bus monitor (§4.1).
#[async_trait]
pub trait BusMonitor: Send + Sync {
    /// Register a service and its initial set of path values.
    async fn add_service(
        &self,
        name: &str,
        initial_values: HashMap<String, Option<Value>>,
    ) -> crate::error::Result<()>;

    /// Remove a service and everything mirrored under it.
    async fn remove_service(&self, name: &str) -> crate::error::Result<()>;

    /// Write a value to a remote path (used for `/Start`, `/ManualStart`, etc).
    async fn set_value(
        &self,
        name: &str,
        path: &str,
        value: Option<Value>,
    ) -> crate::error::Result<()>;

    /// Read the last mirrored value for `(name, path)`.
    fn get_value(&self, name: &str, path: &str) -> Reading;

    /// Subscribe to change notifications. Each subscriber gets an
    /// independent receiver; lagging subscribers observe a gap, not a panic.
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ChangeEvent>;

    /// List currently-known service names starting with `prefix`, e.g.
    /// `"com.victronenergy.genset."` to find the CAN-connected Fischer-Panda
    /// device without hardcoding its bus-address suffix.
    async fn discover_services(&self, prefix: &str) -> crate::error::Result<Vec<String>>;
}

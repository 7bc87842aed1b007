//! Settings Mirror collaborator contract (§4.2)
//!
//! Mirrors the configuration paths under `com.victronenergy.settings` into a
//! local keyed store addressed by short-name, with a reverse path lookup and
//! change notifications. Writes round-trip through the remote settings
//! service; reads return the last acknowledged value.

pub mod memory;
pub mod registry;
pub mod victron;

use crate::bus::Value;
use crate::error::Result;
use async_trait::async_trait;

/// Notification that a short-name's value changed, carrying the new value.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingChange {
    pub short_name: String,
    pub value: Value,
}

/// Collaborator contract for the settings mirror.
#[async_trait]
pub trait SettingsMirror: Send + Sync {
    /// Current value for a short-name, if known.
    fn get(&self, short_name: &str) -> Option<Value>;

    /// Write a value, round-tripping through the remote settings service.
    async fn set(&self, short_name: &str, value: Value) -> Result<()>;

    /// Reverse lookup: which short-name (if any) mirrors this settings path.
    fn short_name_of(&self, path: &str) -> Option<String>;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SettingChange>;

    /// Convenience: read as f64, falling back to `default` if unset.
    fn get_f64(&self, short_name: &str, default: f64) -> f64 {
        self.get(short_name).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    /// Convenience: read as i64, falling back to `default` if unset.
    fn get_i64(&self, short_name: &str, default: i64) -> i64 {
        self.get(short_name).and_then(|v| v.as_i64()).unwrap_or(default)
    }

    /// Convenience: read as bool (nonzero), falling back to `default`.
    fn get_bool(&self, short_name: &str, default: bool) -> bool {
        self.get(short_name)
            .and_then(|v| v.as_i64())
            .map(|i| i != 0)
            .unwrap_or(default)
    }
}

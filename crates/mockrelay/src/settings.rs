//! Runtime settings.
//!
//! Persisted through the keyed store as one key per setting so the file stays
//! hand-editable. Unknown keys are preserved across load/save; the version
//! key drives forward-only migration at startup.

use crate::error::StoreError;
use crate::events::{EventBus, Topic};
use crate::store::KeyedStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Current settings schema version.
pub const SETTINGS_VERSION: u64 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub version: u64,
    /// Default upstream timeout for proxy mocks without their own.
    pub proxy_timeout_ms: u64,
    /// Request ledger cap; zero means uncapped.
    pub history_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            proxy_timeout_ms: 10_000,
            history_limit: 1_000,
        }
    }
}

/// Persistent settings table.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<KeyedStore<Value>>,
    bus: EventBus,
}

impl SettingsStore {
    pub fn open<P: AsRef<Path>>(path: P, bus: EventBus) -> Result<Self, StoreError> {
        Ok(Self {
            inner: Arc::new(KeyedStore::open(path)?),
            bus,
        })
    }

    /// Shared handle to the backing store, for watcher wiring.
    pub fn keyed(&self) -> Arc<KeyedStore<Value>> {
        Arc::clone(&self.inner)
    }

    /// Current settings; absent or unreadable keys fall back to defaults.
    pub fn load(&self) -> Settings {
        let map: serde_json::Map<String, Value> = self.inner.all().into_iter().collect();
        serde_json::from_value(Value::Object(map)).unwrap_or_default()
    }

    /// Write every settings field back as its own key, preserving any
    /// unknown keys already in the file.
    pub fn save(&self, settings: &Settings) -> Result<(), StoreError> {
        let encoded = serde_json::to_value(settings)?;
        let Value::Object(fields) = encoded else {
            return Ok(());
        };
        let mut entries = self.inner.all();
        for (key, value) in fields {
            if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = value;
            } else {
                entries.push((key, value));
            }
        }
        self.inner.replace_all(entries)
    }

    /// Bring a stale settings file up to the current schema version.
    /// Migration is forward-only; a newer-than-known version is left alone.
    pub fn migrate(&self) -> Result<Settings, StoreError> {
        let mut settings = self.load();
        if settings.version >= SETTINGS_VERSION {
            return Ok(settings);
        }
        let from = settings.version;
        // v1 -> v2: history cap introduced; older files get the default.
        if settings.history_limit == 0 && from < 2 {
            settings.history_limit = Settings::default().history_limit;
        }
        settings.version = SETTINGS_VERSION;
        self.save(&settings)?;
        info!(from, to = SETTINGS_VERSION, "migrated settings schema");
        Ok(settings)
    }

    /// Merge a partial update into the current settings. Only keys present
    /// in `patch` change; the version key cannot be patched. A patch whose
    /// values do not decode is rejected without touching persisted state.
    pub fn update(&self, patch: &Value) -> Result<Settings, StoreError> {
        let current = self.load();
        let mut merged = serde_json::to_value(&current)?;
        if let (Value::Object(target), Value::Object(fields)) = (&mut merged, patch) {
            for (key, value) in fields {
                if key == "version" {
                    continue;
                }
                target.insert(key.clone(), value.clone());
            }
        }
        let updated: Settings = serde_json::from_value(merged)
            .map_err(|e| StoreError::Invalid(format!("settings patch rejected: {e}")))?;
        self.save(&updated)?;
        self.bus.emit(
            Topic::SettingsChanged,
            serde_json::to_value(&updated).unwrap_or(Value::Null),
        );
        Ok(updated)
    }
}

//! Generic persistent keyed store.
//!
//! A `KeyedStore<T>` is an insertion-ordered map persisted as a single JSON
//! object file. The file may be edited externally; a watcher task polls its
//! mtime and reloads in-memory state when it changes. Conflicts between an
//! external edit and an unflushed in-process write resolve last-writer-wins;
//! there is no conflict detection.

mod paginate;

pub use paginate::{paginate, Page, PageQuery, Pagination};

use crate::error::StoreError;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

struct StoreInner<T> {
    entries: Vec<(String, T)>,
    /// Mtime fingerprint of our own last flush, used by the watcher to tell
    /// external edits apart from in-process writes.
    flushed_at: Option<SystemTime>,
}

/// Insertion-ordered, file-backed map with pagination/search/sort.
pub struct KeyedStore<T> {
    path: PathBuf,
    inner: RwLock<StoreInner<T>>,
}

impl<T> KeyedStore<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open a store backed by `path`, loading existing state if present.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let (entries, flushed_at) = if path.exists() {
            let entries = Self::load_entries(&path)?;
            let mtime = fs::metadata(&path).and_then(|m| m.modified()).ok();
            (entries, mtime)
        } else {
            (Vec::new(), None)
        };
        debug!(path = %path.display(), entries = entries.len(), "opened keyed store");
        Ok(Self {
            path,
            inner: RwLock::new(StoreInner {
                entries,
                flushed_at,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let inner = self.inner.read();
        inner
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        let inner = self.inner.read();
        inner.entries.iter().any(|(k, _)| k == key)
    }

    /// Insert or replace a value, flushing to disk. An existing key keeps
    /// its position in iteration order.
    pub fn set(&self, key: &str, value: T) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if let Some(slot) = inner.entries.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            inner.entries.push((key.to_string(), value));
        }
        self.flush(&mut inner)
    }

    /// Remove a key. Returns whether anything was removed.
    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner.entries.retain(|(k, _)| k != key);
        if inner.entries.len() == before {
            return Ok(false);
        }
        self.flush(&mut inner)?;
        Ok(true)
    }

    /// All entries in insertion order.
    pub fn all(&self) -> Vec<(String, T)> {
        self.inner.read().entries.clone()
    }

    /// All values in insertion order.
    pub fn values(&self) -> Vec<T> {
        self.inner
            .read()
            .entries
            .iter()
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Drop every entry and flush the empty map.
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.entries.clear();
        self.flush(&mut inner)
    }

    /// Replace the whole table, preserving the given order.
    pub fn replace_all(&self, entries: Vec<(String, T)>) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.entries = entries;
        self.flush(&mut inner)
    }

    /// Paginated listing with search and stable sort.
    pub fn paginate(&self, page: usize, page_size: usize, query: &PageQuery) -> Page<T> {
        let inner = self.inner.read();
        paginate::paginate(&inner.entries, page, page_size, query)
    }

    /// Reload from disk when the file was modified by someone else.
    ///
    /// Returns whether a reload happened. A deleted backing file empties the
    /// in-memory state (last external write wins).
    pub fn reload_if_changed(&self) -> Result<bool, StoreError> {
        let disk_mtime = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        let mut inner = self.inner.write();
        if disk_mtime == inner.flushed_at {
            return Ok(false);
        }
        match disk_mtime {
            Some(mtime) => {
                let entries = Self::load_entries(&self.path)?;
                debug!(
                    path = %self.path.display(),
                    entries = entries.len(),
                    "external change detected, reloading store"
                );
                inner.entries = entries;
                inner.flushed_at = Some(mtime);
            }
            None => {
                debug!(path = %self.path.display(), "backing file removed, clearing store");
                inner.entries.clear();
                inner.flushed_at = None;
            }
        }
        Ok(true)
    }

    /// Spawn a background task polling the backing file for external edits.
    pub fn spawn_watcher(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.reload_if_changed() {
                    warn!(path = %self.path.display(), error = %e, "store reload failed");
                }
            }
        })
    }

    fn load_entries(path: &Path) -> Result<Vec<(String, T)>, StoreError> {
        let text = fs::read_to_string(path).map_err(|e| StoreError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let map: serde_json::Map<String, Value> =
            serde_json::from_str(&text).map_err(|e| StoreError::Decode {
                path: path.display().to_string(),
                source: e,
            })?;
        map.into_iter()
            .map(|(key, value)| {
                serde_json::from_value(value)
                    .map(|v| (key, v))
                    .map_err(|e| StoreError::Decode {
                        path: path.display().to_string(),
                        source: e,
                    })
            })
            .collect()
    }

    fn flush(&self, inner: &mut StoreInner<T>) -> Result<(), StoreError> {
        let mut map = serde_json::Map::new();
        for (key, value) in &inner.entries {
            map.insert(key.clone(), serde_json::to_value(value)?);
        }
        let text = serde_json::to_string_pretty(&Value::Object(map))?;
        fs::write(&self.path, text).map_err(|e| StoreError::Write {
            path: self.path.display().to_string(),
            source: e,
        })?;
        inner.flushed_at = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        Ok(())
    }
}

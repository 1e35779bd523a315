//! Rule store: the single writer of mock definitions.
//!
//! Specializes the keyed store to `Rule` records, derives composite
//! identities, maintains group/tag views, and emits a config-changed event
//! on every CRUD mutation so the control plane can rebroadcast. Internal
//! write-backs (hit counts, stateful cursors) persist without an event.

use crate::error::MockError;
use crate::events::{EventBus, Topic};
use crate::matcher;
use crate::mock::types::{RequestDescriptor, Rule};
use crate::store::{KeyedStore, Page, PageQuery};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct MockStore {
    inner: Arc<KeyedStore<Rule>>,
    bus: EventBus,
}

impl MockStore {
    pub fn open<P: AsRef<Path>>(path: P, bus: EventBus) -> Result<Self, MockError> {
        Ok(Self {
            inner: Arc::new(KeyedStore::open(path)?),
            bus,
        })
    }

    /// Handle to the underlying keyed store, for watcher wiring.
    pub fn keyed(&self) -> Arc<KeyedStore<Rule>> {
        Arc::clone(&self.inner)
    }

    /// Create a rule. Derives the id when absent; rejects duplicates.
    pub fn create(&self, mut rule: Rule) -> Result<Rule, MockError> {
        rule.ensure_id();
        rule.validate()?;
        if self.inner.contains(&rule.id) {
            return Err(MockError::Duplicate(rule.id));
        }
        self.inner.set(&rule.id.clone(), rule.clone())?;
        debug!(id = %rule.id, kind = rule.kind().as_str(), "mock created");
        self.changed();
        Ok(rule)
    }

    /// Update an existing rule in place.
    pub fn update(&self, mut rule: Rule) -> Result<Rule, MockError> {
        rule.ensure_id();
        rule.validate()?;
        if !self.inner.contains(&rule.id) {
            return Err(MockError::NotFound(rule.id));
        }
        self.inner.set(&rule.id.clone(), rule.clone())?;
        debug!(id = %rule.id, "mock updated");
        self.changed();
        Ok(rule)
    }

    /// Delete a rule. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool, MockError> {
        let removed = self.inner.delete(id)?;
        if removed {
            debug!(id, "mock deleted");
            self.changed();
        }
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<Rule> {
        self.inner.get(id)
    }

    /// All rules in insertion order.
    pub fn all(&self) -> Vec<Rule> {
        self.inner.values()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn list(&self, page: usize, page_size: usize, query: &PageQuery) -> Page<Rule> {
        self.inner.paginate(page, page_size, query)
    }

    /// Toggle a rule without touching the rest of its definition.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<Rule, MockError> {
        let mut rule = self
            .inner
            .get(id)
            .ok_or_else(|| MockError::NotFound(id.to_string()))?;
        rule.enabled = enabled;
        self.inner.set(id, rule.clone())?;
        self.changed();
        Ok(rule)
    }

    /// Distinct group names in first-seen order.
    pub fn groups(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for rule in self.all() {
            if let Some(group) = rule.group {
                if seen.insert(group.clone()) {
                    out.push(group);
                }
            }
        }
        out
    }

    pub fn by_group(&self, group: &str) -> Vec<Rule> {
        self.all()
            .into_iter()
            .filter(|r| r.group.as_deref() == Some(group))
            .collect()
    }

    pub fn by_tag(&self, tag: &str) -> Vec<Rule> {
        self.all()
            .into_iter()
            .filter(|r| r.tags.iter().any(|t| t == tag))
            .collect()
    }

    /// The whole table as a JSON object map, in insertion order.
    pub fn export(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (key, rule) in self.inner.all() {
            if let Ok(value) = serde_json::to_value(&rule) {
                map.insert(key, value);
            }
        }
        Value::Object(map)
    }

    /// Import an exported object map. With `replace` the current table is
    /// dropped first; otherwise imported rules overlay existing ids.
    /// Returns the number of imported rules.
    pub fn import(&self, data: Value, replace: bool) -> Result<usize, MockError> {
        let Value::Object(map) = data else {
            return Err(MockError::Invalid(
                "import payload must be a JSON object map".to_string(),
            ));
        };
        let mut incoming = Vec::with_capacity(map.len());
        for (key, value) in map {
            let mut rule: Rule = serde_json::from_value(value)
                .map_err(|e| MockError::Invalid(format!("rule '{key}': {e}")))?;
            if rule.id.is_empty() {
                rule.id = key.clone();
            }
            rule.validate()?;
            incoming.push((key, rule));
        }

        let count = incoming.len();
        if replace {
            self.inner.replace_all(incoming)?;
        } else {
            for (key, rule) in incoming {
                self.inner.set(&key, rule)?;
            }
        }
        debug!(count, replace, "mocks imported");
        self.changed();
        Ok(count)
    }

    /// Resolve a request to a rule, bumping its hit count on success.
    pub fn resolve_request(&self, req: &RequestDescriptor) -> Option<Rule> {
        let rules = self.all();
        let matched = matcher::resolve(&rules, req)?.clone();
        self.record_hit(&matched.id);
        Some(matched)
    }

    /// Persist a mutated rule without firing the config-changed event.
    /// Used for the stateful cursor write-back and hit counting.
    pub fn persist_quietly(&self, rule: &Rule) -> Result<(), crate::error::StoreError> {
        self.inner.set(&rule.id, rule.clone())
    }

    fn record_hit(&self, id: &str) {
        if let Some(mut rule) = self.inner.get(id) {
            rule.hit_count = rule.hit_count.saturating_add(1);
            if let Err(e) = self.inner.set(id, rule) {
                warn!(id, error = %e, "failed to persist hit count");
            }
        }
    }

    fn changed(&self) {
        self.bus.emit(Topic::MockConfigChanged, Value::Null);
    }
}

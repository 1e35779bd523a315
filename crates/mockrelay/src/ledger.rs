//! Request ledger.
//!
//! An append-mostly history of served requests, persisted through the same
//! keyed store as the mock table. Appends are capped: once the configured
//! history limit is reached the oldest records are evicted first.

use crate::error::StoreError;
use crate::events::{EventBus, Topic};
use crate::store::{KeyedStore, Page, PageQuery};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// One served request, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub id: String,
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// The response envelope that was served, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default)]
    pub duration_ms: u64,
    /// Whether a mock rule served this request (vs. a miss or proxy-only path).
    #[serde(default)]
    pub is_mocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Draft record; the ledger assigns id and timestamp on append. Decodes
/// directly from `request-recorded` control-plane payloads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewRequestRecord {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
    pub response: Option<Value>,
    pub duration_ms: u64,
    pub is_mocked: bool,
    pub mock_id: Option<String>,
}

/// Persistent, capped request history.
#[derive(Clone)]
pub struct LedgerStore {
    inner: Arc<KeyedStore<RequestRecord>>,
    bus: EventBus,
}

impl LedgerStore {
    pub fn open<P: AsRef<Path>>(path: P, bus: EventBus) -> Result<Self, StoreError> {
        Ok(Self {
            inner: Arc::new(KeyedStore::open(path)?),
            bus,
        })
    }

    /// Shared handle to the backing store, for watcher wiring.
    pub fn keyed(&self) -> Arc<KeyedStore<RequestRecord>> {
        Arc::clone(&self.inner)
    }

    /// Append a record, evicting the oldest entries beyond `history_limit`.
    /// A limit of zero leaves the history uncapped.
    pub fn append(
        &self,
        draft: NewRequestRecord,
        history_limit: usize,
    ) -> Result<RequestRecord, StoreError> {
        let record = RequestRecord {
            id: uuid::Uuid::new_v4().to_string(),
            url: draft.url,
            method: draft.method,
            headers: draft.headers,
            query: draft.query,
            body: draft.body,
            response: draft.response,
            duration_ms: draft.duration_ms,
            is_mocked: draft.is_mocked,
            mock_id: draft.mock_id,
            timestamp: Utc::now(),
        };

        let mut entries = self.inner.all();
        entries.push((record.id.clone(), record.clone()));
        if history_limit > 0 && entries.len() > history_limit {
            let excess = entries.len() - history_limit;
            entries.drain(..excess);
        }
        self.inner.replace_all(entries)?;

        self.bus.emit(
            Topic::RequestRecorded,
            serde_json::to_value(&record).unwrap_or(Value::Null),
        );
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Option<RequestRecord> {
        self.inner.get(id)
    }

    pub fn history(&self, page: usize, page_size: usize, query: &PageQuery) -> Page<RequestRecord> {
        self.inner.paginate(page, page_size, query)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop the whole history.
    pub fn clear(&self) -> Result<(), StoreError> {
        let dropped = self.inner.len();
        self.inner.clear()?;
        info!(dropped, "request ledger cleared");
        self.bus.emit(Topic::LedgerCleared, Value::Null);
        Ok(())
    }
}

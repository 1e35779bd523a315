//! Control-plane wire protocol.
//!
//! Newline-delimited JSON envelopes: `{"type": "...", "data": ..., "id": "..."}`.
//! The `id` is a caller-chosen correlation token echoed verbatim on the reply,
//! including error replies. Messages without an id are fire-and-forget.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every message type spoken on the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    // Resolution
    MockResolve,
    MockResolved,
    // Rule CRUD
    MockCreate,
    MockCreated,
    MockUpdate,
    MockUpdated,
    MockDelete,
    MockDeleted,
    MockGet,
    MockDetail,
    MockList,
    MockExport,
    MockExported,
    MockImport,
    MockImported,
    // Ledger
    RequestRecorded,
    RequestHistory,
    // Settings
    SettingsGet,
    SettingsUpdate,
    SettingsClearCache,
    // Broadcast
    MockConfigUpdated,
    // Failure reply
    Error,
}

/// The reply type paired with each request type. Types answered with their
/// own type (list/history/settings) map to themselves; broadcasts and
/// fire-and-forget notifications have no reply and also map to themselves.
pub fn response_type(request: MessageType) -> MessageType {
    use MessageType::*;
    match request {
        MockResolve => MockResolved,
        MockCreate => MockCreated,
        MockUpdate => MockUpdated,
        MockDelete => MockDeleted,
        MockGet => MockDetail,
        MockExport => MockExported,
        MockImport => MockImported,
        other => other,
    }
}

/// One NDJSON frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Envelope {
    pub fn new(msg_type: MessageType, data: Option<Value>, id: Option<String>) -> Self {
        Self { msg_type, data, id }
    }

    /// A reply carrying `data`, correlated to the request's id.
    pub fn reply(request: &Envelope, data: Value) -> Self {
        Self {
            msg_type: response_type(request.msg_type),
            data: Some(data),
            id: request.id.clone(),
        }
    }

    /// An error reply echoing the given correlation id.
    pub fn error(message: impl Into<String>, id: Option<String>) -> Self {
        Self {
            msg_type: MessageType::Error,
            data: Some(serde_json::json!({ "message": message.into() })),
            id,
        }
    }
}

// ---------------------------------------------------------------------------
// Request/reply payloads
// ---------------------------------------------------------------------------

use crate::store::PageQuery;

/// Payload of `mock-list` and `request-history`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListRequest {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    #[serde(flatten)]
    pub query: PageQuery,
}

impl ListRequest {
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1)
    }

    pub fn page_size(&self) -> usize {
        self.page_size.unwrap_or(20)
    }
}

/// Payload of `mock-get` and `mock-delete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdRequest {
    pub id: String,
}

/// Payload of `mock-import`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    /// JSON object map of id -> rule, as produced by `mock-export`.
    pub mocks: Value,
    /// Replace the whole table instead of merging.
    #[serde(default)]
    pub replace: bool,
}

/// Payload of `mock-resolved`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedReply {
    pub matched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

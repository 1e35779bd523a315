//! Type definitions for mock rules and the resolution data model.
//!
//! A `Rule` maps a request shape to one of six response-generation kinds.
//! The kind-specific payload is a closed tagged union so dispatch is
//! exhaustive at compile time; there is no runtime "wrong type" guard.

use crate::error::MockError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Rule
// ============================================================================

/// A persisted mock definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Stable identity; derived from `method-url` when not supplied.
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher wins; ties break by store insertion order.
    #[serde(default)]
    pub priority: i64,
    /// HTTP verb or `*`.
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    /// Advanced matcher; without it the rule falls back to literal URL match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_rule: Option<MatchRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Successful resolutions served by this rule.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub hit_count: u64,
    #[serde(flatten)]
    pub payload: MockPayload,
}

fn default_enabled() -> bool {
    true
}

fn default_method() -> String {
    "*".to_string()
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl Rule {
    /// The composite identity used when no explicit id is supplied.
    pub fn derived_id(method: &str, url: &str) -> String {
        format!("{method}-{url}")
    }

    /// Fill in the derived id if none was supplied.
    pub fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = Self::derived_id(&self.method, &self.url);
        }
    }

    pub fn kind(&self) -> MockType {
        self.payload.kind()
    }

    /// Reject malformed rules before they reach the store.
    pub fn validate(&self) -> Result<(), MockError> {
        if self.url.is_empty() {
            return Err(MockError::Invalid("url must not be empty".to_string()));
        }
        if self.method.is_empty() {
            return Err(MockError::Invalid("method must not be empty".to_string()));
        }
        if let MockPayload::Stateful(p) = &self.payload {
            if p.states.is_empty() {
                return Err(MockError::Invalid(
                    "stateful mock needs at least one state".to_string(),
                ));
            }
        }
        if let Some(match_rule) = &self.match_rule {
            for cond in &match_rule.headers {
                if cond.operator == ConditionOperator::Exists {
                    return Err(MockError::Invalid(
                        "the exists operator applies to query conditions only".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Mock kinds and payloads
// ============================================================================

/// The six response-generation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockType {
    Static,
    Template,
    Function,
    Error,
    Stateful,
    Proxy,
}

impl MockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MockType::Static => "static",
            MockType::Template => "template",
            MockType::Function => "function",
            MockType::Error => "error",
            MockType::Stateful => "stateful",
            MockType::Proxy => "proxy",
        }
    }
}

/// Kind-specific rule payload; exactly one shape per kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MockPayload {
    Static(StaticPayload),
    Template(TemplatePayload),
    Function(FunctionPayload),
    Error(ErrorPayload),
    Stateful(StatefulPayload),
    Proxy(ProxyPayload),
}

impl MockPayload {
    pub fn kind(&self) -> MockType {
        match self {
            MockPayload::Static(_) => MockType::Static,
            MockPayload::Template(_) => MockType::Template,
            MockPayload::Function(_) => MockType::Function,
            MockPayload::Error(_) => MockType::Error,
            MockPayload::Stateful(_) => MockType::Stateful,
            MockPayload::Proxy(_) => MockType::Proxy,
        }
    }
}

fn default_status() -> u16 {
    200
}

fn default_error_status() -> u16 {
    500
}

/// Canned response echoed verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticPayload {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub delay_ms: u64,
}

/// Generated response: either a field schema or a placeholder document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatePayload {
    /// Field name -> generator spec; produces a flat JSON object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<HashMap<String, FieldSpec>>,
    /// JSON document with `{{module.method}}` placeholders in string leaves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Value>,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub delay_ms: u64,
}

/// One generated field: a `module.method` generator name plus arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub generator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
}

/// Response produced by a host-registered async responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionPayload {
    /// Name of the registered responder.
    pub handler: String,
    #[serde(default)]
    pub delay_ms: u64,
}

/// Explicit always-fail response, excluded from general error handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    #[serde(default = "default_error_status")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub delay_ms: u64,
}

/// Canned responses cycled through by a persisted cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulPayload {
    pub states: Vec<StateEntry>,
    /// Index of the next state to serve; advanced modulo `states.len()` and
    /// written back to the store on every resolution.
    #[serde(default)]
    pub current: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEntry {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub delay_ms: u64,
}

/// Forward to a real upstream, with `:param` segments filled from the
/// request query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyPayload {
    /// Full target URL, e.g. `https://api.example.com/users/:id`.
    pub target: String,
    /// Upstream timeout; falls back to the settings default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Forward the captured request headers upstream.
    #[serde(default)]
    pub pass_headers: bool,
    /// Forward the captured body for mutating methods.
    #[serde(default)]
    pub pass_body: bool,
    /// Applied to the upstream response before it is returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<ResponseRewrite>,
}

/// Declarative response-modifying hook for proxy rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRewrite {
    /// Object merged key-by-key into an object response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_override: Option<u16>,
}

// ============================================================================
// Advanced matcher
// ============================================================================

/// Optional advanced matcher attached to a rule; all listed conditions must
/// pass (logical AND).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<UrlMatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query: Vec<QueryCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlMatch {
    pub pattern: String,
    #[serde(rename = "type", default)]
    pub match_type: UrlMatchType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlMatchType {
    #[default]
    Exact,
    Wildcard,
    Prefix,
    Regex,
}

/// Condition operand: a single value or a list (membership for equals,
/// any-of for the substring/regex operators).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    One(String),
    Many(Vec<String>),
}

impl Default for ConditionValue {
    fn default() -> Self {
        ConditionValue::One(String::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
    #[default]
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    /// Query conditions only: presence check, value ignored.
    Exists,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderCondition {
    pub key: String,
    #[serde(default)]
    pub value: ConditionValue,
    #[serde(default)]
    pub operator: ConditionOperator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCondition {
    pub key: String,
    #[serde(default)]
    pub value: ConditionValue,
    #[serde(default)]
    pub operator: ConditionOperator,
}

// ============================================================================
// Resolution envelope types
// ============================================================================

/// Normalized captured request, owned transiently per resolution call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Uniform output of every generator; immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    pub body: Value,
    #[serde(default)]
    pub delay_ms: u64,
    pub source: MockType,
    pub meta: ResponseMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub mock_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

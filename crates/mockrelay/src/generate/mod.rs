//! Response generation.
//!
//! One generator per rule kind, dispatched exhaustively over the payload
//! union. Every generator returns the same envelope shape with `source` set
//! to its kind and `meta.mockId`/`meta.timestamp` always populated. Only the
//! stateful generator writes back to the store; only the function generator
//! can fail the resolution.

pub mod function;
pub mod proxy;
pub mod template;

pub use function::{MockResponder, ResponderOutput, ResponderRegistry};

use crate::error::GenerateError;
use crate::mock::store::MockStore;
use crate::mock::types::{
    ErrorPayload, GeneratedResponse, MockPayload, RequestDescriptor, ResponseMeta, Rule,
    StatefulPayload, StaticPayload,
};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Everything a generator may need for one resolution call.
pub struct GenerateContext<'a> {
    pub req: &'a RequestDescriptor,
    pub mocks: &'a MockStore,
    pub responders: &'a ResponderRegistry,
    pub http: &'a reqwest::Client,
    /// Settings-level default for proxy rules without their own timeout.
    pub proxy_timeout_ms: u64,
}

/// Produce the response for a matched rule.
pub async fn generate(
    rule: &Rule,
    ctx: &GenerateContext<'_>,
) -> Result<GeneratedResponse, GenerateError> {
    match &rule.payload {
        MockPayload::Static(p) => Ok(static_response(rule, p)),
        MockPayload::Error(p) => Ok(error_response(rule, p)),
        MockPayload::Template(p) => Ok(template::render(rule, p, ctx.req)),
        MockPayload::Function(p) => function::invoke(rule, p, ctx).await,
        MockPayload::Stateful(p) => stateful_response(rule, p, ctx),
        MockPayload::Proxy(p) => Ok(proxy::forward(rule, p, ctx).await),
    }
}

/// Static rules echo a deep copy of their configured response; no side effects.
fn static_response(rule: &Rule, payload: &StaticPayload) -> GeneratedResponse {
    envelope(
        rule,
        payload.status,
        payload.headers.clone(),
        payload.body.clone(),
        payload.delay_ms,
    )
}

/// Error rules return their configured failure verbatim.
fn error_response(rule: &Rule, payload: &ErrorPayload) -> GeneratedResponse {
    envelope(
        rule,
        payload.status,
        payload.headers.clone(),
        payload.body.clone(),
        payload.delay_ms,
    )
}

/// Serve `states[current % len]`, then advance the cursor and persist the
/// mutated rule. This is the only generator with a write side effect.
fn stateful_response(
    rule: &Rule,
    payload: &StatefulPayload,
    ctx: &GenerateContext<'_>,
) -> Result<GeneratedResponse, GenerateError> {
    if payload.states.is_empty() {
        return Err(GenerateError::EmptyStates(rule.id.clone()));
    }
    let idx = payload.current % payload.states.len();
    let state = &payload.states[idx];
    let response = envelope_with_extra(
        rule,
        state.status,
        state.headers.clone(),
        state.body.clone(),
        state.delay_ms,
        Some(json!({ "stateIndex": idx })),
    );

    // Re-read before mutating: the store may have bumped bookkeeping
    // (hit counts) after the caller's copy was taken.
    let mut updated = ctx.mocks.get(&rule.id).unwrap_or_else(|| rule.clone());
    if let MockPayload::Stateful(p) = &mut updated.payload {
        if !p.states.is_empty() {
            p.current = (idx + 1) % p.states.len();
        }
    }
    ctx.mocks.persist_quietly(&updated)?;
    Ok(response)
}

pub(crate) fn envelope(
    rule: &Rule,
    status: u16,
    headers: HashMap<String, String>,
    body: Value,
    delay_ms: u64,
) -> GeneratedResponse {
    envelope_with_extra(rule, status, headers, body, delay_ms, None)
}

pub(crate) fn envelope_with_extra(
    rule: &Rule,
    status: u16,
    headers: HashMap<String, String>,
    body: Value,
    delay_ms: u64,
    extra: Option<Value>,
) -> GeneratedResponse {
    GeneratedResponse {
        status,
        headers,
        body,
        delay_ms,
        source: rule.kind(),
        meta: ResponseMeta {
            mock_id: rule.id.clone(),
            timestamp: chrono::Utc::now(),
            extra,
        },
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::TestHarness;
    use super::*;
    use crate::mock::types::MockType;
    use serde_json::json;

    fn rule(value: Value) -> Rule {
        let mut rule: Rule = serde_json::from_value(value).unwrap();
        rule.ensure_id();
        rule
    }

    #[tokio::test]
    async fn test_static_generation_is_pure() {
        let harness = TestHarness::new();
        let rule = rule(json!({
            "id": "s", "url": "/x", "method": "GET", "type": "static",
            "status": 201,
            "headers": {"x-mock": "yes"},
            "body": {"items": [1, 2, 3], "nested": {"a": "b"}},
            "delayMs": 5
        }));

        let first = generate(&rule, &harness.ctx()).await.unwrap();
        let second = generate(&rule, &harness.ctx()).await.unwrap();

        assert_eq!(first.status, 201);
        assert_eq!(first.delay_ms, 5);
        assert_eq!(first.source, MockType::Static);
        assert_eq!(first.meta.mock_id, "s");
        assert_eq!(
            serde_json::to_vec(&first.body).unwrap(),
            serde_json::to_vec(&second.body).unwrap()
        );
    }

    #[tokio::test]
    async fn test_error_generation_returns_configured_failure() {
        let harness = TestHarness::new();
        let rule = rule(json!({
            "id": "e", "url": "/x", "method": "GET", "type": "error",
            "status": 418, "body": {"error": "teapot"}
        }));
        let response = generate(&rule, &harness.ctx()).await.unwrap();
        assert_eq!(response.status, 418);
        assert_eq!(response.body["error"], "teapot");
        assert_eq!(response.source, MockType::Error);
    }

    #[tokio::test]
    async fn test_stateful_cycles_with_period_m() {
        let harness = TestHarness::new();
        let rule = rule(json!({
            "id": "st", "url": "/x", "method": "GET", "type": "stateful",
            "states": [
                {"status": 200, "body": {"step": "a"}},
                {"status": 200, "body": {"step": "b"}},
                {"status": 503, "body": {"step": "c"}}
            ]
        }));
        harness.mocks.create(rule.clone()).unwrap();

        let mut bodies = Vec::new();
        for _ in 0..7 {
            // Re-read so the persisted cursor drives the next call.
            let current = harness.mocks.get("st").unwrap();
            let response = generate(&current, &harness.ctx()).await.unwrap();
            bodies.push(response.body["step"].as_str().unwrap().to_string());
        }
        assert_eq!(bodies, vec!["a", "b", "c", "a", "b", "c", "a"]);

        // After 7 resolutions of 3 states the cursor is 7 mod 3.
        match harness.mocks.get("st").unwrap().payload {
            MockPayload::Stateful(p) => assert_eq!(p.current, 1),
            _ => panic!("payload kind changed"),
        }
    }

    #[tokio::test]
    async fn test_stateful_write_back_preserves_hit_count() {
        let harness = TestHarness::new();
        let rule = rule(json!({
            "id": "st2", "url": "/test", "method": "GET", "type": "stateful",
            "states": [
                {"status": 200, "body": {"n": 1}},
                {"status": 200, "body": {"n": 2}}
            ]
        }));
        harness.mocks.create(rule).unwrap();

        // Resolve through the store (which bumps the hit count), then
        // generate (which advances and persists the cursor).
        for _ in 0..3 {
            let matched = harness.mocks.resolve_request(&harness.req).unwrap();
            generate(&matched, &harness.ctx()).await.unwrap();
        }

        let stored = harness.mocks.get("st2").unwrap();
        assert_eq!(stored.hit_count, 3);
        match stored.payload {
            MockPayload::Stateful(p) => assert_eq!(p.current, 1),
            _ => panic!("payload kind changed"),
        }
    }

    #[tokio::test]
    async fn test_stateful_with_empty_states_fails() {
        let harness = TestHarness::new();
        // Bypass validation to exercise the generator-side guard.
        let rule = Rule {
            id: "bad".to_string(),
            enabled: true,
            priority: 0,
            method: "GET".to_string(),
            url: "/x".to_string(),
            match_rule: None,
            group: None,
            tags: Vec::new(),
            description: None,
            hit_count: 0,
            payload: MockPayload::Stateful(StatefulPayload {
                states: Vec::new(),
                current: 0,
            }),
        };
        let result = generate(&rule, &harness.ctx()).await;
        assert!(matches!(result, Err(GenerateError::EmptyStates(_))));
    }

    #[tokio::test]
    async fn test_meta_is_always_populated() {
        let harness = TestHarness::new();
        let rule = rule(json!({
            "id": "m", "url": "/x", "method": "GET", "type": "static", "body": null
        }));
        let response = generate(&rule, &harness.ctx()).await.unwrap();
        assert_eq!(response.meta.mock_id, "m");
        assert!(response.meta.timestamp <= chrono::Utc::now());
    }
}

//! Function generator.
//!
//! Rules of this kind delegate to a host-registered async responder looked up
//! by name. This is the only generation path whose failures surface to the
//! caller instead of being folded into the response body: an unknown handler
//! name or a responder error fails the resolution.

use crate::error::GenerateError;
use crate::mock::types::{FunctionPayload, GeneratedResponse, RequestDescriptor, Rule};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What a responder hands back; folded into the standard response envelope.
#[derive(Debug, Clone)]
pub struct ResponderOutput {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Value,
    pub delay_ms: u64,
}

impl Default for ResponderOutput {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body: Value::Null,
            delay_ms: 0,
        }
    }
}

/// Host-supplied response logic, registered by name at startup.
#[async_trait]
pub trait MockResponder: Send + Sync {
    async fn respond(&self, req: &RequestDescriptor) -> anyhow::Result<ResponderOutput>;
}

/// Named responder table shared across the control plane.
#[derive(Clone, Default)]
pub struct ResponderRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn MockResponder>>>>,
}

impl ResponderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under `name`, replacing any previous responder with that name.
    pub fn register(&self, name: impl Into<String>, responder: Arc<dyn MockResponder>) {
        self.inner.write().insert(name.into(), responder);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MockResponder>> {
        self.inner.read().get(name).map(Arc::clone)
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }
}

pub async fn invoke(
    rule: &Rule,
    payload: &FunctionPayload,
    ctx: &super::GenerateContext<'_>,
) -> Result<GeneratedResponse, GenerateError> {
    let responder = ctx
        .responders
        .get(&payload.handler)
        .ok_or_else(|| GenerateError::UnknownHandler(payload.handler.clone()))?;

    let output = responder
        .respond(ctx.req)
        .await
        .map_err(|e| GenerateError::Handler {
            handler: payload.handler.clone(),
            message: e.to_string(),
        })?;

    // The rule-level delay dominates when both are set.
    let delay_ms = if payload.delay_ms > 0 {
        payload.delay_ms
    } else {
        output.delay_ms
    };
    Ok(super::envelope(
        rule,
        output.status,
        output.headers,
        output.body,
        delay_ms,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerateError;
    use crate::generate::generate;
    use crate::generate::test_support::TestHarness;
    use crate::mock::types::MockType;
    use serde_json::json;

    struct EchoResponder;

    #[async_trait]
    impl MockResponder for EchoResponder {
        async fn respond(&self, req: &RequestDescriptor) -> anyhow::Result<ResponderOutput> {
            Ok(ResponderOutput {
                status: 200,
                body: json!({"method": req.method, "url": req.url}),
                ..ResponderOutput::default()
            })
        }
    }

    struct FailingResponder;

    #[async_trait]
    impl MockResponder for FailingResponder {
        async fn respond(&self, _req: &RequestDescriptor) -> anyhow::Result<ResponderOutput> {
            anyhow::bail!("downstream unavailable")
        }
    }

    fn function_rule(handler: &str) -> Rule {
        serde_json::from_value(json!({
            "id": "f", "url": "/test", "method": "GET",
            "type": "function", "handler": handler
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_registered_responder_is_invoked() {
        let harness = TestHarness::new();
        harness.responders.register("echo", Arc::new(EchoResponder));
        let response = generate(&function_rule("echo"), &harness.ctx())
            .await
            .unwrap();
        assert_eq!(response.source, MockType::Function);
        assert_eq!(response.body["method"], "GET");
        assert_eq!(response.body["url"], "/test");
    }

    #[tokio::test]
    async fn test_unknown_handler_fails_resolution() {
        let harness = TestHarness::new();
        let result = generate(&function_rule("ghost"), &harness.ctx()).await;
        assert!(matches!(result, Err(GenerateError::UnknownHandler(h)) if h == "ghost"));
    }

    #[tokio::test]
    async fn test_responder_error_propagates() {
        let harness = TestHarness::new();
        harness
            .responders
            .register("flaky", Arc::new(FailingResponder));
        let result = generate(&function_rule("flaky"), &harness.ctx()).await;
        match result {
            Err(GenerateError::Handler { handler, message }) => {
                assert_eq!(handler, "flaky");
                assert!(message.contains("downstream unavailable"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reregistering_replaces() {
        let registry = ResponderRegistry::new();
        registry.register("h", Arc::new(FailingResponder));
        registry.register("h", Arc::new(EchoResponder));
        assert_eq!(registry.names(), vec!["h".to_string()]);
        let req = RequestDescriptor {
            url: "/x".to_string(),
            method: "GET".to_string(),
            ..Default::default()
        };
        let out = registry.get("h").unwrap().respond(&req).await.unwrap();
        assert_eq!(out.body["url"], "/x");
    }
}

//! Proxy generator.
//!
//! Forwards the captured request to a real upstream and wraps whatever comes
//! back in the standard response envelope. Never fails the resolution: any
//! upstream problem (bad target, connect error, timeout) degrades to a
//! synthetic 502 with the failure detail in the body.

use crate::mock::types::{GeneratedResponse, ProxyPayload, RequestDescriptor, Rule};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

// Hop-by-hop and derived headers never forwarded upstream.
const SKIPPED_HEADERS: &[&str] = &["host", "content-length", "connection", "transfer-encoding"];

pub async fn forward(
    rule: &Rule,
    payload: &ProxyPayload,
    ctx: &super::GenerateContext<'_>,
) -> GeneratedResponse {
    let target = rewrite_target(&payload.target, &ctx.req.query);
    debug!(mock_id = %rule.id, %target, "proxying request upstream");

    match send(payload, &target, ctx).await {
        Ok((mut status, headers, mut body)) => {
            if let Some(rewrite) = &payload.rewrite {
                if let Some(over) = rewrite.status_override {
                    status = over;
                }
                if let (Some(Value::Object(patch)), Value::Object(existing)) =
                    (&rewrite.merge, &mut body)
                {
                    for (k, v) in patch {
                        existing.insert(k.clone(), v.clone());
                    }
                }
            }
            super::envelope(rule, status, headers, body, 0)
        }
        Err(detail) => {
            warn!(mock_id = %rule.id, %target, %detail, "proxy request failed");
            super::envelope(
                rule,
                502,
                HashMap::new(),
                json!({
                    "error": "Proxy request failed",
                    "target": target,
                    "detail": detail,
                }),
                0,
            )
        }
    }
}

async fn send(
    payload: &ProxyPayload,
    target: &str,
    ctx: &super::GenerateContext<'_>,
) -> Result<(u16, HashMap<String, String>, Value), String> {
    let method: reqwest::Method = ctx
        .req
        .method
        .parse()
        .map_err(|_| format!("invalid method: {}", ctx.req.method))?;

    let timeout_ms = payload.timeout_ms.unwrap_or(ctx.proxy_timeout_ms);
    let mut request = ctx
        .http
        .request(method, target)
        .timeout(Duration::from_millis(timeout_ms));

    if payload.pass_headers {
        for (key, value) in &ctx.req.headers {
            if SKIPPED_HEADERS.contains(&key.to_ascii_lowercase().as_str()) {
                continue;
            }
            request = request.header(key.as_str(), value.as_str());
        }
    }
    if payload.pass_body && wants_body(&ctx.req.method) {
        if let Some(body) = &ctx.req.body {
            request = request.json(body);
        }
    }

    let response = request.send().await.map_err(|e| e.to_string())?;
    let status = response.status().as_u16();
    let headers: HashMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
        .collect();
    let bytes = response.bytes().await.map_err(|e| e.to_string())?;
    let body = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    Ok((status, headers, body))
}

fn wants_body(method: &str) -> bool {
    matches!(
        method.to_ascii_uppercase().as_str(),
        "POST" | "PUT" | "PATCH" | "DELETE"
    )
}

fn param_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").unwrap_or_else(|_| unreachable!()))
}

/// Fill `:param` path segments from the request query. Parameters without a
/// matching query value are left untouched.
fn rewrite_target(target: &str, query: &HashMap<String, String>) -> String {
    param_re()
        .replace_all(target, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            query
                .get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::test_support::TestHarness;
    use crate::generate::generate;
    use crate::mock::types::MockType;

    #[test]
    fn test_target_params_rewritten_from_query() {
        let query = HashMap::from([
            ("id".to_string(), "42".to_string()),
            ("kind".to_string(), "full".to_string()),
        ]);
        assert_eq!(
            rewrite_target("https://api.example.com/users/:id/view/:kind", &query),
            "https://api.example.com/users/42/view/full"
        );
    }

    #[test]
    fn test_unresolved_params_left_in_place() {
        let query = HashMap::new();
        assert_eq!(
            rewrite_target("https://api.example.com/users/:id", &query),
            "https://api.example.com/users/:id"
        );
    }

    #[test]
    fn test_scheme_port_not_treated_as_param() {
        // `:8080` does not match the identifier pattern.
        let query = HashMap::from([("p".to_string(), "x".to_string())]);
        assert_eq!(
            rewrite_target("http://host:8080/:p", &query),
            "http://host:8080/x"
        );
    }

    #[tokio::test]
    async fn test_unreachable_upstream_degrades_to_502() {
        let harness = TestHarness::new();
        let rule: Rule = serde_json::from_value(json!({
            "id": "p", "url": "/ext", "method": "GET", "type": "proxy",
            "target": "http://127.0.0.1:9/never",
            "timeoutMs": 500
        }))
        .unwrap();
        let response = generate(&rule, &harness.ctx()).await.unwrap();
        assert_eq!(response.status, 502);
        assert_eq!(response.source, MockType::Proxy);
        assert_eq!(response.body["error"], "Proxy request failed");
        assert_eq!(response.body["target"], "http://127.0.0.1:9/never");
        assert!(response.body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_invalid_method_degrades_to_502() {
        let mut harness = TestHarness::new();
        harness.req.method = "NOT A METHOD".to_string();
        let rule: Rule = serde_json::from_value(json!({
            "id": "p", "url": "/ext", "method": "*", "type": "proxy",
            "target": "http://127.0.0.1:9/never"
        }))
        .unwrap();
        let response = generate(&rule, &harness.ctx()).await.unwrap();
        assert_eq!(response.status, 502);
    }
}

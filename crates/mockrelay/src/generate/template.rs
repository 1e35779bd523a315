//! Template generator.
//!
//! Two input shapes: a flat `fields` schema where every value names a
//! `module.method` generator, or a `document` whose string leaves may embed
//! `{{module.method}}` placeholders. A leaf that is exactly one placeholder
//! keeps the generator's typed value; mixed text renders to a string. A field
//! whose generator fails renders as `null` so one bad spec never sinks the
//! whole response.

use crate::mock::types::{
    FieldSpec, GeneratedResponse, RequestDescriptor, Rule, TemplatePayload,
};
use fake::faker::internet::en::{IPv4, SafeEmail, Username};
use fake::faker::lorem::en::{Sentence, Word};
use fake::faker::name::en::{FirstName, LastName, Name};
use fake::Fake;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

pub fn render(rule: &Rule, payload: &TemplatePayload, req: &RequestDescriptor) -> GeneratedResponse {
    let body = match (&payload.fields, &payload.document) {
        (Some(fields), _) => Some(render_fields(fields, req)),
        (None, Some(document)) => render_document(document, req),
        (None, None) => None,
    };

    match body {
        Some(body) => super::envelope(
            rule,
            payload.status,
            payload.headers.clone(),
            body,
            payload.delay_ms,
        ),
        None => super::envelope(
            rule,
            500,
            HashMap::new(),
            json!({ "error": "Invalid template document" }),
            payload.delay_ms,
        ),
    }
}

fn render_fields(fields: &HashMap<String, FieldSpec>, req: &RequestDescriptor) -> Value {
    let mut out = Map::new();
    for (name, spec) in fields {
        let value = match invoke_generator(&spec.generator, &spec.args, req) {
            Some(v) => v,
            None => {
                debug!(field = %name, generator = %spec.generator, "unknown template generator");
                Value::Null
            }
        };
        out.insert(name.clone(), value);
    }
    Value::Object(out)
}

/// Walk the document and substitute placeholders in string leaves. A string
/// document is rendered first and must then parse as JSON.
fn render_document(document: &Value, req: &RequestDescriptor) -> Option<Value> {
    match document {
        Value::String(s) => match render_string(s, req) {
            Value::String(text) => serde_json::from_str(&text).ok(),
            typed => Some(typed),
        },
        _ => Some(render_value(document, req)),
    }
}

fn render_value(value: &Value, req: &RequestDescriptor) -> Value {
    match value {
        Value::String(s) => render_string(s, req),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, req)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, req)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").unwrap_or_else(|_| unreachable!()))
}

/// Substitute placeholders in one string leaf. A leaf that is exactly one
/// placeholder keeps the generated value's JSON type.
fn render_string(s: &str, req: &RequestDescriptor) -> Value {
    let re = placeholder_re();
    if let Some(caps) = re.captures(s) {
        if let Some(whole) = caps.get(0) {
            if whole.start() == 0 && whole.end() == s.len() {
                let name = caps[1].trim();
                return invoke_generator(name, &[], req).unwrap_or(Value::Null);
            }
        }
    }
    let rendered = re.replace_all(s, |caps: &regex::Captures<'_>| {
        let name = caps[1].trim();
        match invoke_generator(name, &[], req) {
            Some(Value::String(v)) => v,
            Some(other) => other.to_string(),
            None => String::new(),
        }
    });
    Value::String(rendered.into_owned())
}

/// Run one named generator. `None` means the name is unknown or its
/// arguments are unusable.
pub fn invoke_generator(name: &str, args: &[Value], req: &RequestDescriptor) -> Option<Value> {
    if let Some(path) = name.strip_prefix("request.") {
        return request_lookup(path, req);
    }
    let mut rng = rand::thread_rng();
    match name {
        "string.uuid" => Some(Value::String(uuid::Uuid::new_v4().to_string())),
        "string.alpha" => {
            let len = arg_usize(args, 0).unwrap_or(8);
            let s: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .filter(|c| c.is_ascii_alphabetic())
                .take(len)
                .map(char::from)
                .collect();
            Some(Value::String(s))
        }
        "string.word" => Some(Value::String(Word().fake())),
        "string.sentence" => Some(Value::String(Sentence(3..8).fake())),
        "name.first" => Some(Value::String(FirstName().fake())),
        "name.last" => Some(Value::String(LastName().fake())),
        "name.full" => Some(Value::String(Name().fake())),
        "internet.email" => Some(Value::String(SafeEmail().fake())),
        "internet.username" => Some(Value::String(Username().fake())),
        "internet.ip" => Some(Value::String(IPv4().fake())),
        "number.int" => {
            let min = arg_i64(args, 0).unwrap_or(0);
            let max = arg_i64(args, 1).unwrap_or(1000);
            if min > max {
                return None;
            }
            Some(json!(rng.gen_range(min..=max)))
        }
        "number.float" => {
            let min = arg_f64(args, 0).unwrap_or(0.0);
            let max = arg_f64(args, 1).unwrap_or(1.0);
            if !(min <= max) {
                return None;
            }
            Some(json!(rng.gen_range(min..=max)))
        }
        "boolean.value" => Some(Value::Bool(rng.gen())),
        "date.now" => Some(Value::String(chrono::Utc::now().to_rfc3339())),
        "date.timestamp" => Some(json!(chrono::Utc::now().timestamp_millis())),
        _ => None,
    }
}

/// Resolve a `request.*` path against the captured request.
fn request_lookup(path: &str, req: &RequestDescriptor) -> Option<Value> {
    match path {
        "url" => Some(Value::String(req.url.clone())),
        "method" => Some(Value::String(req.method.clone())),
        "body" => Some(req.body.clone().unwrap_or(Value::Null)),
        _ => {
            if let Some(key) = path.strip_prefix("query.") {
                return Some(
                    req.query
                        .get(key)
                        .map(|v| Value::String(v.clone()))
                        .unwrap_or(Value::Null),
                );
            }
            if let Some(key) = path.strip_prefix("headers.") {
                return Some(
                    req.headers
                        .get(key)
                        .map(|v| Value::String(v.clone()))
                        .unwrap_or(Value::Null),
                );
            }
            None
        }
    }
}

fn arg_usize(args: &[Value], idx: usize) -> Option<usize> {
    args.get(idx)?.as_u64().map(|n| n as usize)
}

fn arg_i64(args: &[Value], idx: usize) -> Option<i64> {
    args.get(idx)?.as_i64()
}

fn arg_f64(args: &[Value], idx: usize) -> Option<f64> {
    args.get(idx)?.as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::types::MockType;

    fn req() -> RequestDescriptor {
        RequestDescriptor {
            url: "/api/orders".to_string(),
            method: "POST".to_string(),
            headers: HashMap::from([("x-tenant".to_string(), "acme".to_string())]),
            query: HashMap::from([("limit".to_string(), "25".to_string())]),
            body: Some(json!({"sku": "A-1"})),
        }
    }

    fn template_rule(payload: Value) -> (Rule, TemplatePayload) {
        let mut base = json!({
            "id": "t", "url": "/api/orders", "method": "POST", "type": "template"
        });
        if let (Value::Object(b), Value::Object(p)) = (&mut base, payload) {
            b.extend(p);
        }
        let rule: Rule = serde_json::from_value(base).unwrap();
        let payload = match &rule.payload {
            crate::mock::types::MockPayload::Template(p) => p.clone(),
            _ => panic!("not a template rule"),
        };
        (rule, payload)
    }

    #[test]
    fn test_fields_schema_generates_every_field() {
        let (rule, payload) = template_rule(json!({
            "fields": {
                "id": {"generator": "string.uuid"},
                "name": {"generator": "name.full"},
                "age": {"generator": "number.int", "args": [18, 65]}
            }
        }));
        let response = render(&rule, &payload, &req());
        assert_eq!(response.status, 200);
        assert_eq!(response.source, MockType::Template);
        let body = response.body.as_object().unwrap();
        assert!(uuid::Uuid::parse_str(body["id"].as_str().unwrap()).is_ok());
        assert!(!body["name"].as_str().unwrap().is_empty());
        let age = body["age"].as_i64().unwrap();
        assert!((18..=65).contains(&age));
    }

    #[test]
    fn test_unknown_generator_renders_null() {
        let (rule, payload) = template_rule(json!({
            "fields": {"x": {"generator": "astrology.sign"}}
        }));
        let response = render(&rule, &payload, &req());
        assert_eq!(response.status, 200);
        assert_eq!(response.body["x"], Value::Null);
    }

    #[test]
    fn test_document_placeholders_substituted() {
        let (rule, payload) = template_rule(json!({
            "document": {
                "caller": "{{request.method}} {{request.url}}",
                "tenant": "{{request.headers.x-tenant}}",
                "limit": "{{request.query.limit}}",
                "echo": "{{request.body}}",
                "items": ["{{string.uuid}}", "plain"]
            }
        }));
        let response = render(&rule, &payload, &req());
        assert_eq!(response.body["caller"], "POST /api/orders");
        assert_eq!(response.body["tenant"], "acme");
        assert_eq!(response.body["limit"], "25");
        // Sole-placeholder leaf keeps the typed value.
        assert_eq!(response.body["echo"], json!({"sku": "A-1"}));
        assert!(uuid::Uuid::parse_str(response.body["items"][0].as_str().unwrap()).is_ok());
        assert_eq!(response.body["items"][1], "plain");
    }

    #[test]
    fn test_string_document_must_parse_as_json() {
        let (rule, payload) = template_rule(json!({
            "document": "{\"n\": {{number.int}}}"
        }));
        let response = render(&rule, &payload, &req());
        assert_eq!(response.status, 200);
        assert!(response.body["n"].is_i64());

        let (rule, payload) = template_rule(json!({
            "document": "not json at all"
        }));
        let response = render(&rule, &payload, &req());
        assert_eq!(response.status, 500);
        assert_eq!(response.body["error"], "Invalid template document");
    }

    #[test]
    fn test_missing_fields_and_document_is_invalid() {
        let (rule, payload) = template_rule(json!({ "status": 201 }));
        let response = render(&rule, &payload, &req());
        assert_eq!(response.status, 500);
        assert_eq!(response.body["error"], "Invalid template document");
    }

    #[test]
    fn test_fields_take_precedence_over_document() {
        let (rule, payload) = template_rule(json!({
            "fields": {"flag": {"generator": "boolean.value"}},
            "document": {"ignored": true}
        }));
        let response = render(&rule, &payload, &req());
        assert!(response.body.get("ignored").is_none());
        assert!(response.body["flag"].is_boolean());
    }

    #[test]
    fn test_request_lookup_misses_render_null() {
        let (rule, payload) = template_rule(json!({
            "document": {"absent": "{{request.query.nope}}"}
        }));
        let response = render(&rule, &payload, &req());
        assert_eq!(response.body["absent"], Value::Null);
    }
}

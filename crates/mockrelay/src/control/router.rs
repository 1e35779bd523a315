//! Control-plane message dispatch.
//!
//! One inbound line in, at most one reply out. Fire-and-forget notifications
//! produce no reply; everything else gets either the paired reply type or an
//! `error` envelope echoing the caller's correlation id.

use crate::control::protocol::{
    Envelope, IdRequest, ImportRequest, ListRequest, MessageType, ResolvedReply,
};
use crate::control::server::ServerContext;
use crate::generate::{self, GenerateContext};
use crate::ledger::NewRequestRecord;
use crate::mock::types::{RequestDescriptor, Rule};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::debug;

/// Handle one raw inbound line. Returns the reply to write back, if any.
pub async fn handle_line(ctx: &ServerContext, line: &str) -> Option<Envelope> {
    // Decode in two steps so a malformed envelope can still echo its id.
    let raw: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Some(Envelope::error(format!("malformed JSON: {e}"), None)),
    };
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    let envelope: Envelope = match serde_json::from_value(raw) {
        Ok(env) => env,
        Err(e) => return Some(Envelope::error(format!("invalid envelope: {e}"), id)),
    };
    handle_message(ctx, envelope).await
}

pub async fn handle_message(ctx: &ServerContext, request: Envelope) -> Option<Envelope> {
    use MessageType::*;
    debug!(msg_type = ?request.msg_type, id = ?request.id, "control message");
    match request.msg_type {
        MockResolve => Some(resolve(ctx, &request).await),
        MockCreate => Some(create(ctx, &request)),
        MockUpdate => Some(update(ctx, &request)),
        MockDelete => Some(delete(ctx, &request)),
        MockGet => Some(get(ctx, &request)),
        MockList => Some(list(ctx, &request)),
        MockExport => Some(Envelope::reply(&request, json!({ "mocks": ctx.mocks.export() }))),
        MockImport => Some(import(ctx, &request)),
        RequestRecorded => {
            record_external(ctx, &request);
            None
        }
        RequestHistory => Some(history(ctx, &request)),
        SettingsGet => {
            let settings = ctx.settings.load();
            Some(reply_or_error(&request, serde_json::to_value(settings)))
        }
        SettingsUpdate => Some(settings_update(ctx, &request)),
        SettingsClearCache => Some(clear_cache(ctx, &request)),
        // Reply and broadcast types are never valid requests.
        MockResolved | MockCreated | MockUpdated | MockDeleted | MockDetail | MockExported
        | MockImported | MockConfigUpdated | Error => Some(Envelope::error(
            format!("unexpected message type: {:?}", request.msg_type),
            request.id,
        )),
    }
}

/// Resolve a request against the rule table, generate the response, honor
/// its delay, and record the exchange in the ledger.
async fn resolve(ctx: &ServerContext, request: &Envelope) -> Envelope {
    let req: RequestDescriptor = match decode(request) {
        Ok(req) => req,
        Err(reply) => return reply,
    };
    let started = Instant::now();

    let Some(rule) = ctx.mocks.resolve_request(&req) else {
        record(ctx, &req, None, None, started);
        let reply = ResolvedReply {
            matched: false,
            response: None,
        };
        return reply_or_error(request, serde_json::to_value(reply));
    };

    let gen_ctx = GenerateContext {
        req: &req,
        mocks: ctx.mocks.as_ref(),
        responders: &ctx.responders,
        http: &ctx.http,
        proxy_timeout_ms: ctx.settings.load().proxy_timeout_ms,
    };
    let response = match generate::generate(&rule, &gen_ctx).await {
        Ok(response) => response,
        Err(e) => return Envelope::error(e.to_string(), request.id.clone()),
    };
    if response.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(response.delay_ms)).await;
    }

    let encoded = serde_json::to_value(&response).ok();
    record(ctx, &req, encoded.clone(), Some(rule.id.clone()), started);
    let reply = ResolvedReply {
        matched: true,
        response: encoded,
    };
    reply_or_error(request, serde_json::to_value(reply))
}

fn record(
    ctx: &ServerContext,
    req: &RequestDescriptor,
    response: Option<Value>,
    mock_id: Option<String>,
    started: Instant,
) {
    let is_mocked = mock_id.is_some();
    let draft = NewRequestRecord {
        url: req.url.clone(),
        method: req.method.clone(),
        headers: req.headers.clone(),
        query: req.query.clone(),
        body: req.body.clone(),
        response,
        duration_ms: started.elapsed().as_millis() as u64,
        is_mocked,
        mock_id,
    };
    let limit = ctx.settings.load().history_limit;
    if let Err(e) = ctx.ledger.append(draft, limit) {
        tracing::warn!(error = %e, "failed to record request");
    }
}

/// A peer reporting a request it served itself; appended verbatim.
fn record_external(ctx: &ServerContext, request: &Envelope) {
    let Some(data) = &request.data else { return };
    let draft: NewRequestRecord = match serde_json::from_value(data.clone()) {
        Ok(draft) => draft,
        Err(e) => {
            debug!(error = %e, "dropping malformed request-recorded payload");
            return;
        }
    };
    let limit = ctx.settings.load().history_limit;
    if let Err(e) = ctx.ledger.append(draft, limit) {
        tracing::warn!(error = %e, "failed to record external request");
    }
}

fn create(ctx: &ServerContext, request: &Envelope) -> Envelope {
    let rule: Rule = match decode(request) {
        Ok(rule) => rule,
        Err(reply) => return reply,
    };
    match ctx.mocks.create(rule) {
        Ok(created) => reply_or_error(request, serde_json::to_value(created)),
        Err(e) => Envelope::error(e.to_string(), request.id.clone()),
    }
}

fn update(ctx: &ServerContext, request: &Envelope) -> Envelope {
    let rule: Rule = match decode(request) {
        Ok(rule) => rule,
        Err(reply) => return reply,
    };
    match ctx.mocks.update(rule) {
        Ok(updated) => reply_or_error(request, serde_json::to_value(updated)),
        Err(e) => Envelope::error(e.to_string(), request.id.clone()),
    }
}

fn delete(ctx: &ServerContext, request: &Envelope) -> Envelope {
    let req: IdRequest = match decode(request) {
        Ok(req) => req,
        Err(reply) => return reply,
    };
    match ctx.mocks.delete(&req.id) {
        Ok(deleted) => Envelope::reply(request, json!({ "id": req.id, "deleted": deleted })),
        Err(e) => Envelope::error(e.to_string(), request.id.clone()),
    }
}

fn get(ctx: &ServerContext, request: &Envelope) -> Envelope {
    let req: IdRequest = match decode(request) {
        Ok(req) => req,
        Err(reply) => return reply,
    };
    match ctx.mocks.get(&req.id) {
        Some(rule) => reply_or_error(request, serde_json::to_value(rule)),
        None => Envelope::error(format!("mock '{}' not found", req.id), request.id.clone()),
    }
}

fn list(ctx: &ServerContext, request: &Envelope) -> Envelope {
    let req: ListRequest = match decode_or_default(request) {
        Ok(req) => req,
        Err(reply) => return reply,
    };
    let page = ctx.mocks.list(req.page(), req.page_size(), &req.query);
    reply_or_error(request, serde_json::to_value(page))
}

fn import(ctx: &ServerContext, request: &Envelope) -> Envelope {
    let req: ImportRequest = match decode(request) {
        Ok(req) => req,
        Err(reply) => return reply,
    };
    match ctx.mocks.import(req.mocks, req.replace) {
        Ok(count) => Envelope::reply(request, json!({ "imported": count })),
        Err(e) => Envelope::error(e.to_string(), request.id.clone()),
    }
}

fn history(ctx: &ServerContext, request: &Envelope) -> Envelope {
    let req: ListRequest = match decode_or_default(request) {
        Ok(req) => req,
        Err(reply) => return reply,
    };
    let page = ctx.ledger.history(req.page(), req.page_size(), &req.query);
    reply_or_error(request, serde_json::to_value(page))
}

fn settings_update(ctx: &ServerContext, request: &Envelope) -> Envelope {
    let Some(patch) = &request.data else {
        return Envelope::error("settings-update requires a data object", request.id.clone());
    };
    match ctx.settings.update(patch) {
        Ok(updated) => reply_or_error(request, serde_json::to_value(updated)),
        Err(e) => Envelope::error(e.to_string(), request.id.clone()),
    }
}

fn clear_cache(ctx: &ServerContext, request: &Envelope) -> Envelope {
    match ctx.ledger.clear() {
        Ok(()) => Envelope::reply(request, json!({ "cleared": true })),
        Err(e) => Envelope::error(e.to_string(), request.id.clone()),
    }
}

fn decode<T: DeserializeOwned>(request: &Envelope) -> Result<T, Envelope> {
    let Some(data) = request.data.clone() else {
        return Err(Envelope::error(
            format!("{:?} requires a data payload", request.msg_type),
            request.id.clone(),
        ));
    };
    serde_json::from_value(data)
        .map_err(|e| Envelope::error(format!("invalid payload: {e}"), request.id.clone()))
}

fn decode_or_default<T: DeserializeOwned + Default>(request: &Envelope) -> Result<T, Envelope> {
    match request.data.clone() {
        None => Ok(T::default()),
        Some(data) => serde_json::from_value(data)
            .map_err(|e| Envelope::error(format!("invalid payload: {e}"), request.id.clone())),
    }
}

fn reply_or_error(request: &Envelope, data: serde_json::Result<Value>) -> Envelope {
    match data {
        Ok(data) => Envelope::reply(request, data),
        Err(e) => Envelope::error(format!("failed to encode reply: {e}"), request.id.clone()),
    }
}


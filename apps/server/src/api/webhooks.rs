//! Webhook ingestion endpoints.
//!
//! Every endpoint acknowledges with `200 {"status":"received",...}` as soon
//! as the request is captured; translation and fan-out happen in a background
//! task so a slow pipeline can never push back on the vendor.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Method, Uri},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{error::ApiResult, main_lib::AppState};
use pulsegrid_core::events::Event;

#[derive(Serialize)]
pub(crate) struct WebhookAck {
    status: &'static str,
    event_id: uuid::Uuid,
    timestamp: DateTime<Utc>,
}

pub(crate) async fn eventbrite(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let (capture, parsed) = capture_request(&headers, &method, &uri, &body);
    // The vendor header carries the full type; a body-level `action` only
    // carries the verb, so it gets the `event.` prefix back.
    let webhook_type = headers
        .get("x-eventbrite-event")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| json_str(&parsed, &["action"]).map(|action| format!("event.{action}")))
        .unwrap_or_else(|| "event.unknown".to_string());
    accept(state, "eventbrite", webhook_type, capture)
}

pub(crate) async fn twitter(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let (capture, parsed) = capture_request(&headers, &method, &uri, &body);
    let webhook_type = if parsed.get("tweet_create_events").is_some() {
        "tweet.created".to_string()
    } else if parsed.get("tweet_delete_events").is_some() {
        "tweet.deleted".to_string()
    } else {
        "tweet.unknown".to_string()
    };
    accept(state, "twitter", webhook_type, capture)
}

pub(crate) async fn ticketmaster(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let (capture, parsed) = capture_request(&headers, &method, &uri, &body);
    let event_type = json_str(&parsed, &["eventType"]).unwrap_or_else(|| "unknown".to_string());
    accept(state, "ticketmaster", format!("event.{event_type}"), capture)
}

pub(crate) async fn generic(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
    headers: HeaderMap,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let (capture, parsed) = capture_request(&headers, &method, &uri, &body);
    let webhook_type = json_str(&parsed, &["type"])
        .or_else(|| json_str(&parsed, &["event"]))
        .or_else(|| json_str(&parsed, &["action"]))
        .unwrap_or_else(|| "webhook.generic".to_string());
    accept(state, source, webhook_type, capture)
}

/// Records the acceptance, answers immediately, and hands the event to the
/// bus in the background.
fn accept(
    state: Arc<AppState>,
    source: impl Into<String>,
    webhook_type: String,
    capture: Value,
) -> ApiResult<Json<WebhookAck>> {
    let source = source.into();
    state.webhook_counters.record_received();

    let event = Event::webhook_received(source.clone(), capture, webhook_type.clone());
    let ack = WebhookAck {
        status: "received",
        event_id: event.id,
        timestamp: event.timestamp,
    };
    tracing::info!(source, webhook_type, event_id = %event.id, "Webhook received");

    let background = state.clone();
    tokio::spawn(async move {
        match background.bus.publish_async(event).await {
            Ok(()) => background.webhook_counters.record_processed(),
            Err(e) => {
                background.webhook_counters.record_failed();
                tracing::error!(source, "Failed to publish webhook event: {e}");
            }
        }
    });

    Ok(Json(ack))
}

/// Captures the full request into the payload shape handlers expect. A body
/// that is not valid JSON is captured with an empty `json` object rather
/// than rejected.
fn capture_request(
    headers: &HeaderMap,
    method: &Method,
    uri: &Uri,
    body: &[u8],
) -> (Value, Value) {
    let parsed: Value = serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::Object(Default::default()));
    let header_values: serde_json::Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Value::String(String::from_utf8_lossy(value.as_bytes()).to_string()),
            )
        })
        .collect();
    let capture = json!({
        "headers": header_values,
        "body": String::from_utf8_lossy(body),
        "json": parsed.clone(),
        "url": uri.to_string(),
        "method": method.as_str(),
    });
    (capture, parsed)
}

fn json_str(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str().map(str::to_string)
}

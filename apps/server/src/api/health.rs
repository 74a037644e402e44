//! Service banner and health endpoints.

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::main_lib::AppState;

pub(crate) async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds();
    Json(json!({
        "service": "PulseGrid webhook ingestion",
        "status": "running",
        "uptime_seconds": uptime_seconds,
        "webhooks": state.webhook_counters.snapshot(),
        "sources": state.webhook_handler.registered_sources(),
    }))
}

pub(crate) async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "event_bus": state.bus.statistics(),
        "dispatcher": state.dispatcher.statistics(),
        "handlers": state.registry.all_stats(),
        "webhooks": state.webhook_counters.snapshot(),
    }))
}

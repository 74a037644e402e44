//! Per-source webhook processors.
//!
//! Each processor translates one vendor's raw webhook capture into the
//! normalized shape the webhook handler republishes from.

mod eventbrite;
mod generic;

pub use eventbrite::EventbriteProcessor;
pub use generic::GenericProcessor;

use serde_json::Value;

use pulsegrid_core::models::Location;

/// The parsed request body out of a webhook capture. Ingestion stores the
/// parsed JSON under `json`; older callers may hand the body directly.
pub(crate) fn capture_body(payload: &Value) -> &Value {
    payload.get("json").unwrap_or(payload)
}

pub(crate) fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn location_from(lat: Option<&Value>, lon: Option<&Value>) -> Option<Location> {
    Some(Location::new(
        coordinate(lat?)?,
        coordinate(lon?)?,
    ))
}

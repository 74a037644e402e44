//! Eventbrite webhook processor.

use serde_json::Value;

use pulsegrid_core::collaborators::WebhookProcessor;
use pulsegrid_core::errors::ProcessorError;
use pulsegrid_core::models::{Location, NormalizedWebhook};

use super::{capture_body, location_from, value_to_id};

const SUPPORTED_TYPES: &[&str] = &[
    "event.created",
    "event.published",
    "event.updated",
    "event.unpublished",
    "event.cancelled",
    "event.deleted",
    "order.placed",
    "attendee.updated",
];

pub struct EventbriteProcessor;

impl EventbriteProcessor {
    /// Eventbrite payloads carry the event id in several places depending on
    /// the webhook generation: `config.event_id`, a top-level `event_id`, or
    /// only inside the `api_url`.
    fn extract_event_id(body: &Value) -> Option<String> {
        if let Some(id) = body.pointer("/config/event_id").and_then(|v| value_to_id(v)) {
            return Some(id);
        }
        if let Some(id) = body.get("event_id").and_then(|v| value_to_id(v)) {
            return Some(id);
        }
        let api_url = body.get("api_url").and_then(Value::as_str)?;
        let rest = api_url.split("/events/").nth(1)?;
        let id = rest.split('/').next().unwrap_or_default();
        (!id.is_empty()).then(|| id.to_string())
    }

    fn extract_location(body: &Value) -> Location {
        let venue = body.get("venue");
        venue
            .and_then(|venue| {
                location_from(
                    venue.get("latitude").or_else(|| venue.get("lat")),
                    venue.get("longitude").or_else(|| venue.get("lon")),
                )
            })
            .unwrap_or(Location::KANSAS_CITY)
    }

    fn removal_reason(webhook_type: &str) -> Option<&'static str> {
        match webhook_type {
            "event.unpublished" => Some("unpublished"),
            "event.cancelled" => Some("cancelled"),
            "event.deleted" => Some("deleted"),
            _ => None,
        }
    }
}

impl WebhookProcessor for EventbriteProcessor {
    fn source(&self) -> &str {
        "eventbrite"
    }

    fn process(
        &self,
        webhook_type: &str,
        payload: &Value,
    ) -> Result<NormalizedWebhook, ProcessorError> {
        if !SUPPORTED_TYPES.contains(&webhook_type) {
            return Err(ProcessorError::UnsupportedType(webhook_type.to_string()));
        }

        let body = capture_body(payload);
        let event_id = Self::extract_event_id(body);
        let location = Self::extract_location(body);

        // Order and attendee payloads pass through unchanged; the handler
        // treats them like event data.
        Ok(NormalizedWebhook {
            event_id,
            data: body.clone(),
            old_data: Value::Object(Default::default()),
            new_data: body.clone(),
            changed_fields: Vec::new(),
            reason: Self::removal_reason(webhook_type).map(str::to_string),
            location: Some(location),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unsupported_type_is_rejected() {
        let result = EventbriteProcessor.process("barcode.checked_in", &json!({}));
        assert!(matches!(result, Err(ProcessorError::UnsupportedType(_))));
    }

    #[test]
    fn test_event_id_from_config() {
        let payload = json!({"json": {"config": {"event_id": "123"}}});
        let normalized = EventbriteProcessor.process("event.created", &payload).unwrap();
        assert_eq!(normalized.event_id.as_deref(), Some("123"));
    }

    #[test]
    fn test_event_id_parsed_from_api_url() {
        let payload = json!({
            "json": {"api_url": "https://www.eventbriteapi.com/v3/events/456789/"}
        });
        let normalized = EventbriteProcessor
            .process("event.cancelled", &payload)
            .unwrap();
        assert_eq!(normalized.event_id.as_deref(), Some("456789"));
        assert_eq!(normalized.reason.as_deref(), Some("cancelled"));
    }

    #[test]
    fn test_venue_coordinates_with_string_values() {
        let payload = json!({
            "json": {"venue": {"latitude": "39.0334", "longitude": "-94.5760"}}
        });
        let normalized = EventbriteProcessor.process("event.created", &payload).unwrap();
        assert_eq!(normalized.location, Some(Location::new(39.0334, -94.5760)));
    }

    #[test]
    fn test_missing_venue_falls_back_to_default_location() {
        let normalized = EventbriteProcessor
            .process("event.created", &json!({"json": {}}))
            .unwrap();
        assert_eq!(normalized.location, Some(Location::KANSAS_CITY));
    }
}

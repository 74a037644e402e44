//! Pass-through processor for sources without a dedicated integration.

use serde_json::Value;

use pulsegrid_core::collaborators::WebhookProcessor;
use pulsegrid_core::errors::ProcessorError;
use pulsegrid_core::models::NormalizedWebhook;

use super::{capture_body, location_from, value_to_id};

pub struct GenericProcessor {
    source: String,
}

impl GenericProcessor {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl WebhookProcessor for GenericProcessor {
    fn source(&self) -> &str {
        &self.source
    }

    fn process(
        &self,
        _webhook_type: &str,
        payload: &Value,
    ) -> Result<NormalizedWebhook, ProcessorError> {
        let body = capture_body(payload);
        let object = body
            .as_object()
            .ok_or_else(|| ProcessorError::InvalidPayload("body is not a JSON object".into()))?;

        let event_id = object
            .get("event_id")
            .or_else(|| object.get("id"))
            .and_then(value_to_id);

        let location = object.get("location").and_then(|loc| {
            location_from(
                loc.get("lat").or_else(|| loc.get("latitude")),
                loc.get("lon").or_else(|| loc.get("longitude")),
            )
        });

        let changed_fields = object
            .get("changed_fields")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(NormalizedWebhook {
            event_id,
            data: body.clone(),
            old_data: object
                .get("old_data")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default())),
            new_data: object.get("new_data").cloned().unwrap_or_else(|| body.clone()),
            changed_fields,
            reason: object
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string),
            location,
        })
    }
}

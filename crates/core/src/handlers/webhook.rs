//! Webhook translation handler.
//!
//! Consumes `webhook_received` events, routes them to the per-source
//! processor, and republishes the normalized result as the matching internal
//! event (added / updated / removed) on the synchronous path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::collaborators::WebhookProcessor;
use crate::errors::HandlerError;
use crate::events::bus::EventBus;
use crate::events::envelope::{Event, EventPayload};
use crate::handlers::{EventHandler, HandlerCounters, HandlerStats};
use crate::models::Location;

/// What a webhook type string asks the system to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WebhookAction {
    Add,
    Update,
    Remove,
}

/// Maps a vendor webhook type (`event.created`, `order.placed`,
/// `event_cancelled`, …) onto the internal action it implies.
fn classify_action(webhook_type: &str) -> Option<WebhookAction> {
    let lowered = webhook_type.to_ascii_lowercase();
    if ["cancelled", "canceled", "deleted", "unpublished"]
        .iter()
        .any(|token| lowered.contains(token))
    {
        Some(WebhookAction::Remove)
    } else if ["updated", "changed"].iter().any(|token| lowered.contains(token)) {
        Some(WebhookAction::Update)
    } else if ["created", "published", "placed"]
        .iter()
        .any(|token| lowered.contains(token))
    {
        Some(WebhookAction::Add)
    } else {
        None
    }
}

pub struct WebhookHandler {
    processors: Mutex<HashMap<String, Arc<dyn WebhookProcessor>>>,
    bus: EventBus,
    counters: HandlerCounters,
}

impl WebhookHandler {
    pub const NAME: &'static str = "webhook";

    pub fn new(bus: EventBus) -> Self {
        Self {
            processors: Mutex::new(HashMap::new()),
            bus,
            counters: HandlerCounters::default(),
        }
    }

    pub fn register_processor(&self, processor: Arc<dyn WebhookProcessor>) {
        let source = processor.source().to_string();
        tracing::info!(source, "Registered webhook processor");
        self.processors
            .lock()
            .expect("processor registry lock poisoned")
            .insert(source, processor);
    }

    pub fn registered_sources(&self) -> Vec<String> {
        self.processors
            .lock()
            .expect("processor registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn react(&self, event: &Event) -> Result<(), HandlerError> {
        let EventPayload::WebhookReceived {
            source,
            webhook_data,
            webhook_type,
        } = &event.payload
        else {
            return Ok(());
        };

        let processor = {
            let processors = self
                .processors
                .lock()
                .expect("processor registry lock poisoned");
            processors.get(source).cloned()
        };
        let Some(processor) = processor else {
            tracing::warn!(source, "No webhook processor registered, dropping webhook");
            return Ok(());
        };

        let Some(action) = classify_action(webhook_type) else {
            tracing::warn!(source, webhook_type, "Unrecognized webhook type, dropping");
            return Ok(());
        };

        let normalized = processor.process(webhook_type, webhook_data)?;

        let internal = match action {
            WebhookAction::Add => Event::event_added(
                normalized.data,
                source.clone(),
                normalized.location.unwrap_or(Location::KANSAS_CITY),
            ),
            WebhookAction::Update => Event::event_updated(
                require_event_id(normalized.event_id, webhook_type)?,
                source.clone(),
                normalized.old_data,
                normalized.new_data,
                normalized.changed_fields,
            ),
            WebhookAction::Remove => Event::event_removed(
                require_event_id(normalized.event_id, webhook_type)?,
                source.clone(),
                normalized.location,
                normalized.reason.unwrap_or_else(|| "unknown".to_string()),
            ),
        };

        tracing::debug!(
            source,
            webhook_type,
            internal_kind = %internal.kind(),
            "Translated webhook into internal event"
        );
        self.bus.publish(&internal);
        Ok(())
    }
}

fn require_event_id(
    event_id: Option<String>,
    webhook_type: &str,
) -> Result<String, HandlerError> {
    event_id.ok_or_else(|| {
        HandlerError::MalformedPayload(format!(
            "webhook '{webhook_type}' carries no event identifier"
        ))
    })
}

#[async_trait]
impl EventHandler for WebhookHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle_event(&self, event: &Event) -> Result<(), HandlerError> {
        let result = self.react(event);
        self.counters.record(Self::NAME, result)
    }

    fn stats(&self) -> HandlerStats {
        self.counters.snapshot(Self::NAME)
    }
}

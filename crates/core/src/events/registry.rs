//! Name-keyed handler registry binding handlers to bus subscriptions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::collaborators::{AssumptionEngine, Broadcaster, GridManager, VisualizationManager};
use crate::errors::{EventError, Result};
use crate::events::bus::{EventBus, SubscriptionId};
use crate::events::envelope::EventKind;
use crate::handlers::{
    AssumptionLayerHandler, EventHandler, GridUpdateHandler, HandlerStats,
    VisualizationUpdateHandler, WebhookHandler,
};

struct Registration {
    handler: Arc<dyn EventHandler>,
    subscriptions: Vec<(EventKind, SubscriptionId)>,
}

/// Holds the reactive handlers and their bus subscriptions.
pub struct HandlerRegistry {
    bus: EventBus,
    registrations: Mutex<HashMap<String, Registration>>,
}

impl HandlerRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            registrations: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a handler without subscribing it to anything yet.
    pub fn register_handler(&self, handler: Arc<dyn EventHandler>) {
        let name = handler.name().to_string();
        self.lock().insert(
            name,
            Registration {
                handler,
                subscriptions: Vec::new(),
            },
        );
    }

    /// Subscribes a registered handler to the given kinds on the async path.
    pub fn subscribe_handler(&self, name: &str, kinds: &[EventKind]) -> Result<()> {
        let mut registrations = self.lock();
        let registration = registrations
            .get_mut(name)
            .ok_or_else(|| EventError::UnknownHandler(name.to_string()))?;

        for &kind in kinds {
            let handler = Arc::clone(&registration.handler);
            let id = self.bus.subscribe_async(kind, move |event| {
                let handler = Arc::clone(&handler);
                async move { handler.handle_event(&event).await }
            });
            registration.subscriptions.push((kind, id));
        }
        tracing::info!(handler = name, kinds = kinds.len(), "Handler subscribed");
        Ok(())
    }

    /// Drops a handler and all its subscriptions.
    pub fn unregister_handler(&self, name: &str) {
        if let Some(registration) = self.lock().remove(name) {
            for (kind, id) in registration.subscriptions {
                self.bus.unsubscribe(kind, id);
            }
        }
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn EventHandler>> {
        self.lock().get(name).map(|r| Arc::clone(&r.handler))
    }

    pub fn all_stats(&self) -> Vec<HandlerStats> {
        let mut stats: Vec<HandlerStats> = self
            .lock()
            .values()
            .map(|r| r.handler.stats())
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Wires the four built-in handlers to their default kind sets. Returns
    /// the webhook handler so callers can register per-source processors.
    pub fn setup_default_handlers(
        &self,
        engine: Arc<dyn AssumptionEngine>,
        grid: Arc<dyn GridManager>,
        visualization: Arc<dyn VisualizationManager>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Result<Arc<WebhookHandler>> {
        let webhook = Arc::new(WebhookHandler::new(self.bus.clone()));

        self.register_handler(Arc::new(AssumptionLayerHandler::new(engine)));
        self.register_handler(Arc::new(GridUpdateHandler::new(grid, self.bus.clone())));
        self.register_handler(Arc::new(VisualizationUpdateHandler::new(
            visualization,
            broadcaster,
        )));
        self.register_handler(webhook.clone());

        self.subscribe_handler(
            AssumptionLayerHandler::NAME,
            &[
                EventKind::TimeChange,
                EventKind::EventAdded,
                EventKind::EventRemoved,
                EventKind::AssumptionLayerUpdate,
            ],
        )?;
        self.subscribe_handler(
            GridUpdateHandler::NAME,
            &[
                EventKind::GridUpdate,
                EventKind::EventAdded,
                EventKind::EventRemoved,
                EventKind::AssumptionLayerUpdate,
            ],
        )?;
        self.subscribe_handler(
            VisualizationUpdateHandler::NAME,
            &[EventKind::VisualizationUpdate, EventKind::GridUpdate],
        )?;
        self.subscribe_handler(WebhookHandler::NAME, &[EventKind::WebhookReceived])?;

        Ok(webhook)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Registration>> {
        self.registrations
            .lock()
            .expect("handler registry lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        MockAssumptionEngine, NoOpBroadcaster, NoOpGridManager, NoOpVisualizationManager,
    };
    use crate::events::bus::EventBusConfig;
    use crate::events::envelope::{BoundaryKind, Event};
    use chrono::Utc;
    use std::time::Duration;

    fn test_bus() -> EventBus {
        EventBus::new(EventBusConfig {
            recv_timeout: Duration::from_millis(20),
            ..EventBusConfig::default()
        })
    }

    #[tokio::test]
    async fn test_default_handlers_cover_expected_kinds() {
        let bus = test_bus();
        let registry = HandlerRegistry::new(bus.clone());
        registry
            .setup_default_handlers(
                Arc::new(MockAssumptionEngine::default()),
                Arc::new(NoOpGridManager),
                Arc::new(NoOpVisualizationManager),
                Arc::new(NoOpBroadcaster),
            )
            .unwrap();

        // Added events fan to both the assumption and grid handlers.
        assert_eq!(bus.subscriber_counts(EventKind::EventAdded), (0, 2));
        assert_eq!(bus.subscriber_counts(EventKind::WebhookReceived), (0, 1));
        assert_eq!(bus.subscriber_counts(EventKind::TimeChange), (0, 1));
        assert_eq!(registry.all_stats().len(), 4);
    }

    #[tokio::test]
    async fn test_subscribed_handler_receives_matching_kind_only() {
        let bus = test_bus();
        let registry = HandlerRegistry::new(bus.clone());
        let engine = Arc::new(MockAssumptionEngine::default());
        registry.register_handler(Arc::new(AssumptionLayerHandler::new(engine.clone())));
        registry
            .subscribe_handler(AssumptionLayerHandler::NAME, &[EventKind::TimeChange])
            .unwrap();

        bus.publish_async(Event::time_change(Utc::now(), Utc::now(), BoundaryKind::Week))
            .await
            .unwrap();
        bus.publish_async(Event::cache_invalidation(vec![], "grid_data", "test"))
            .await
            .unwrap();
        bus.stop().await;

        assert_eq!(engine.calls(), vec!["recalculate_college_presence"]);
        let stats = registry.all_stats();
        assert_eq!(stats[0].events_processed, 1);
    }

    #[tokio::test]
    async fn test_unregister_removes_subscriptions() {
        let bus = test_bus();
        let registry = HandlerRegistry::new(bus.clone());
        registry.register_handler(Arc::new(WebhookHandler::new(bus.clone())));
        registry
            .subscribe_handler(WebhookHandler::NAME, &[EventKind::WebhookReceived])
            .unwrap();
        assert_eq!(bus.subscriber_counts(EventKind::WebhookReceived), (0, 1));

        registry.unregister_handler(WebhookHandler::NAME);
        assert_eq!(bus.subscriber_counts(EventKind::WebhookReceived), (0, 0));
        assert!(registry.handler(WebhookHandler::NAME).is_none());
    }

    #[tokio::test]
    async fn test_subscribing_unknown_handler_fails() {
        let registry = HandlerRegistry::new(test_bus());
        assert!(registry
            .subscribe_handler("nobody", &[EventKind::GridUpdate])
            .is_err());
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::processors::{EventbriteProcessor, GenericProcessor};
use pulsegrid_core::collaborators::{
    NoOpAssumptionEngine, NoOpBroadcaster, NoOpGridManager, NoOpVisualizationManager,
};
use pulsegrid_core::events::{
    DispatcherConfig, EventBus, EventBusConfig, HandlerRegistry, TimeBasedEventScheduler,
    TimeEventDispatcher,
};
use pulsegrid_core::handlers::WebhookHandler;

/// Ingestion counters, bumped as webhooks are accepted and then processed in
/// the background.
#[derive(Default)]
pub struct WebhookCounters {
    received: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone, Debug, Serialize)]
pub struct WebhookStats {
    pub received: u64,
    pub processed: u64,
    pub failed: u64,
}

impl WebhookCounters {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WebhookStats {
        WebhookStats {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Everything the HTTP layer needs, passed explicitly through axum state.
pub struct AppState {
    pub bus: EventBus,
    pub dispatcher: TimeEventDispatcher,
    pub registry: Arc<HandlerRegistry>,
    pub webhook_handler: Arc<WebhookHandler>,
    pub webhook_counters: WebhookCounters,
    pub started_at: DateTime<Utc>,
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("PULSE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        let fmt_layer = fmt::layer().json().with_current_span(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

/// Wires the bus, dispatcher, handlers, webhook processors, and standing
/// schedules, then starts the loops.
pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let bus = EventBus::new(EventBusConfig {
        queue_capacity: config.queue_capacity,
        ..EventBusConfig::default()
    });
    let dispatcher = TimeEventDispatcher::new(
        bus.clone(),
        DispatcherConfig {
            monitor_interval: config.monitor_interval,
            scheduler_interval: config.scheduler_interval,
        },
    );

    let registry = Arc::new(HandlerRegistry::new(bus.clone()));
    let webhook_handler = registry.setup_default_handlers(
        Arc::new(NoOpAssumptionEngine),
        Arc::new(NoOpGridManager),
        Arc::new(NoOpVisualizationManager),
        Arc::new(NoOpBroadcaster),
    )?;
    webhook_handler.register_processor(Arc::new(EventbriteProcessor));
    webhook_handler.register_processor(Arc::new(GenericProcessor::new("generic")));

    dispatcher.start().await?;

    let scheduler = TimeBasedEventScheduler::new(dispatcher.clone());
    scheduler.schedule_daily_assumption_update(6, 0)?;
    scheduler.schedule_hourly_spending_update()?;
    scheduler.schedule_weekend_college_update()?;

    Ok(Arc::new(AppState {
        bus,
        dispatcher,
        registry,
        webhook_handler,
        webhook_counters: WebhookCounters::default(),
        started_at: Utc::now(),
    }))
}

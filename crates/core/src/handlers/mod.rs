//! Reactive event handlers.
//!
//! Each handler implements [`EventHandler`] and reacts to a subset of event
//! kinds by calling into its injected collaborators. Handlers keep local
//! processed/error counters; a failure increments the local error counter and
//! is then re-raised so the bus delivery layer records it as well, which
//! deliberately counts every failure in both places.

mod assumption;
mod grid;
mod visualization;
mod webhook;

pub use assumption::AssumptionLayerHandler;
pub use grid::GridUpdateHandler;
pub use visualization::VisualizationUpdateHandler;
pub use webhook::WebhookHandler;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::HandlerError;
use crate::events::envelope::Event;

/// A named consumer of events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Reacts to one event. Kinds the handler does not care about are
    /// ignored and count as processed.
    async fn handle_event(&self, event: &Event) -> Result<(), HandlerError>;

    fn stats(&self) -> HandlerStats;
}

/// Snapshot of a handler's local counters.
#[derive(Clone, Debug, Serialize)]
pub struct HandlerStats {
    pub name: String,
    pub events_processed: u64,
    pub errors: u64,
}

/// Shared processed/error bookkeeping for handler impls.
#[derive(Default)]
pub(crate) struct HandlerCounters {
    processed: AtomicU64,
    errors: AtomicU64,
}

impl HandlerCounters {
    /// Counts the outcome and passes it through unchanged.
    pub(crate) fn record(
        &self,
        name: &str,
        result: Result<(), HandlerError>,
    ) -> Result<(), HandlerError> {
        match &result {
            Ok(()) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(handler = name, "Handler failed: {e}");
            }
        }
        result
    }

    pub(crate) fn snapshot(&self, name: &str) -> HandlerStats {
        HandlerStats {
            name: name.to_string(),
            events_processed: self.processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

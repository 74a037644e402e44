//! Scoring-grid maintenance handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::collaborators::GridManager;
use crate::errors::HandlerError;
use crate::events::bus::EventBus;
use crate::events::envelope::{Event, EventPayload, UpdateScope, VisualizationKind};
use crate::handlers::{EventHandler, HandlerCounters, HandlerStats};
use crate::models::GridCell;

/// Applies grid recalculations and feeds external-event changes into the
/// grid, publishing a real-time heatmap refresh whenever cell scores moved.
pub struct GridUpdateHandler {
    grid: Arc<dyn GridManager>,
    bus: EventBus,
    counters: HandlerCounters,
}

impl GridUpdateHandler {
    pub const NAME: &'static str = "grid_update";

    pub fn new(grid: Arc<dyn GridManager>, bus: EventBus) -> Self {
        Self {
            grid,
            bus,
            counters: HandlerCounters::default(),
        }
    }

    async fn react(&self, event: &Event) -> Result<(), HandlerError> {
        match &event.payload {
            EventPayload::GridUpdate {
                affected_cells,
                update_type,
                ..
            } => {
                match update_type {
                    UpdateScope::Full => self.grid.recalculate_all_cells().await?,
                    UpdateScope::Incremental => self.grid.update_cells(affected_cells).await?,
                    UpdateScope::AssumptionOnly => {
                        self.grid.update_assumption_scores(affected_cells).await?;
                    }
                }
                Ok(())
            }

            EventPayload::EventAdded {
                event_data,
                location,
                ..
            } => {
                let affected = self.grid.add_event(event_data, *location).await?;
                self.push_realtime_heatmap(event, &affected);
                Ok(())
            }

            EventPayload::EventRemoved {
                removed_event_id,
                location,
                ..
            } => {
                let affected = self.grid.remove_event(removed_event_id, *location).await?;
                self.push_realtime_heatmap(event, &affected);
                Ok(())
            }

            EventPayload::AssumptionLayerUpdate { affected_area, .. } => {
                match affected_area {
                    Some(area) => self.grid.update_scores_for_area(area).await?,
                    None => self.grid.update_all_scores().await?,
                }
                Ok(())
            }

            _ => Ok(()),
        }
    }

    /// Pushes the changed cells to the heatmap over the sync path so viewers
    /// see the change without waiting for a periodic refresh.
    fn push_realtime_heatmap(&self, trigger: &Event, affected: &[GridCell]) {
        if affected.is_empty() {
            return;
        }
        let update = Event::visualization_update(
            VisualizationKind::Heatmap,
            json!({
                "affected_cells": affected,
                "trigger_event_id": trigger.id,
            }),
            true,
        );
        self.bus.publish(&update);
    }
}

#[async_trait]
impl EventHandler for GridUpdateHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle_event(&self, event: &Event) -> Result<(), HandlerError> {
        let result = self.react(event).await;
        self.counters.record(Self::NAME, result)
    }

    fn stats(&self) -> HandlerStats {
        self.counters.snapshot(Self::NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockGridManager;
    use crate::events::envelope::EventKind;
    use crate::models::Location;
    use serde_json::json;

    #[tokio::test]
    async fn test_update_scope_routes_to_grid_calls() {
        let grid = Arc::new(MockGridManager::default());
        let handler = GridUpdateHandler::new(grid.clone(), EventBus::default());

        let cells = vec![GridCell { lat: 39.1, lon: -94.6 }];
        for scope in [
            UpdateScope::Full,
            UpdateScope::Incremental,
            UpdateScope::AssumptionOnly,
        ] {
            handler
                .handle_event(&Event::grid_update(cells.clone(), scope, None))
                .await
                .unwrap();
        }

        assert_eq!(
            grid.calls(),
            vec![
                "recalculate_all_cells",
                "update_cells(1)",
                "update_assumption_scores(1)"
            ]
        );
    }

    #[tokio::test]
    async fn test_event_added_publishes_realtime_heatmap() {
        let affected = vec![GridCell { lat: 39.1, lon: -94.6 }];
        let grid = Arc::new(MockGridManager::returning(affected));
        let bus = EventBus::default();
        let handler = GridUpdateHandler::new(grid, bus.clone());

        let event = Event::event_added(json!({"name": "Pop-up"}), "generic", Location::KANSAS_CITY);
        handler.handle_event(&event).await.unwrap();

        let published = bus.get_event_history(Some(EventKind::VisualizationUpdate), 10);
        assert_eq!(published.len(), 1);
        match &published[0].payload {
            EventPayload::VisualizationUpdate {
                visualization_type,
                real_time,
                update_data,
            } => {
                assert_eq!(*visualization_type, VisualizationKind::Heatmap);
                assert!(*real_time);
                assert_eq!(update_data["trigger_event_id"], json!(event.id));
            }
            _ => panic!("Expected VisualizationUpdate"),
        }
    }

    #[tokio::test]
    async fn test_removal_with_no_affected_cells_publishes_nothing() {
        let grid = Arc::new(MockGridManager::default());
        let bus = EventBus::default();
        let handler = GridUpdateHandler::new(grid, bus.clone());

        let event = Event::event_removed("evt-1", "eventbrite", None, "cancelled");
        handler.handle_event(&event).await.unwrap();

        assert!(bus
            .get_event_history(Some(EventKind::VisualizationUpdate), 10)
            .is_empty());
    }

    #[tokio::test]
    async fn test_grid_failure_is_counted_and_propagated() {
        let grid = Arc::new(MockGridManager::failing());
        let handler = GridUpdateHandler::new(grid, EventBus::default());

        let result = handler
            .handle_event(&Event::grid_update(vec![], UpdateScope::Full, None))
            .await;

        assert!(result.is_err());
        let stats = handler.stats();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.events_processed, 0);
    }
}

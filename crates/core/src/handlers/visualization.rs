//! Visualization refresh handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::collaborators::{Broadcaster, VisualizationManager};
use crate::errors::HandlerError;
use crate::events::envelope::{Event, EventPayload, UpdateScope, VisualizationKind};
use crate::handlers::{EventHandler, HandlerCounters, HandlerStats};

/// Rebuilds visualization surfaces and pushes real-time payloads to
/// connected clients.
pub struct VisualizationUpdateHandler {
    visualization: Arc<dyn VisualizationManager>,
    broadcaster: Arc<dyn Broadcaster>,
    counters: HandlerCounters,
}

impl VisualizationUpdateHandler {
    pub const NAME: &'static str = "visualization";

    pub fn new(
        visualization: Arc<dyn VisualizationManager>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            visualization,
            broadcaster,
            counters: HandlerCounters::default(),
        }
    }

    async fn react(&self, event: &Event) -> Result<(), HandlerError> {
        match &event.payload {
            EventPayload::VisualizationUpdate {
                visualization_type,
                update_data,
                real_time,
            } => {
                self.refresh(*visualization_type, update_data).await?;
                if *real_time {
                    self.broadcaster.broadcast(update_data.clone()).await?;
                }
                Ok(())
            }

            EventPayload::GridUpdate {
                affected_cells,
                update_type: UpdateScope::Full | UpdateScope::Incremental,
                ..
            } => {
                // Fresh scores invalidate both score-backed surfaces.
                let data = json!({ "affected_cells": affected_cells });
                self.visualization.update_heatmap(data.clone()).await?;
                self.visualization.update_grid(data).await?;
                Ok(())
            }

            _ => Ok(()),
        }
    }

    async fn refresh(&self, kind: VisualizationKind, data: &Value) -> Result<(), HandlerError> {
        match kind {
            VisualizationKind::Heatmap => self.visualization.update_heatmap(data.clone()).await?,
            VisualizationKind::Grid => self.visualization.update_grid(data.clone()).await?,
            VisualizationKind::Combined => {
                self.visualization.update_combined(data.clone()).await?;
            }
            VisualizationKind::All => {
                self.visualization.update_heatmap(data.clone()).await?;
                self.visualization.update_grid(data.clone()).await?;
                self.visualization.update_combined(data.clone()).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for VisualizationUpdateHandler {
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
    use crate::collaborators::{MockBroadcaster, MockVisualizationManager};
    use crate::models::GridCell;

    fn handler_with_mocks() -> (
        VisualizationUpdateHandler,
        Arc<MockVisualizationManager>,
        Arc<MockBroadcaster>,
    ) {
        let visualization = Arc::new(MockVisualizationManager::default());
        let broadcaster = Arc::new(MockBroadcaster::default());
        (
            VisualizationUpdateHandler::new(visualization.clone(), broadcaster.clone()),
            visualization,
            broadcaster,
        )
    }

    #[tokio::test]
    async fn test_all_kind_fans_to_every_surface() {
        let (handler, visualization, _) = handler_with_mocks();
        let event = Event::visualization_update(VisualizationKind::All, json!({}), false);

        handler.handle_event(&event).await.unwrap();

        assert_eq!(
            visualization.calls(),
            vec!["update_heatmap", "update_grid", "update_combined"]
        );
    }

    #[tokio::test]
    async fn test_real_time_updates_are_broadcast() {
        let (handler, _, broadcaster) = handler_with_mocks();
        let payload = json!({"cells": [1, 2, 3]});
        let event = Event::visualization_update(VisualizationKind::Heatmap, payload.clone(), true);

        handler.handle_event(&event).await.unwrap();

        assert_eq!(broadcaster.payloads(), vec![payload]);
    }

    #[tokio::test]
    async fn test_non_real_time_updates_are_not_broadcast() {
        let (handler, _, broadcaster) = handler_with_mocks();
        let event = Event::visualization_update(VisualizationKind::Grid, json!({}), false);

        handler.handle_event(&event).await.unwrap();

        assert!(broadcaster.payloads().is_empty());
    }

    #[tokio::test]
    async fn test_grid_update_refreshes_score_surfaces() {
        let (handler, visualization, _) = handler_with_mocks();
        let event = Event::grid_update(
            vec![GridCell { lat: 39.1, lon: -94.6 }],
            UpdateScope::Incremental,
            None,
        );

        handler.handle_event(&event).await.unwrap();

        assert_eq!(visualization.calls(), vec!["update_heatmap", "update_grid"]);
    }

    #[tokio::test]
    async fn test_assumption_only_grid_update_is_ignored() {
        let (handler, visualization, _) = handler_with_mocks();
        let event = Event::grid_update(vec![], UpdateScope::AssumptionOnly, None);

        handler.handle_event(&event).await.unwrap();

        assert!(visualization.calls().is_empty());
    }
}

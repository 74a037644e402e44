//! Assumption-layer recalculation handler.

use std::sync::Arc;

use async_trait::async_trait;

use crate::collaborators::AssumptionEngine;
use crate::errors::HandlerError;
use crate::events::envelope::{BoundaryKind, Event, EventPayload, LayerKind};
use crate::handlers::{EventHandler, HandlerCounters, HandlerStats};
use crate::models::{GeoArea, Location};

/// Campuses whose surroundings get a targeted college-presence refresh when
/// an external event lands nearby.
const COLLEGE_HOTSPOTS: &[(&str, Location)] = &[
    ("UMKC", Location { lat: 39.0334, lon: -94.5760 }),
    ("KU", Location { lat: 38.9584, lon: -95.2448 }),
];

/// Half-width of the hotspot proximity box, in degrees (roughly 2 km).
const HOTSPOT_BOX_DEGREES: f64 = 0.02;

fn near_college_hotspot(location: Location) -> Option<&'static str> {
    COLLEGE_HOTSPOTS.iter().find_map(|(name, campus)| {
        let near = (location.lat - campus.lat).abs() <= HOTSPOT_BOX_DEGREES
            && (location.lon - campus.lon).abs() <= HOTSPOT_BOX_DEGREES;
        near.then_some(*name)
    })
}

/// Keeps the spending-propensity and college-presence layers current as time
/// moves and external events appear near campuses.
pub struct AssumptionLayerHandler {
    engine: Arc<dyn AssumptionEngine>,
    counters: HandlerCounters,
}

impl AssumptionLayerHandler {
    pub const NAME: &'static str = "assumption_layer";

    pub fn new(engine: Arc<dyn AssumptionEngine>) -> Self {
        Self {
            engine,
            counters: HandlerCounters::default(),
        }
    }

    async fn react(&self, event: &Event) -> Result<(), HandlerError> {
        match &event.payload {
            EventPayload::TimeChange {
                new_time,
                boundary_type,
                ..
            } => {
                match boundary_type {
                    BoundaryKind::Hour => {
                        self.engine
                            .recalculate_spending_propensity(Some(*new_time))
                            .await?;
                    }
                    BoundaryKind::Day => {
                        self.engine
                            .recalculate_spending_propensity(Some(*new_time))
                            .await?;
                        self.engine
                            .recalculate_college_presence(Some(*new_time))
                            .await?;
                    }
                    BoundaryKind::Week => {
                        self.engine
                            .recalculate_college_presence(Some(*new_time))
                            .await?;
                    }
                    BoundaryKind::Month => {}
                }
                Ok(())
            }

            EventPayload::EventAdded { location, .. } => {
                self.refresh_if_near_campus(*location).await
            }

            EventPayload::EventRemoved { location, .. } => match location {
                Some(location) => self.refresh_if_near_campus(*location).await,
                None => Ok(()),
            },

            EventPayload::AssumptionLayerUpdate {
                layer_type,
                affected_area,
                recalculation_reason,
            } => {
                tracing::debug!(
                    layer = ?layer_type,
                    reason = recalculation_reason,
                    "Recalculating assumption layer"
                );
                match layer_type {
                    LayerKind::SpendingPropensity => {
                        self.engine.recalculate_spending_propensity(None).await?;
                    }
                    LayerKind::CollegePresence => {
                        self.recalculate_college(affected_area.as_ref()).await?;
                    }
                    LayerKind::All => {
                        self.engine.recalculate_spending_propensity(None).await?;
                        self.recalculate_college(affected_area.as_ref()).await?;
                    }
                }
                Ok(())
            }

            _ => Ok(()),
        }
    }

    async fn refresh_if_near_campus(&self, location: Location) -> Result<(), HandlerError> {
        if let Some(campus) = near_college_hotspot(location) {
            tracing::info!(campus, "External event near campus, refreshing college presence");
            self.engine
                .recalculate_college_presence_for_area(location, None)
                .await?;
        }
        Ok(())
    }

    async fn recalculate_college(&self, area: Option<&GeoArea>) -> Result<(), HandlerError> {
        match area {
            Some(area) => {
                let center = Location::new(
                    (area.min_lat + area.max_lat) / 2.0,
                    (area.min_lon + area.max_lon) / 2.0,
                );
                self.engine
                    .recalculate_college_presence_for_area(center, None)
                    .await?;
            }
            None => self.engine.recalculate_college_presence(None).await?,
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for AssumptionLayerHandler {
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

//! Event envelope and typed payload variants.
//!
//! Every event in the system shares a common header (id, timestamp, priority,
//! metadata) wrapping one of a closed set of payload variants. The payload
//! union replaces downcast-style dispatch with exhaustive matching: adding a
//! variant forces every consumer to decide what to do with it.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{GeoArea, GridCell, Location};

/// Advisory event priority. Recorded on the envelope and visible to
/// observers, but it does not affect delivery order: the bus drains a single
/// FIFO queue regardless of priority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Discriminant identifying an event variant's shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TimeChange,
    EventAdded,
    EventRemoved,
    EventUpdated,
    GridUpdate,
    AssumptionLayerUpdate,
    VisualizationUpdate,
    WebhookReceived,
    CacheInvalidation,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TimeChange => "time_change",
            EventKind::EventAdded => "event_added",
            EventKind::EventRemoved => "event_removed",
            EventKind::EventUpdated => "event_updated",
            EventKind::GridUpdate => "grid_update",
            EventKind::AssumptionLayerUpdate => "assumption_layer_update",
            EventKind::VisualizationUpdate => "visualization_update",
            EventKind::WebhookReceived => "webhook_received",
            EventKind::CacheInvalidation => "cache_invalidation",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall-clock boundary that a time-change event reports as crossed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    Hour,
    Day,
    Week,
    Month,
}

impl BoundaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryKind::Hour => "hour",
            BoundaryKind::Day => "day",
            BoundaryKind::Week => "week",
            BoundaryKind::Month => "month",
        }
    }
}

/// Scope of a grid recalculation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateScope {
    Full,
    Incremental,
    AssumptionOnly,
}

/// Which assumption layer a recalculation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    SpendingPropensity,
    CollegePresence,
    All,
}

/// Which visualization surface an update targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualizationKind {
    Heatmap,
    Grid,
    Combined,
    All,
}

/// Closed union of event payloads.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Wall-clock time crossed an hour/day/week/month boundary.
    TimeChange {
        previous_time: DateTime<Utc>,
        new_time: DateTime<Utc>,
        boundary_type: BoundaryKind,
    },

    /// A new external event entered the system.
    EventAdded {
        event_data: Value,
        source: String,
        location: Location,
    },

    /// An external event was removed or cancelled.
    EventRemoved {
        removed_event_id: String,
        source: String,
        location: Option<Location>,
        reason: String,
    },

    /// An existing external event changed.
    EventUpdated {
        updated_event_id: String,
        source: String,
        old_data: Value,
        new_data: Value,
        changed_fields: Vec<String>,
    },

    /// Scoring-grid cells need recomputation.
    GridUpdate {
        affected_cells: Vec<GridCell>,
        update_type: UpdateScope,
        trigger_event_id: Option<Uuid>,
    },

    /// An assumption layer needs recalculation.
    AssumptionLayerUpdate {
        layer_type: LayerKind,
        affected_area: Option<GeoArea>,
        recalculation_reason: String,
    },

    /// A visualization surface needs refreshing.
    VisualizationUpdate {
        visualization_type: VisualizationKind,
        update_data: Value,
        real_time: bool,
    },

    /// A raw vendor webhook arrived at the ingestion boundary.
    WebhookReceived {
        source: String,
        webhook_data: Value,
        webhook_type: String,
    },

    /// Cached derived data became stale.
    CacheInvalidation {
        cache_keys: Vec<String>,
        cache_type: String,
        invalidation_reason: String,
    },
}

impl EventPayload {
    /// The discriminant for this payload's shape.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::TimeChange { .. } => EventKind::TimeChange,
            EventPayload::EventAdded { .. } => EventKind::EventAdded,
            EventPayload::EventRemoved { .. } => EventKind::EventRemoved,
            EventPayload::EventUpdated { .. } => EventKind::EventUpdated,
            EventPayload::GridUpdate { .. } => EventKind::GridUpdate,
            EventPayload::AssumptionLayerUpdate { .. } => EventKind::AssumptionLayerUpdate,
            EventPayload::VisualizationUpdate { .. } => EventKind::VisualizationUpdate,
            EventPayload::WebhookReceived { .. } => EventKind::WebhookReceived,
            EventPayload::CacheInvalidation { .. } => EventKind::CacheInvalidation,
        }
    }
}

/// Common envelope wrapping every typed event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub priority: EventPriority,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Wraps a payload with a fresh id and the current time.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            priority: EventPriority::Normal,
            metadata: HashMap::new(),
            payload,
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// The discriminant for this event's payload.
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn time_change(
        previous_time: DateTime<Utc>,
        new_time: DateTime<Utc>,
        boundary_type: BoundaryKind,
    ) -> Self {
        Self::new(EventPayload::TimeChange {
            previous_time,
            new_time,
            boundary_type,
        })
    }

    pub fn event_added(event_data: Value, source: impl Into<String>, location: Location) -> Self {
        Self::new(EventPayload::EventAdded {
            event_data,
            source: source.into(),
            location,
        })
    }

    pub fn event_removed(
        removed_event_id: impl Into<String>,
        source: impl Into<String>,
        location: Option<Location>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(EventPayload::EventRemoved {
            removed_event_id: removed_event_id.into(),
            source: source.into(),
            location,
            reason: reason.into(),
        })
    }

    pub fn event_updated(
        updated_event_id: impl Into<String>,
        source: impl Into<String>,
        old_data: Value,
        new_data: Value,
        changed_fields: Vec<String>,
    ) -> Self {
        Self::new(EventPayload::EventUpdated {
            updated_event_id: updated_event_id.into(),
            source: source.into(),
            old_data,
            new_data,
            changed_fields,
        })
    }

    pub fn grid_update(
        affected_cells: Vec<GridCell>,
        update_type: UpdateScope,
        trigger_event_id: Option<Uuid>,
    ) -> Self {
        Self::new(EventPayload::GridUpdate {
            affected_cells,
            update_type,
            trigger_event_id,
        })
    }

    pub fn assumption_layer_update(layer_type: LayerKind, reason: impl Into<String>) -> Self {
        Self::new(EventPayload::AssumptionLayerUpdate {
            layer_type,
            affected_area: None,
            recalculation_reason: reason.into(),
        })
    }

    pub fn visualization_update(
        visualization_type: VisualizationKind,
        update_data: Value,
        real_time: bool,
    ) -> Self {
        Self::new(EventPayload::VisualizationUpdate {
            visualization_type,
            update_data,
            real_time,
        })
    }

    pub fn webhook_received(
        source: impl Into<String>,
        webhook_data: Value,
        webhook_type: impl Into<String>,
    ) -> Self {
        Self::new(EventPayload::WebhookReceived {
            source: source.into(),
            webhook_data,
            webhook_type: webhook_type.into(),
        })
    }

    pub fn cache_invalidation(
        cache_keys: Vec<String>,
        cache_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(EventPayload::CacheInvalidation {
            cache_keys,
            cache_type: cache_type.into(),
            invalidation_reason: reason.into(),
        })
    }
}

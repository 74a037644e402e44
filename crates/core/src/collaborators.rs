//! Collaborator seams consumed by the event handlers.
//!
//! Handlers never talk to analytics subsystems directly; they hold
//! `Arc<dyn Trait>` handles defined here. Production wires real engines,
//! the bundled server wires the NoOp variants, and tests wire the Mock
//! variants to assert on the calls a handler made.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::errors::ProcessorError;
use crate::models::{GeoArea, GridCell, Location, NormalizedWebhook};

/// Recomputes assumption layers (spending propensity, college presence).
#[async_trait]
pub trait AssumptionEngine: Send + Sync {
    async fn recalculate_spending_propensity(
        &self,
        as_of: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()>;

    async fn recalculate_college_presence(&self, as_of: Option<DateTime<Utc>>)
        -> anyhow::Result<()>;

    /// Area-scoped recalculation around a point of interest.
    async fn recalculate_college_presence_for_area(
        &self,
        center: Location,
        as_of: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()>;
}

/// Owns the scoring grid: cell scores and the events feeding them.
#[async_trait]
pub trait GridManager: Send + Sync {
    async fn recalculate_all_cells(&self) -> anyhow::Result<()>;

    async fn update_cells(&self, cells: &[GridCell]) -> anyhow::Result<()>;

    async fn update_assumption_scores(&self, cells: &[GridCell]) -> anyhow::Result<()>;

    /// Registers an external event; returns the cells whose scores changed.
    async fn add_event(&self, event_data: &Value, location: Location)
        -> anyhow::Result<Vec<GridCell>>;

    /// Removes an external event; returns the cells whose scores changed.
    async fn remove_event(
        &self,
        event_id: &str,
        location: Option<Location>,
    ) -> anyhow::Result<Vec<GridCell>>;

    async fn update_scores_for_area(&self, area: &GeoArea) -> anyhow::Result<()>;

    async fn update_all_scores(&self) -> anyhow::Result<()>;
}

/// Rebuilds visualization surfaces from fresh scores.
#[async_trait]
pub trait VisualizationManager: Send + Sync {
    async fn update_heatmap(&self, data: Value) -> anyhow::Result<()>;
    async fn update_grid(&self, data: Value) -> anyhow::Result<()>;
    async fn update_combined(&self, data: Value) -> anyhow::Result<()>;
}

/// Pushes real-time payloads to connected clients.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, payload: Value) -> anyhow::Result<()>;
}

/// Translates one vendor's raw webhook payloads into the normalized shape.
/// Translation is CPU-light, so the trait stays synchronous.
pub trait WebhookProcessor: Send + Sync {
    fn source(&self) -> &str;

    fn process(
        &self,
        webhook_type: &str,
        payload: &Value,
    ) -> Result<NormalizedWebhook, ProcessorError>;
}

// No-op implementations for running the coordination layer standalone.

#[derive(Default)]
pub struct NoOpAssumptionEngine;

#[async_trait]
impl AssumptionEngine for NoOpAssumptionEngine {
    async fn recalculate_spending_propensity(
        &self,
        _as_of: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        tracing::debug!("NoOpAssumptionEngine: recalculate_spending_propensity");
        Ok(())
    }

    async fn recalculate_college_presence(
        &self,
        _as_of: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        tracing::debug!("NoOpAssumptionEngine: recalculate_college_presence");
        Ok(())
    }

    async fn recalculate_college_presence_for_area(
        &self,
        _center: Location,
        _as_of: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        tracing::debug!("NoOpAssumptionEngine: recalculate_college_presence_for_area");
        Ok(())
    }
}

#[derive(Default)]
pub struct NoOpGridManager;

#[async_trait]
impl GridManager for NoOpGridManager {
    async fn recalculate_all_cells(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn update_cells(&self, _cells: &[GridCell]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn update_assumption_scores(&self, _cells: &[GridCell]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn add_event(
        &self,
        _event_data: &Value,
        location: Location,
    ) -> anyhow::Result<Vec<GridCell>> {
        Ok(vec![location.into()])
    }

    async fn remove_event(
        &self,
        _event_id: &str,
        location: Option<Location>,
    ) -> anyhow::Result<Vec<GridCell>> {
        Ok(location.map(GridCell::from).into_iter().collect())
    }

    async fn update_scores_for_area(&self, _area: &GeoArea) -> anyhow::Result<()> {
        Ok(())
    }

    async fn update_all_scores(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct NoOpVisualizationManager;

#[async_trait]
impl VisualizationManager for NoOpVisualizationManager {
    async fn update_heatmap(&self, _data: Value) -> anyhow::Result<()> {
        Ok(())
    }

    async fn update_grid(&self, _data: Value) -> anyhow::Result<()> {
        Ok(())
    }

    async fn update_combined(&self, _data: Value) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct NoOpBroadcaster;

#[async_trait]
impl Broadcaster for NoOpBroadcaster {
    async fn broadcast(&self, _payload: Value) -> anyhow::Result<()> {
        Ok(())
    }
}

// Call-recording implementations for tests.

/// Records the method names of every call, in order.
#[derive(Default)]
pub struct MockAssumptionEngine {
    calls: Mutex<Vec<String>>,
}

impl MockAssumptionEngine {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .push(call.into());
    }
}

#[async_trait]
impl AssumptionEngine for MockAssumptionEngine {
    async fn recalculate_spending_propensity(
        &self,
        _as_of: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        self.record("recalculate_spending_propensity");
        Ok(())
    }

    async fn recalculate_college_presence(
        &self,
        _as_of: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        self.record("recalculate_college_presence");
        Ok(())
    }

    async fn recalculate_college_presence_for_area(
        &self,
        center: Location,
        _as_of: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        self.record(format!(
            "recalculate_college_presence_for_area({:.4},{:.4})",
            center.lat, center.lon
        ));
        Ok(())
    }
}

/// Records calls and returns configurable affected cells.
pub struct MockGridManager {
    calls: Mutex<Vec<String>>,
    affected: Vec<GridCell>,
    fail: bool,
}

impl Default for MockGridManager {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            affected: Vec::new(),
            fail: false,
        }
    }
}

impl MockGridManager {
    pub fn returning(affected: Vec<GridCell>) -> Self {
        Self {
            affected,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }

    fn record(&self, call: impl Into<String>) -> anyhow::Result<()> {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .push(call.into());
        if self.fail {
            anyhow::bail!("grid manager unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl GridManager for MockGridManager {
    async fn recalculate_all_cells(&self) -> anyhow::Result<()> {
        self.record("recalculate_all_cells")
    }

    async fn update_cells(&self, cells: &[GridCell]) -> anyhow::Result<()> {
        self.record(format!("update_cells({})", cells.len()))
    }

    async fn update_assumption_scores(&self, cells: &[GridCell]) -> anyhow::Result<()> {
        self.record(format!("update_assumption_scores({})", cells.len()))
    }

    async fn add_event(
        &self,
        _event_data: &Value,
        _location: Location,
    ) -> anyhow::Result<Vec<GridCell>> {
        self.record("add_event")?;
        Ok(self.affected.clone())
    }

    async fn remove_event(
        &self,
        event_id: &str,
        _location: Option<Location>,
    ) -> anyhow::Result<Vec<GridCell>> {
        self.record(format!("remove_event({event_id})"))?;
        Ok(self.affected.clone())
    }

    async fn update_scores_for_area(&self, _area: &GeoArea) -> anyhow::Result<()> {
        self.record("update_scores_for_area")
    }

    async fn update_all_scores(&self) -> anyhow::Result<()> {
        self.record("update_all_scores")
    }
}

#[derive(Default)]
pub struct MockVisualizationManager {
    calls: Mutex<Vec<String>>,
}

impl MockVisualizationManager {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }

    fn record(&self, call: &str) {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .push(call.to_string());
    }
}

#[async_trait]
impl VisualizationManager for MockVisualizationManager {
    async fn update_heatmap(&self, _data: Value) -> anyhow::Result<()> {
        self.record("update_heatmap");
        Ok(())
    }

    async fn update_grid(&self, _data: Value) -> anyhow::Result<()> {
        self.record("update_grid");
        Ok(())
    }

    async fn update_combined(&self, _data: Value) -> anyhow::Result<()> {
        self.record("update_combined");
        Ok(())
    }
}

/// Captures every broadcast payload.
#[derive(Default)]
pub struct MockBroadcaster {
    payloads: Mutex<Vec<Value>>,
}

impl MockBroadcaster {
    pub fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().expect("mock lock poisoned").clone()
    }
}

#[async_trait]
impl Broadcaster for MockBroadcaster {
    async fn broadcast(&self, payload: Value) -> anyhow::Result<()> {
        self.payloads
            .lock()
            .expect("mock lock poisoned")
            .push(payload);
        Ok(())
    }
}

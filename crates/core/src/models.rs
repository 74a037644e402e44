//! Shared geospatial and webhook value types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A point on the map, WGS84 degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    /// Default anchor when a vendor payload carries no usable coordinates.
    pub const KANSAS_CITY: Location = Location {
        lat: 39.0997,
        lon: -94.5786,
    };

    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A rectangular geographic area used to scope score recalculations.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoArea {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl GeoArea {
    pub fn contains(&self, location: Location) -> bool {
        location.lat >= self.min_lat
            && location.lat <= self.max_lat
            && location.lon >= self.min_lon
            && location.lon <= self.max_lon
    }
}

/// Identity of a single scoring-grid cell (its centroid).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub lat: f64,
    pub lon: f64,
}

impl From<Location> for GridCell {
    fn from(location: Location) -> Self {
        Self {
            lat: location.lat,
            lon: location.lon,
        }
    }
}

/// Standardized output of a per-source webhook processor.
///
/// Processors translate raw vendor payloads into this shape; the webhook
/// handler then maps it onto the internal event variants.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NormalizedWebhook {
    /// Vendor-side identifier of the affected event, when one could be found.
    pub event_id: Option<String>,
    /// Normalized event data for add/update flows.
    pub data: Value,
    /// Previous data for update flows, when the vendor supplies it.
    pub old_data: Value,
    /// New data for update flows.
    pub new_data: Value,
    /// Field names the vendor reported as changed.
    pub changed_fields: Vec<String>,
    /// Removal reason for cancellation/deletion flows.
    pub reason: Option<String>,
    /// Geographic anchor of the affected event.
    pub location: Option<Location>,
}

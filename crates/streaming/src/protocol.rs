//! Viewport request/response types shared by the sources, the controller and
//! the HTTP surfaces.
//!
//! JSON field names are camelCase to match what the map front end sends and
//! expects (`totalCount`, `yearEstablished`, ...).

use catalog::Incinerator;
use foundation::MapBounds;
use serde::{Deserialize, Serialize};

/// Below this zoom responses are flagged as clustered.
pub const CLUSTER_ZOOM_THRESHOLD: f64 = 10.0;

/// Below this zoom the local source drops site geometry from its responses.
pub const LOCAL_DETAIL_ZOOM: f64 = 14.0;

/// Below this zoom the remote proxy drops site geometry. Independent of
/// [`LOCAL_DETAIL_ZOOM`].
pub const PROXY_DETAIL_ZOOM: f64 = 12.0;

/// Whether a response at `zoom` should be presented as grouped markers.
///
/// Purely a function of zoom; no markers are merged anywhere.
pub fn clustered_for_zoom(zoom: f64) -> bool {
    zoom < CLUSTER_ZOOM_THRESHOLD
}

/// Result cap before the region multiplier is applied.
pub fn base_cap_for_zoom(zoom: f64) -> usize {
    if zoom < 8.0 {
        20
    } else if zoom < 10.0 {
        50
    } else if zoom < 12.0 {
        100
    } else {
        200
    }
}

/// Viewport the map settled on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportRequest {
    pub bounds: MapBounds,
    pub zoom: f64,
    /// Presentation hint from the client. Sources derive the flag from zoom.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clustered: Option<bool>,
}

impl ViewportRequest {
    pub fn new(bounds: MapBounds, zoom: f64) -> Self {
        Self {
            bounds,
            zoom,
            clustered: None,
        }
    }
}

impl std::fmt::Display for ViewportRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ z{}", self.bounds, self.zoom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportResponse {
    /// What should be rendered; possibly truncated and stripped of geometry.
    pub incinerators: Vec<Incinerator>,
    /// Matches inside the bounds before any truncation.
    pub total_count: usize,
    pub clustered: bool,
}

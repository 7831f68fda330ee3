use std::time::Duration;

use foundation::MapBounds;

/// Named reference rectangle used for latency simulation and UI labels.
///
/// These are not administrative boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: &'static str,
    pub bounds: MapBounds,
    pub load_delay: Duration,
    /// Scales the zoom-derived result cap for this region.
    pub result_multiplier: f64,
}

/// Multiplier applied when bounds match no region.
pub const UNKNOWN_REGION_MULTIPLIER: f64 = 0.3;

/// Ordered lookup table; [`region_for_bounds`] returns the first overlap.
pub static REGIONS: [Region; 6] = [
    Region {
        name: "Praha a okolí",
        bounds: MapBounds::new_unchecked(50.25, 49.90, 14.80, 14.20),
        load_delay: Duration::from_millis(800),
        result_multiplier: 1.5,
    },
    Region {
        name: "Brno a okolí",
        bounds: MapBounds::new_unchecked(49.35, 49.05, 16.85, 16.40),
        load_delay: Duration::from_millis(600),
        result_multiplier: 1.2,
    },
    Region {
        name: "Ostrava a okolí",
        bounds: MapBounds::new_unchecked(49.95, 49.70, 18.45, 18.05),
        load_delay: Duration::from_millis(700),
        result_multiplier: 1.0,
    },
    Region {
        name: "Plzeň a okolí",
        bounds: MapBounds::new_unchecked(49.90, 49.60, 13.55, 13.15),
        load_delay: Duration::from_millis(500),
        result_multiplier: 0.8,
    },
    Region {
        name: "Liberec a okolí",
        bounds: MapBounds::new_unchecked(50.85, 50.65, 15.20, 14.90),
        load_delay: Duration::from_millis(400),
        result_multiplier: 0.7,
    },
    Region {
        name: "Česká republika",
        bounds: MapBounds::new_unchecked(51.06, 48.55, 18.87, 12.09),
        load_delay: Duration::from_millis(1000),
        result_multiplier: 1.0,
    },
];

/// First region in [`REGIONS`] whose rectangle overlaps `bounds`.
///
/// Overlap, not containment: a viewport straddling two cities resolves to
/// whichever comes first in the table.
pub fn region_for_bounds(bounds: &MapBounds) -> Option<&'static Region> {
    REGIONS.iter().find(|r| r.bounds.overlaps(bounds))
}

pub fn region_multiplier(region: Option<&Region>) -> f64 {
    region
        .map(|r| r.result_multiplier)
        .unwrap_or(UNKNOWN_REGION_MULTIPLIER)
}

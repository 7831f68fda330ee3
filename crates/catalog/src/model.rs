//! Incinerator records and their optional heavy geometry.
//!
//! The JSON wire shape is flat and camelCase (`propertyBoundary` and
//! `buildings` are simply absent for summary records). In memory, presence of
//! that geometry is a [`Detail`] variant instead of a pair of loose options.

use std::collections::BTreeMap;

use foundation::LatLng;
use serde::{Deserialize, Serialize};

/// A single linear ring of `[lng, lat]` positions (GeoJSON order).
pub type Ring = Vec<[f64; 2]>;

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeError {
    Empty,
    RingTooShort { ring: usize, positions: usize },
    RingNotClosed { ring: usize },
    NonFinite { ring: usize },
}

impl std::fmt::Display for ShapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShapeError::Empty => write!(f, "shape has no rings"),
            ShapeError::RingTooShort { ring, positions } => {
                write!(f, "ring {ring} has {positions} positions, need at least 4")
            }
            ShapeError::RingNotClosed { ring } => write!(f, "ring {ring} is not closed"),
            ShapeError::NonFinite { ring } => write!(f, "ring {ring} has a non-finite position"),
        }
    }
}

impl std::error::Error for ShapeError {}

/// GeoJSON polygon geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Shape {
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
}

impl Shape {
    pub fn polygon(outer: Ring) -> Self {
        Shape::Polygon {
            coordinates: vec![outer],
        }
    }

    /// All rings, outer rings first within each polygon.
    pub fn rings(&self) -> Vec<&Ring> {
        match self {
            Shape::Polygon { coordinates } => coordinates.iter().collect(),
            Shape::MultiPolygon { coordinates } => coordinates.iter().flatten().collect(),
        }
    }

    pub fn validate(&self) -> Result<(), ShapeError> {
        let rings = self.rings();
        if rings.is_empty() {
            return Err(ShapeError::Empty);
        }
        for (idx, ring) in rings.iter().enumerate() {
            if ring.len() < 4 {
                return Err(ShapeError::RingTooShort {
                    ring: idx,
                    positions: ring.len(),
                });
            }
            if ring.iter().flatten().any(|v| !v.is_finite()) {
                return Err(ShapeError::NonFinite { ring: idx });
            }
            if ring.first() != ring.last() {
                return Err(ShapeError::RingNotClosed { ring: idx });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildingKind {
    MainBuilding,
    ChimneyStack,
    ProcessingUnit,
    StorageArea,
    WasteBunker,
    AshStorage,
    AdministrativeBuilding,
    #[serde(other)]
    Other,
}

/// Structure inside a site. Owned by exactly one [`Incinerator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Building {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: BuildingKind,
    pub geometry: Shape,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficialInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technology: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// Pollutant name → limit in mg/Nm³.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub emission_limits: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteGeometry {
    pub property_boundary: Option<Shape>,
    pub buildings: Vec<Building>,
}

impl SiteGeometry {
    pub fn is_empty(&self) -> bool {
        self.property_boundary.is_none() && self.buildings.is_empty()
    }
}

/// How much geometry a record carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Detail {
    /// Point only; what low-zoom responses carry.
    #[default]
    Summary,
    Detailed(SiteGeometry),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "IncineratorRecord", into = "IncineratorRecord")]
pub struct Incinerator {
    pub id: String,
    pub name: String,
    pub location: LatLng,
    pub operational: bool,
    /// Tonnes of waste per year.
    pub capacity: Option<f64>,
    pub year_established: Option<i32>,
    pub description: Option<String>,
    pub official_info: Option<OfficialInfo>,
    pub detail: Detail,
}

impl Incinerator {
    pub fn has_valid_location(&self) -> bool {
        self.location.is_finite()
    }

    pub fn is_detailed(&self) -> bool {
        matches!(self.detail, Detail::Detailed(_))
    }

    pub fn geometry(&self) -> Option<&SiteGeometry> {
        match &self.detail {
            Detail::Summary => None,
            Detail::Detailed(g) => Some(g),
        }
    }

    /// Copy without `propertyBoundary` and `buildings`.
    pub fn to_summary(&self) -> Incinerator {
        Incinerator {
            detail: Detail::Summary,
            ..self.clone()
        }
    }
}

/// Flat JSON representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncineratorRecord {
    id: String,
    name: String,
    location: LatLng,
    #[serde(default)]
    operational: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    capacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    year_established: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    official_info: Option<OfficialInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    property_boundary: Option<Shape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    buildings: Option<Vec<Building>>,
}

impl From<IncineratorRecord> for Incinerator {
    fn from(r: IncineratorRecord) -> Self {
        let geometry = SiteGeometry {
            property_boundary: r.property_boundary,
            buildings: r.buildings.unwrap_or_default(),
        };
        let detail = if geometry.is_empty() {
            Detail::Summary
        } else {
            Detail::Detailed(geometry)
        };
        Incinerator {
            id: r.id,
            name: r.name,
            location: r.location,
            operational: r.operational,
            capacity: r.capacity,
            year_established: r.year_established,
            description: r.description,
            official_info: r.official_info,
            detail,
        }
    }
}

impl From<Incinerator> for IncineratorRecord {
    fn from(i: Incinerator) -> Self {
        let (property_boundary, buildings) = match i.detail {
            Detail::Summary => (None, None),
            Detail::Detailed(g) => (
                g.property_boundary,
                (!g.buildings.is_empty()).then_some(g.buildings),
            ),
        };
        IncineratorRecord {
            id: i.id,
            name: i.name,
            location: i.location,
            operational: i.operational,
            capacity: i.capacity,
            year_established: i.year_established,
            description: i.description,
            official_info: i.official_info,
            property_boundary,
            buildings,
        }
    }
}

use serde::{Deserialize, Serialize};

/// WGS84 position in degrees.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Both components are finite numbers (no NaN, no infinities).
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundsError {
    NonFinite,
    /// `north <= south`
    InvertedLatitude { north: f64, south: f64 },
    /// `east <= west`
    InvertedLongitude { east: f64, west: f64 },
}

impl std::fmt::Display for BoundsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundsError::NonFinite => write!(f, "bounds contain a non-finite edge"),
            BoundsError::InvertedLatitude { north, south } => {
                write!(f, "north ({north}) must be greater than south ({south})")
            }
            BoundsError::InvertedLongitude { east, west } => {
                write!(f, "east ({east}) must be greater than west ({west})")
            }
        }
    }
}

impl std::error::Error for BoundsError {}

/// Geographic rectangle in degrees, as reported by the map viewport.
///
/// Bounds built with [`MapBounds::new`] satisfy `north > south` and
/// `east > west`. Values coming straight from a map widget can be wrapped with
/// [`MapBounds::new_unchecked`]; every query below is total for such values.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl MapBounds {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Result<Self, BoundsError> {
        let bounds = Self::new_unchecked(north, south, east, west);
        bounds.validate()?;
        Ok(bounds)
    }

    pub const fn new_unchecked(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }

    pub fn validate(&self) -> Result<(), BoundsError> {
        if ![self.north, self.south, self.east, self.west]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(BoundsError::NonFinite);
        }
        if self.north <= self.south {
            return Err(BoundsError::InvertedLatitude {
                north: self.north,
                south: self.south,
            });
        }
        if self.east <= self.west {
            return Err(BoundsError::InvertedLongitude {
                east: self.east,
                west: self.west,
            });
        }
        Ok(())
    }

    pub fn lat_span(&self) -> f64 {
        self.north - self.south
    }

    pub fn lng_span(&self) -> f64 {
        self.east - self.west
    }

    /// Inclusive on every edge.
    pub fn contains(&self, point: LatLng) -> bool {
        point.lat >= self.south
            && point.lat <= self.north
            && point.lng >= self.west
            && point.lng <= self.east
    }

    /// Standard rectangle overlap test. Touching edges count as overlap.
    pub fn overlaps(&self, other: &MapBounds) -> bool {
        !(self.north < other.south
            || self.south > other.north
            || self.east < other.west
            || self.west > other.east)
    }

    /// Grows every side by `ratio` of the corresponding span.
    pub fn expanded(&self, ratio: f64) -> MapBounds {
        let lat_pad = self.lat_span() * ratio;
        let lng_pad = self.lng_span() * ratio;
        MapBounds {
            north: self.north + lat_pad,
            south: self.south - lat_pad,
            east: self.east + lng_pad,
            west: self.west - lng_pad,
        }
    }

    /// True when any edge moved by more than `tolerance` degrees.
    pub fn differs_from(&self, other: &MapBounds, tolerance: f64) -> bool {
        (self.north - other.north).abs() > tolerance
            || (self.south - other.south).abs() > tolerance
            || (self.east - other.east).abs() > tolerance
            || (self.west - other.west).abs() > tolerance
    }
}

impl std::fmt::Display for MapBounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[N {:.4}, S {:.4}, E {:.4}, W {:.4}]",
            self.north, self.south, self.east, self.west
        )
    }
}

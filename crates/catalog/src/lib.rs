pub mod model;
pub mod region;

pub use model::*;
pub use region::*;

use std::sync::OnceLock;

use foundation::MapBounds;

const BUNDLED_DATASET: &str = include_str!("../data/incinerators.json");

#[derive(Debug)]
pub enum CatalogError {
    Corrupt(serde_json::Error),
    DuplicateId(String),
    InvalidLocation(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Corrupt(e) => write!(f, "catalog data is not valid JSON: {e}"),
            CatalogError::DuplicateId(id) => write!(f, "duplicate incinerator id: {id}"),
            CatalogError::InvalidLocation(id) => {
                write!(f, "incinerator {id} has a non-finite location")
            }
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CatalogError::Corrupt(e) => Some(e),
            _ => None,
        }
    }
}

/// Immutable set of incinerator records.
///
/// Records are never mutated in place; queries hand out references and
/// callers copy what they put into a response.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<Incinerator>,
}

impl Catalog {
    pub fn new(entries: Vec<Incinerator>) -> Result<Self, CatalogError> {
        let mut seen = std::collections::BTreeSet::new();
        for e in &entries {
            if !seen.insert(e.id.as_str()) {
                return Err(CatalogError::DuplicateId(e.id.clone()));
            }
            if !e.has_valid_location() {
                return Err(CatalogError::InvalidLocation(e.id.clone()));
            }
        }
        Ok(Self { entries })
    }

    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        let entries: Vec<Incinerator> =
            serde_json::from_str(text).map_err(CatalogError::Corrupt)?;
        Self::new(entries)
    }

    /// The dataset compiled into the binary, parsed once per process.
    pub fn bundled() -> &'static Catalog {
        static BUNDLED: OnceLock<Catalog> = OnceLock::new();
        BUNDLED.get_or_init(|| {
            Catalog::from_json(BUNDLED_DATASET).expect("bundled incinerator dataset is valid")
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn all(&self) -> &[Incinerator] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&Incinerator> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Records inside `bounds` (inclusive edges), in dataset order.
    pub fn within<'a>(&'a self, bounds: &'a MapBounds) -> impl Iterator<Item = &'a Incinerator> {
        self.entries
            .iter()
            .filter(move |e| bounds.contains(e.location))
    }
}

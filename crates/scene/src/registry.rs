//! Explicit registry of live map instances and their open popups.
//!
//! Several maps (and many markers) can be alive at once, so "only one popup
//! open" cannot be left to a single map widget. Whoever owns the map lifecycle
//! holds a [`MapRegistry`] and routes every popup through it. The registry
//! never touches a widget: it returns the popups the caller must close.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapId(pub String);

impl MapId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for MapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PopupId(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PopupKind {
    /// Short summary anchored at the marker.
    Summary,
    /// Full record (official info, buildings).
    Detail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Popup {
    pub id: PopupId,
    pub map: MapId,
    pub incinerator_id: String,
    pub kind: PopupKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    UnknownMap(MapId),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::UnknownMap(id) => write!(f, "map {id} is not registered"),
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Debug, Default)]
pub struct MapRegistry {
    maps: BTreeMap<MapId, Vec<Popup>>,
    current: Option<PopupId>,
    next_popup: u64,
}

impl MapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the map was already registered.
    pub fn register_map(&mut self, id: MapId) -> bool {
        if self.maps.contains_key(&id) {
            return false;
        }
        self.maps.insert(id, Vec::new());
        true
    }

    /// Forgets a map. Its popups are returned for closing.
    pub fn unregister_map(&mut self, id: &MapId) -> Vec<Popup> {
        let popups = self.maps.remove(id).unwrap_or_default();
        if popups.iter().any(|p| Some(p.id) == self.current) {
            self.current = None;
        }
        popups
    }

    pub fn is_registered(&self, id: &MapId) -> bool {
        self.maps.contains_key(id)
    }

    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    pub fn open_popups(&self) -> impl Iterator<Item = &Popup> + '_ {
        self.maps.values().flatten()
    }

    pub fn current_popup(&self) -> Option<&Popup> {
        let current = self.current?;
        self.open_popups().find(|p| p.id == current)
    }

    /// Removes every tracked popup on every map.
    pub fn close_all_popups(&mut self) -> Vec<Popup> {
        self.current = None;
        self.maps
            .values_mut()
            .flat_map(std::mem::take)
            .collect()
    }

    /// Opens a popup as the only one, after closing all others.
    ///
    /// Returns the new popup and the popups that were closed for it.
    pub fn set_current_popup(
        &mut self,
        map: &MapId,
        incinerator_id: impl Into<String>,
        kind: PopupKind,
    ) -> Result<(Popup, Vec<Popup>), RegistryError> {
        if !self.maps.contains_key(map) {
            return Err(RegistryError::UnknownMap(map.clone()));
        }
        let closed = self.close_all_popups();

        self.next_popup += 1;
        let popup = Popup {
            id: PopupId(self.next_popup),
            map: map.clone(),
            incinerator_id: incinerator_id.into(),
            kind,
        };
        if let Some(list) = self.maps.get_mut(map) {
            list.push(popup.clone());
        }
        self.current = Some(popup.id);
        Ok((popup, closed))
    }

    /// Forgets a popup the widget closed on its own (close button, Esc).
    pub fn popup_closed(&mut self, id: PopupId) -> bool {
        let mut found = false;
        for list in self.maps.values_mut() {
            let before = list.len();
            list.retain(|p| p.id != id);
            found |= list.len() != before;
        }
        if self.current == Some(id) {
            self.current = None;
        }
        found
    }
}

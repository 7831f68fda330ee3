use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use catalog::Incinerator;
use foundation::LatLng;
use tracing::debug;

use crate::click::{ClickDisambiguator, DOUBLE_CLICK_WINDOW, Gesture};
use crate::registry::{MapId, MapRegistry, Popup, PopupKind, RegistryError};

#[derive(Debug, Clone)]
pub struct InteractionConfig {
    pub click_window: Duration,
    pub fly_to_zoom: f64,
    pub fly_duration: Duration,
    /// Extra wait after the fly-to animation before the detail opens.
    pub detail_delay: Duration,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            click_window: DOUBLE_CLICK_WINDOW,
            fly_to_zoom: 15.0,
            fly_duration: Duration::from_millis(1500),
            detail_delay: Duration::from_millis(500),
        }
    }
}

/// Camera move for the double-click action.
#[derive(Debug, Clone, PartialEq)]
pub struct FlyToPlan {
    pub map: MapId,
    pub incinerator_id: String,
    pub target: LatLng,
    pub zoom: f64,
    pub duration: Duration,
    /// When the detail popup is due.
    pub detail_at: Instant,
}

/// What the presentation layer has to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerAction {
    ClosePopup(Popup),
    OpenPopup(Popup),
    FlyTo(FlyToPlan),
}

#[derive(Debug)]
struct PendingDetail {
    map: MapId,
    incinerator_id: String,
    due: Instant,
}

/// Marker click handling on top of a [`MapRegistry`].
///
/// Single clicks open a summary popup at the marker, double clicks fly to the
/// site and open its detail once the camera settled. Every popup goes through
/// the registry so at most one is open.
#[derive(Debug, Default)]
pub struct MapInteraction {
    config: InteractionConfig,
    registry: MapRegistry,
    clicks: BTreeMap<(MapId, String), ClickDisambiguator>,
    pending_detail: Option<PendingDetail>,
}

impl MapInteraction {
    pub fn new(config: InteractionConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &InteractionConfig {
        &self.config
    }

    pub fn registry(&self) -> &MapRegistry {
        &self.registry
    }

    pub fn register_map(&mut self, id: MapId) -> bool {
        self.registry.register_map(id)
    }

    pub fn unregister_map(&mut self, id: &MapId) -> Vec<MarkerAction> {
        self.clicks.retain(|(map, _), _| map != id);
        if self.pending_detail.as_ref().is_some_and(|p| &p.map == id) {
            self.pending_detail = None;
        }
        close_actions(self.registry.unregister_map(id))
    }

    /// Handles a click on the marker of `incinerator` at `now`.
    pub fn marker_clicked(
        &mut self,
        map: &MapId,
        incinerator: &Incinerator,
        now: Instant,
    ) -> Result<Vec<MarkerAction>, RegistryError> {
        if !self.registry.is_registered(map) {
            return Err(RegistryError::UnknownMap(map.clone()));
        }
        let window = self.config.click_window;
        let gesture = self
            .clicks
            .entry((map.clone(), incinerator.id.clone()))
            .or_insert_with(|| ClickDisambiguator::new(window))
            .click(now);

        match gesture {
            None => Ok(Vec::new()),
            Some(Gesture::SingleClick) => self.open(map, &incinerator.id, PopupKind::Summary),
            Some(Gesture::DoubleClick) => Ok(self.fly_to(map, incinerator, now)),
        }
    }

    fn fly_to(
        &mut self,
        map: &MapId,
        incinerator: &Incinerator,
        now: Instant,
    ) -> Vec<MarkerAction> {
        let mut actions = close_actions(self.registry.close_all_popups());
        let detail_at = now + self.config.fly_duration + self.config.detail_delay;
        let plan = FlyToPlan {
            map: map.clone(),
            incinerator_id: incinerator.id.clone(),
            target: incinerator.location,
            zoom: self.config.fly_to_zoom,
            duration: self.config.fly_duration,
            detail_at,
        };
        debug!(
            map = %map,
            id = %incinerator.id,
            zoom = plan.zoom,
            "double click, flying to site"
        );
        self.pending_detail = Some(PendingDetail {
            map: map.clone(),
            incinerator_id: incinerator.id.clone(),
            due: detail_at,
        });
        actions.push(MarkerAction::FlyTo(plan));
        actions
    }

    fn open(
        &mut self,
        map: &MapId,
        incinerator_id: &str,
        kind: PopupKind,
    ) -> Result<Vec<MarkerAction>, RegistryError> {
        let (popup, closed) = self.registry.set_current_popup(map, incinerator_id, kind)?;
        let mut actions = close_actions(closed);
        actions.push(MarkerAction::OpenPopup(popup));
        Ok(actions)
    }

    /// Fires elapsed single clicks and due detail popups.
    pub fn poll(&mut self, now: Instant) -> Vec<MarkerAction> {
        let mut fired: Vec<(MapId, String, PopupKind)> = self
            .clicks
            .iter_mut()
            .filter_map(|((map, id), click)| {
                click
                    .poll(now)
                    .map(|_| (map.clone(), id.clone(), PopupKind::Summary))
            })
            .collect();
        self.clicks.retain(|_, click| click.is_pending());

        if self.pending_detail.as_ref().is_some_and(|p| now >= p.due) {
            if let Some(p) = self.pending_detail.take() {
                fired.push((p.map, p.incinerator_id, PopupKind::Detail));
            }
        }

        let mut actions = Vec::new();
        for (map, id, kind) in fired {
            match self.open(&map, &id, kind) {
                Ok(mut a) => actions.append(&mut a),
                Err(e) => debug!("dropping popup for {id}: {e}"),
            }
        }
        actions
    }

    /// Earliest instant [`MapInteraction::poll`] has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.clicks
            .values()
            .filter_map(ClickDisambiguator::deadline)
            .chain(self.pending_detail.as_ref().map(|p| p.due))
            .min()
    }

    /// New data replaced the markers; nothing may stay open against them.
    pub fn data_replaced(&mut self) -> Vec<MarkerAction> {
        self.reset()
    }

    pub fn source_switched(&mut self) -> Vec<MarkerAction> {
        self.reset()
    }

    pub fn popup_closed(&mut self, popup: &Popup) -> bool {
        self.registry.popup_closed(popup.id)
    }

    fn reset(&mut self) -> Vec<MarkerAction> {
        self.clicks.clear();
        self.pending_detail = None;
        close_actions(self.registry.close_all_popups())
    }
}

fn close_actions(popups: Vec<Popup>) -> Vec<MarkerAction> {
    popups.into_iter().map(MarkerAction::ClosePopup).collect()
}

//! Single owner of live map layers.
//!
//! The reconciler holds the layer-id to instance table, the attachment state
//! of every overlay and the active basemap. Callers state what they want
//! (show, hide, switch) and the reconciler issues the minimal surface calls.
//!
//! Fetching is not done here. `show_layer` on a layer with no data hands out a
//! `FetchTicket`; whoever fulfils it reports back through `complete_fetch`.
//! There is at most one ticket per layer. Showing a layer whose ticket is in
//! flight reuses that ticket, and hiding it only raises the ticket's abort
//! flag, which the fetcher checks between requests.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use backend::BackendError;
use formats::{Basemap, FeatureCollection, LayerRecord, Project};
use foundation::{BasemapId, GroupId, LayerId};
use tracing::{debug, warn};

use crate::render::MapLayerInstance;
use crate::surface::{MapSurface, SurfaceError, TileLayerSpec, Viewport};

/// Shared cancellation flag for one fetch.
#[derive(Debug, Clone, Default)]
pub struct AbortToken(Rc<Cell<bool>>);

impl AbortToken {
    pub fn is_aborted(&self) -> bool {
        self.0.get()
    }

    pub(crate) fn request(&self) {
        self.0.set(true);
    }

    pub(crate) fn clear(&self) {
        self.0.set(false);
    }
}

#[derive(Debug, Clone)]
pub struct FetchTicket {
    id: u64,
    layer_id: LayerId,
    abort: AbortToken,
}

impl FetchTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn layer_id(&self) -> LayerId {
        self.layer_id
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    pub fn abort_token(&self) -> AbortToken {
        self.abort.clone()
    }
}

impl PartialEq for FetchTicket {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.layer_id == other.layer_id
    }
}

impl Eq for FetchTicket {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShowOutcome {
    /// A built instance was re-attached.
    Attached,
    AlreadyVisible,
    /// The layer has no data yet; the caller must fulfil the ticket.
    FetchRequired(FetchTicket),
    /// A fetch for this layer is already in flight.
    Pending(FetchTicket),
    AttachFailed(SurfaceError),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HideOutcome {
    Detached,
    AbortRequested,
    AlreadyHidden,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteOutcome {
    Attached,
    /// Built but left detached because the layer was hidden meanwhile.
    BuiltHidden,
    /// The ticket was superseded; the result was discarded.
    Stale,
    Aborted,
    Failed(BackendError),
    AttachFailed(SurfaceError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    UnknownLayer(LayerId),
    UnknownGroup(GroupId),
    UnknownBasemap(BasemapId),
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileError::UnknownLayer(id) => write!(f, "unknown layer {id}"),
            ReconcileError::UnknownGroup(id) => write!(f, "unknown layer group {id}"),
            ReconcileError::UnknownBasemap(id) => write!(f, "unknown basemap {id}"),
        }
    }
}

impl std::error::Error for ReconcileError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerNode {
    pub id: LayerId,
    pub name: String,
    pub checked: bool,
    pub built: bool,
    pub loading: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupNode {
    pub id: GroupId,
    pub name: String,
    pub checked: bool,
    pub layers: Vec<LayerNode>,
}

#[derive(Debug)]
struct LayerSlot {
    record: LayerRecord,
    desired_visible: bool,
    attached: bool,
    instance: Option<MapLayerInstance>,
    in_flight: Option<FetchTicket>,
}

#[derive(Debug)]
struct GroupSlot {
    id: GroupId,
    name: String,
    visible: bool,
    layers: Vec<LayerId>,
}

#[derive(Debug)]
pub struct Reconciler<M> {
    surface: M,
    groups: Vec<GroupSlot>,
    layers: BTreeMap<LayerId, LayerSlot>,
    initially_visible: Vec<LayerId>,
    basemaps: Vec<Basemap>,
    // `None` marks a blank basemap.
    tile_specs: BTreeMap<BasemapId, Option<TileLayerSpec>>,
    active_basemap: Option<BasemapId>,
    next_ticket: u64,
}

impl<M: MapSurface> Reconciler<M> {
    pub fn new(surface: M, project: &Project) -> Self {
        let mut groups = Vec::with_capacity(project.layer_groups.len());
        let mut layers = BTreeMap::new();
        for group in &project.layer_groups {
            groups.push(GroupSlot {
                id: group.id,
                name: group.name.clone(),
                visible: group.visible,
                layers: group.layers.iter().map(|l| l.id).collect(),
            });
            for record in &group.layers {
                layers.insert(
                    record.id,
                    LayerSlot {
                        record: record.clone(),
                        desired_visible: false,
                        attached: false,
                        instance: None,
                        in_flight: None,
                    },
                );
            }
        }

        Self {
            surface,
            groups,
            layers,
            initially_visible: project.initially_visible_layers(),
            basemaps: project.basemaps.clone(),
            tile_specs: BTreeMap::new(),
            active_basemap: None,
            next_ticket: 0,
        }
    }

    pub fn surface(&self) -> &M {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut M {
        &mut self.surface
    }

    pub fn viewport(&self) -> Viewport {
        self.surface.viewport()
    }

    pub fn layer(&self, id: LayerId) -> Option<&LayerRecord> {
        self.layers.get(&id).map(|s| &s.record)
    }

    pub fn instance(&self, id: LayerId) -> Option<&MapLayerInstance> {
        self.layers.get(&id).and_then(|s| s.instance.as_ref())
    }

    pub fn initially_visible_layers(&self) -> &[LayerId] {
        &self.initially_visible
    }

    /// Attached to the map right now.
    pub fn is_visible(&self, id: LayerId) -> bool {
        self.layers.get(&id).is_some_and(|s| s.attached)
    }

    pub fn is_built(&self, id: LayerId) -> bool {
        self.layers.get(&id).is_some_and(|s| s.instance.is_some())
    }

    pub fn is_loading(&self, id: LayerId) -> bool {
        self.layers.get(&id).is_some_and(|s| s.in_flight.is_some())
    }

    pub fn active_basemap(&self) -> Option<BasemapId> {
        self.active_basemap
    }

    pub fn show_layer(&mut self, id: LayerId) -> Result<ShowOutcome, ReconcileError> {
        let slot = self
            .layers
            .get_mut(&id)
            .ok_or(ReconcileError::UnknownLayer(id))?;
        slot.desired_visible = true;

        if slot.attached {
            return Ok(ShowOutcome::AlreadyVisible);
        }
        if let Some(ticket) = &slot.in_flight {
            ticket.abort.clear();
            debug!(layer = %id, ticket = ticket.id, "fetch already in flight");
            return Ok(ShowOutcome::Pending(ticket.clone()));
        }
        if let Some(instance) = &slot.instance {
            return Ok(match self.surface.add_overlay(instance) {
                Ok(()) => {
                    slot.attached = true;
                    ShowOutcome::Attached
                }
                Err(e) => {
                    warn!(layer = %id, "failed to attach layer: {e}");
                    ShowOutcome::AttachFailed(e)
                }
            });
        }

        self.next_ticket += 1;
        let ticket = FetchTicket {
            id: self.next_ticket,
            layer_id: id,
            abort: AbortToken::default(),
        };
        slot.in_flight = Some(ticket.clone());
        Ok(ShowOutcome::FetchRequired(ticket))
    }

    pub fn hide_layer(&mut self, id: LayerId) -> Result<HideOutcome, ReconcileError> {
        let slot = self
            .layers
            .get_mut(&id)
            .ok_or(ReconcileError::UnknownLayer(id))?;
        slot.desired_visible = false;

        if slot.attached {
            self.surface.remove_overlay(id);
            slot.attached = false;
            return Ok(HideOutcome::Detached);
        }
        if let Some(ticket) = &slot.in_flight {
            ticket.abort.request();
            return Ok(HideOutcome::AbortRequested);
        }
        Ok(HideOutcome::AlreadyHidden)
    }

    /// Shows or hides every layer of `group`. Returns the fetches that became necessary.
    pub fn set_group_visible(
        &mut self,
        group: GroupId,
        visible: bool,
    ) -> Result<Vec<FetchTicket>, ReconcileError> {
        let slot = self
            .groups
            .iter_mut()
            .find(|g| g.id == group)
            .ok_or(ReconcileError::UnknownGroup(group))?;
        slot.visible = visible;
        let members = slot.layers.clone();

        let mut fetches = Vec::new();
        for id in members {
            if visible {
                if let ShowOutcome::FetchRequired(ticket) = self.show_layer(id)? {
                    fetches.push(ticket);
                }
            } else {
                self.hide_layer(id)?;
            }
        }
        Ok(fetches)
    }

    /// Reports the result of a fetch started by `show_layer`.
    pub fn complete_fetch(
        &mut self,
        ticket: &FetchTicket,
        result: Result<Arc<FeatureCollection>, BackendError>,
    ) -> CompleteOutcome {
        let id = ticket.layer_id;
        let Some(slot) = self.layers.get_mut(&id) else {
            return CompleteOutcome::Stale;
        };
        if slot.in_flight.as_ref() != Some(ticket) {
            debug!(layer = %id, ticket = ticket.id, "ignoring stale fetch result");
            return CompleteOutcome::Stale;
        }
        slot.in_flight = None;

        let data = match result {
            Ok(data) => data,
            Err(BackendError::Aborted) => {
                debug!(layer = %id, "layer fetch aborted");
                slot.desired_visible = false;
                return CompleteOutcome::Aborted;
            }
            Err(e) => {
                warn!(layer = %id, "failed to load layer: {e}");
                slot.desired_visible = false;
                return CompleteOutcome::Failed(e);
            }
        };

        let instance = MapLayerInstance::build(&slot.record, &data);
        let outcome = if !slot.desired_visible {
            CompleteOutcome::BuiltHidden
        } else {
            match self.surface.add_overlay(&instance) {
                Ok(()) => {
                    slot.attached = true;
                    CompleteOutcome::Attached
                }
                Err(e) => {
                    warn!(layer = %id, "failed to attach layer: {e}");
                    CompleteOutcome::AttachFailed(e)
                }
            }
        };
        debug!(layer = %id, features = data.len(), ?outcome, "layer built");
        slot.instance = Some(instance);
        outcome
    }

    pub fn switch_basemap(&mut self, id: BasemapId) -> Result<(), ReconcileError> {
        let index = self
            .basemaps
            .iter()
            .position(|b| b.id == id)
            .ok_or(ReconcileError::UnknownBasemap(id))?;
        if self.active_basemap == Some(id) {
            return Ok(());
        }
        self.detach_basemap();

        let basemap = &self.basemaps[index];
        let spec = self
            .tile_specs
            .entry(id)
            .or_insert_with(|| TileLayerSpec::from_basemap(basemap));
        match spec {
            Some(spec) => self.surface.add_tile_layer(spec),
            None => self.surface.set_blank_background(true),
        }
        self.active_basemap = Some(id);
        debug!(basemap = %id, "basemap attached");
        Ok(())
    }

    /// Attaches the project's default basemap, or the first one when none is flagged.
    pub fn attach_default_basemap(&mut self) -> Option<BasemapId> {
        let id = self
            .basemaps
            .iter()
            .find(|b| b.is_default)
            .or_else(|| self.basemaps.first())
            .map(|b| b.id)?;
        self.switch_basemap(id).ok()?;
        Some(id)
    }

    /// Detaches and drops every built instance. Returns the layers that were visible.
    pub fn clear_instances(&mut self) -> Vec<LayerId> {
        let mut was_visible = Vec::new();
        for (id, slot) in &mut self.layers {
            if slot.attached {
                self.surface.remove_overlay(*id);
                slot.attached = false;
                was_visible.push(*id);
            }
            if let Some(ticket) = &slot.in_flight {
                ticket.abort.request();
            }
            slot.desired_visible = false;
            slot.instance = None;
        }
        was_visible
    }

    /// Detaches everything and hands the surface back to the host.
    pub fn teardown(mut self) -> M {
        self.clear_instances();
        self.detach_basemap();
        self.surface
    }

    pub fn layer_tree(&self) -> Vec<GroupNode> {
        self.groups
            .iter()
            .map(|g| {
                let layers: Vec<LayerNode> = g
                    .layers
                    .iter()
                    .filter_map(|id| self.layers.get(id))
                    .map(|s| LayerNode {
                        id: s.record.id,
                        name: s.record.name.clone(),
                        checked: s.desired_visible,
                        built: s.instance.is_some(),
                        loading: s.in_flight.is_some(),
                    })
                    .collect();
                GroupNode {
                    id: g.id,
                    name: g.name.clone(),
                    checked: g.visible,
                    layers,
                }
            })
            .collect()
    }

    fn detach_basemap(&mut self) {
        let Some(active) = self.active_basemap.take() else {
            return;
        };
        match self.tile_specs.get(&active) {
            Some(Some(_)) => self.surface.remove_tile_layer(active),
            _ => self.surface.set_blank_background(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{CompleteOutcome, HideOutcome, ReconcileError, Reconciler, ShowOutcome};
    use crate::surface::{HeadlessMap, Viewport};
    use backend::BackendError;
    use formats::{Feature, FeatureCollection, GeoPoint, Geometry, Project};
    use foundation::{BasemapId, GroupId, LayerId};
    use pretty_assertions::assert_eq;
    use serde_json::{Map, json};

    fn project() -> Project {
        Project::from_json_value(&json!({
            "id": "demo",
            "layer_groups": [
                {"id": 1, "name": "Transport", "layers": [
                    {"id": 7, "name": "Roads", "visible": true},
                    {"id": 8, "name": "Rail"}
                ]},
                {"id": 2, "name": "Water", "visible": false, "layers": [
                    {"id": 9, "name": "Rivers", "visible": true}
                ]}
            ],
            "basemaps": [
                {"id": 1, "name": "Streets", "url": "https://t.example.org/{z}/{x}/{y}.png"},
                {"id": 2, "name": "Blank", "url": "", "is_default": true},
                {"id": 3, "name": "Satellite", "url": "https://s.example.org/{z}/{x}/{y}.jpg"}
            ]
        }))
        .unwrap()
    }

    fn data() -> Arc<FeatureCollection> {
        Arc::new(FeatureCollection::new(vec![Feature {
            id: None,
            properties: Map::new(),
            geometry: Geometry::Point(GeoPoint::new(0.0, 0.0)),
        }]))
    }

    fn reconciler() -> Reconciler<HeadlessMap> {
        Reconciler::new(HeadlessMap::new(Viewport::default()), &project())
    }

    fn fetch_ticket(outcome: ShowOutcome) -> super::FetchTicket {
        match outcome {
            ShowOutcome::FetchRequired(t) => t,
            other => panic!("expected FetchRequired, got {other:?}"),
        }
    }

    #[test]
    fn first_show_requires_fetch_then_reattaches_without_one() {
        let mut r = reconciler();
        let ticket = fetch_ticket(r.show_layer(LayerId(7)).unwrap());
        assert!(r.is_loading(LayerId(7)));
        assert_eq!(r.complete_fetch(&ticket, Ok(data())), CompleteOutcome::Attached);
        assert!(r.surface().has_overlay(LayerId(7)));

        assert_eq!(r.hide_layer(LayerId(7)).unwrap(), HideOutcome::Detached);
        assert!(!r.surface().has_overlay(LayerId(7)));
        assert!(r.is_built(LayerId(7)));

        assert_eq!(r.show_layer(LayerId(7)).unwrap(), ShowOutcome::Attached);
        assert_eq!(r.show_layer(LayerId(7)).unwrap(), ShowOutcome::AlreadyVisible);
        assert_eq!(r.surface().overlay_adds(), 2);
    }

    #[test]
    fn toggling_during_fetch_reuses_the_ticket() {
        let mut r = reconciler();
        let ticket = fetch_ticket(r.show_layer(LayerId(7)).unwrap());

        assert_eq!(r.hide_layer(LayerId(7)).unwrap(), HideOutcome::AbortRequested);
        assert!(ticket.is_aborted());

        assert_eq!(
            r.show_layer(LayerId(7)).unwrap(),
            ShowOutcome::Pending(ticket.clone())
        );
        assert!(!ticket.is_aborted());

        assert_eq!(r.complete_fetch(&ticket, Ok(data())), CompleteOutcome::Attached);
        assert!(r.is_visible(LayerId(7)));
    }

    #[test]
    fn hidden_layers_are_built_but_not_attached() {
        let mut r = reconciler();
        let ticket = fetch_ticket(r.show_layer(LayerId(8)).unwrap());
        r.hide_layer(LayerId(8)).unwrap();
        assert_eq!(r.complete_fetch(&ticket, Ok(data())), CompleteOutcome::BuiltHidden);
        assert!(r.is_built(LayerId(8)));
        assert!(!r.surface().has_overlay(LayerId(8)));
    }

    #[test]
    fn stale_and_failed_results() {
        let mut r = reconciler();
        let ticket = fetch_ticket(r.show_layer(LayerId(7)).unwrap());
        assert_eq!(
            r.complete_fetch(&ticket, Err(BackendError::Status { code: 500 })),
            CompleteOutcome::Failed(BackendError::Status { code: 500 })
        );
        assert!(!r.is_built(LayerId(7)));
        assert!(!r.is_loading(LayerId(7)));

        // A second completion of the same ticket is ignored.
        assert_eq!(r.complete_fetch(&ticket, Ok(data())), CompleteOutcome::Stale);
        assert!(!r.is_built(LayerId(7)));

        // Showing again starts over with a new ticket.
        let retry = fetch_ticket(r.show_layer(LayerId(7)).unwrap());
        assert!(retry.id() > ticket.id());
    }

    #[test]
    fn rejected_overlays_leave_the_layer_detached() {
        let mut r = reconciler();
        r.surface_mut().reject_overlay(LayerId(7));
        let ticket = fetch_ticket(r.show_layer(LayerId(7)).unwrap());
        assert!(matches!(
            r.complete_fetch(&ticket, Ok(data())),
            CompleteOutcome::AttachFailed(_)
        ));
        assert!(!r.is_visible(LayerId(7)));
        assert!(r.is_built(LayerId(7)));
    }

    #[test]
    fn unknown_ids_are_errors() {
        let mut r = reconciler();
        assert_eq!(
            r.show_layer(LayerId(99)),
            Err(ReconcileError::UnknownLayer(LayerId(99)))
        );
        assert_eq!(
            r.set_group_visible(GroupId(99), true),
            Err(ReconcileError::UnknownGroup(GroupId(99)))
        );
        assert_eq!(
            r.switch_basemap(BasemapId(99)),
            Err(ReconcileError::UnknownBasemap(BasemapId(99)))
        );
    }

    #[test]
    fn group_toggle_applies_to_every_member() {
        let mut r = reconciler();
        let tickets = r.set_group_visible(GroupId(1), true).unwrap();
        assert_eq!(
            tickets.iter().map(|t| t.layer_id()).collect::<Vec<_>>(),
            vec![LayerId(7), LayerId(8)]
        );
        for t in &tickets {
            r.complete_fetch(t, Ok(data()));
        }
        assert_eq!(r.surface().overlays().len(), 2);

        assert!(r.set_group_visible(GroupId(1), false).unwrap().is_empty());
        assert!(r.surface().overlays().is_empty());
        assert!(!r.layer_tree()[0].checked);
    }

    #[test]
    fn exactly_one_basemap_is_attached() {
        let mut r = reconciler();
        assert_eq!(r.attach_default_basemap(), Some(BasemapId(2)));
        assert!(r.surface().blank_background());

        for id in [1, 3, 3, 2, 1, 2, 3] {
            r.switch_basemap(BasemapId(id)).unwrap();
            assert_eq!(r.surface().attached_basemap_count(), 1);
            assert_eq!(r.active_basemap(), Some(BasemapId(id)));
        }
        assert_eq!(r.surface().tile_layers()[0].basemap_id, BasemapId(3));
        // Switching to the active basemap is a no-op.
        assert_eq!(r.surface().tile_layer_adds(), 4);
    }

    #[test]
    fn clear_and_teardown_detach_everything() {
        let mut r = reconciler();
        r.attach_default_basemap();
        let ticket = fetch_ticket(r.show_layer(LayerId(7)).unwrap());
        r.complete_fetch(&ticket, Ok(data()));
        let pending = fetch_ticket(r.show_layer(LayerId(8)).unwrap());

        assert_eq!(r.clear_instances(), vec![LayerId(7)]);
        assert!(!r.is_built(LayerId(7)));
        assert!(pending.is_aborted());
        assert!(r.surface().overlays().is_empty());

        let ticket = fetch_ticket(r.show_layer(LayerId(7)).unwrap());
        r.complete_fetch(&ticket, Ok(data()));
        let map = r.teardown();
        assert!(map.overlays().is_empty());
        assert_eq!(map.attached_basemap_count(), 0);
    }

    #[test]
    fn layer_tree_reflects_state() {
        let mut r = reconciler();
        let ticket = fetch_ticket(r.show_layer(LayerId(7)).unwrap());
        let tree = r.layer_tree();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].name, "Transport");
        assert!(tree[0].layers[0].checked);
        assert!(tree[0].layers[0].loading);
        assert!(!tree[1].checked);

        r.complete_fetch(&ticket, Ok(data()));
        let node = &r.layer_tree()[0].layers[0];
        assert!(node.built && !node.loading);
        assert_eq!(r.initially_visible_layers(), &[LayerId(7)]);
    }
}

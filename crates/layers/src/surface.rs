//! Boundary to the mapping library.
//!
//! Everything that touches live map objects goes through `MapSurface`. The
//! reconciler is its only caller, so attachment state has a single owner.

use std::collections::BTreeMap;

use formats::{Basemap, InitialView};
use foundation::{BasemapId, LayerId, LonLatBounds};

use crate::render::{MapLayerInstance, OverlayKind};

/// Tile layer parameters derived from a basemap record.
#[derive(Debug, Clone, PartialEq)]
pub struct TileLayerSpec {
    pub basemap_id: BasemapId,
    pub url_template: String,
    pub attribution: String,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

impl TileLayerSpec {
    /// `None` for blank basemaps.
    pub fn from_basemap(basemap: &Basemap) -> Option<Self> {
        let url_template = basemap.url_template.clone()?;
        Some(Self {
            basemap_id: basemap.id,
            url_template,
            attribution: basemap.attribution.clone(),
            min_zoom: basemap.options.min_zoom,
            max_zoom: basemap.options.max_zoom,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub bounds: LonLatBounds,
    pub zoom: u8,
}

impl Viewport {
    /// Approximates a 256 px square viewport around `view`.
    pub fn around(view: &InitialView) -> Self {
        let zoom = view.zoom.round().clamp(0.0, 22.0) as u8;
        let half_lon = 180.0 / f64::from(1u32 << zoom);
        let half_lat = 90.0 / f64::from(1u32 << zoom);
        let c = view.center;
        Self {
            bounds: LonLatBounds::new(
                (c.lon_deg - half_lon).max(-180.0),
                (c.lat_deg - half_lat).max(-90.0),
                (c.lon_deg + half_lon).min(180.0),
                (c.lat_deg + half_lat).min(90.0),
            ),
            zoom,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            bounds: LonLatBounds::world(),
            zoom: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    OverlayRejected { layer: LayerId, reason: String },
}

impl std::fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceError::OverlayRejected { layer, reason } => {
                write!(f, "map rejected overlay for layer {layer}: {reason}")
            }
        }
    }
}

impl std::error::Error for SurfaceError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapInitError {
    ContainerNotFound(String),
    Unavailable(String),
}

impl std::fmt::Display for MapInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapInitError::ContainerNotFound(id) => write!(f, "map container '{id}' not found"),
            MapInitError::Unavailable(msg) => write!(f, "map could not be created: {msg}"),
        }
    }
}

impl std::error::Error for MapInitError {}

pub trait MapSurface {
    fn add_tile_layer(&mut self, spec: &TileLayerSpec);
    fn remove_tile_layer(&mut self, basemap: BasemapId);
    /// Shows or hides the blank (white) background used by basemaps without tiles.
    fn set_blank_background(&mut self, visible: bool);
    fn add_overlay(&mut self, instance: &MapLayerInstance) -> Result<(), SurfaceError>;
    fn remove_overlay(&mut self, layer: LayerId);
    fn viewport(&self) -> Viewport;
}

/// Creates map surfaces bound to a host container.
pub trait MapFactory {
    type Surface: MapSurface;

    fn create(
        &mut self,
        container: &str,
        initial_view: Option<&InitialView>,
    ) -> Result<Self::Surface, MapInitError>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OverlaySummary {
    pub kind: OverlayKind,
    pub feature_count: usize,
}

/// A `MapSurface` that records what is attached instead of drawing it.
///
/// Used by the command-line viewer and by tests.
#[derive(Debug, Default, Clone)]
pub struct HeadlessMap {
    viewport: Viewport,
    tile_layers: Vec<TileLayerSpec>,
    blank_background: bool,
    overlays: BTreeMap<LayerId, OverlaySummary>,
    overlay_adds: usize,
    tile_layer_adds: usize,
    rejected: Vec<LayerId>,
}

impl HeadlessMap {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            ..Default::default()
        }
    }

    /// Makes `add_overlay` fail for `layer`.
    pub fn reject_overlay(&mut self, layer: LayerId) {
        self.rejected.push(layer);
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn tile_layers(&self) -> &[TileLayerSpec] {
        &self.tile_layers
    }

    pub fn blank_background(&self) -> bool {
        self.blank_background
    }

    /// Tile layers plus the blank background, if shown.
    pub fn attached_basemap_count(&self) -> usize {
        self.tile_layers.len() + usize::from(self.blank_background)
    }

    pub fn overlays(&self) -> &BTreeMap<LayerId, OverlaySummary> {
        &self.overlays
    }

    pub fn has_overlay(&self, layer: LayerId) -> bool {
        self.overlays.contains_key(&layer)
    }

    pub fn overlay_adds(&self) -> usize {
        self.overlay_adds
    }

    pub fn tile_layer_adds(&self) -> usize {
        self.tile_layer_adds
    }
}

impl MapSurface for HeadlessMap {
    fn add_tile_layer(&mut self, spec: &TileLayerSpec) {
        self.tile_layer_adds += 1;
        self.tile_layers.push(spec.clone());
    }

    fn remove_tile_layer(&mut self, basemap: BasemapId) {
        self.tile_layers.retain(|t| t.basemap_id != basemap);
    }

    fn set_blank_background(&mut self, visible: bool) {
        self.blank_background = visible;
    }

    fn add_overlay(&mut self, instance: &MapLayerInstance) -> Result<(), SurfaceError> {
        let layer = instance.layer_id();
        if self.rejected.contains(&layer) {
            return Err(SurfaceError::OverlayRejected {
                layer,
                reason: "rejected by headless map".to_string(),
            });
        }
        self.overlay_adds += 1;
        self.overlays.insert(
            layer,
            OverlaySummary {
                kind: instance.kind(),
                feature_count: instance.features().len(),
            },
        );
        Ok(())
    }

    fn remove_overlay(&mut self, layer: LayerId) {
        self.overlays.remove(&layer);
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }
}

/// Creates `HeadlessMap`s; can be told to fail a number of times first.
#[derive(Debug, Default, Clone)]
pub struct HeadlessMapFactory {
    failures_remaining: u32,
    created: u32,
}

impl HeadlessMapFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(times: u32) -> Self {
        Self {
            failures_remaining: times,
            created: 0,
        }
    }

    pub fn created(&self) -> u32 {
        self.created
    }
}

impl MapFactory for HeadlessMapFactory {
    type Surface = HeadlessMap;

    fn create(
        &mut self,
        container: &str,
        initial_view: Option<&InitialView>,
    ) -> Result<HeadlessMap, MapInitError> {
        if container.is_empty() {
            return Err(MapInitError::ContainerNotFound(container.to_string()));
        }
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(MapInitError::Unavailable("simulated failure".to_string()));
        }
        self.created += 1;
        let viewport = initial_view.map(Viewport::around).unwrap_or_default();
        Ok(HeadlessMap::new(viewport))
    }
}

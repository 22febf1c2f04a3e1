use formats::{ClusterConfig, Feature, FeatureCollection, GeoPoint, Geometry, LayerRecord};
use foundation::LayerId;

use crate::cluster::{ClusterIcon, cluster_icon};
use crate::popup::Popup;
use crate::style::ResolvedStyle;

#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    CircleMarker {
        center: GeoPoint,
        radius: f64,
        style: ResolvedStyle,
    },
    Path {
        geometry: Geometry,
        style: ResolvedStyle,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFeature {
    /// One marker per position for point-like geometries, a single path otherwise.
    pub symbols: Vec<Symbol>,
    pub popup: Option<Popup>,
}

impl RenderedFeature {
    pub fn from_feature(feature: &Feature, style: &ResolvedStyle) -> Self {
        let marker = |center: GeoPoint| Symbol::CircleMarker {
            center,
            radius: style.radius,
            style: style.clone(),
        };
        let symbols = match &feature.geometry {
            Geometry::Point(p) => vec![marker(*p)],
            Geometry::MultiPoint(points) => points.iter().copied().map(marker).collect(),
            other => vec![Symbol::Path {
                geometry: other.clone(),
                style: style.clone(),
            }],
        };
        Self {
            symbols,
            popup: Popup::from_properties(&feature.properties),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorOverlay {
    pub layer_id: LayerId,
    pub features: Vec<RenderedFeature>,
}

/// All features of a clustered layer, grouped under one map object.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterGroup {
    pub layer_id: LayerId,
    pub config: ClusterConfig,
    pub features: Vec<RenderedFeature>,
}

impl ClusterGroup {
    pub fn marker_count(&self) -> usize {
        self.features
            .iter()
            .flat_map(|f| f.symbols.iter())
            .filter(|s| matches!(s, Symbol::CircleMarker { .. }))
            .count()
    }

    /// Markers are drawn individually from `disable_at_zoom` onwards.
    pub fn clusters_at_zoom(&self, zoom: u8) -> bool {
        self.config.disable_at_zoom.is_none_or(|z| zoom < z)
    }

    pub fn icon_for(&self, count: usize) -> ClusterIcon {
        cluster_icon(&self.config.icon, count)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OverlayKind {
    Vector,
    Cluster,
}

/// A built map layer, owned by the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub enum MapLayerInstance {
    Vector(VectorOverlay),
    Cluster(ClusterGroup),
}

impl MapLayerInstance {
    pub fn build(layer: &LayerRecord, data: &FeatureCollection) -> Self {
        let style = ResolvedStyle::resolve(&layer.style);
        let features = data
            .features
            .iter()
            .map(|f| RenderedFeature::from_feature(f, &style))
            .collect();
        match &layer.cluster {
            Some(config) => MapLayerInstance::Cluster(ClusterGroup {
                layer_id: layer.id,
                config: config.clone(),
                features,
            }),
            None => MapLayerInstance::Vector(VectorOverlay {
                layer_id: layer.id,
                features,
            }),
        }
    }

    pub fn layer_id(&self) -> LayerId {
        match self {
            MapLayerInstance::Vector(v) => v.layer_id,
            MapLayerInstance::Cluster(c) => c.layer_id,
        }
    }

    pub fn kind(&self) -> OverlayKind {
        match self {
            MapLayerInstance::Vector(_) => OverlayKind::Vector,
            MapLayerInstance::Cluster(_) => OverlayKind::Cluster,
        }
    }

    pub fn features(&self) -> &[RenderedFeature] {
        match self {
            MapLayerInstance::Vector(v) => &v.features,
            MapLayerInstance::Cluster(c) => &c.features,
        }
    }
}

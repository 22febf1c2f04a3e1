//! Normalized project configuration.
//!
//! The project endpoint has grown several spellings for the same fields
//! (`layer_groups` / `layerGroups`, `fill_color` / `fillColor`, ids as numbers
//! or strings, an optional `project` wrapper). Everything downstream works on
//! the single representation produced here; the alternate spellings are only
//! known to this module.

use foundation::{BasemapId, GroupId, LayerId};
use serde_json::{Map, Value};
use tracing::warn;

use crate::feature_collection::GeoPoint;

pub const DEFAULT_CLUSTER_RADIUS_PX: f64 = 80.0;
pub const DEFAULT_BASEMAP_MAX_ZOOM: u8 = 19;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct LayerStyle {
    pub color: Option<String>,
    pub weight: Option<f64>,
    pub opacity: Option<f64>,
    pub fill_color: Option<String>,
    pub fill_opacity: Option<f64>,
    pub radius: Option<f64>,
}

/// Closed vocabulary of cluster icon presets.
///
/// Icon factories delivered as code are not executed; they fall back to
/// `Default`.
#[derive(Debug, Default, Clone, PartialEq)]
pub enum ClusterIconPreset {
    #[default]
    Default,
    Circle {
        color: String,
        size: u32,
    },
    Badge {
        background: String,
        text_color: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    pub radius_px: f64,
    /// Zoom level from which markers are no longer clustered.
    pub disable_at_zoom: Option<u8>,
    pub icon: ClusterIconPreset,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            radius_px: DEFAULT_CLUSTER_RADIUS_PX,
            disable_at_zoom: None,
            icon: ClusterIconPreset::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerRecord {
    pub id: LayerId,
    pub group_id: GroupId,
    pub name: String,
    /// Visibility when the project is loaded.
    pub default_visible: bool,
    pub style: LayerStyle,
    pub cluster: Option<ClusterConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerGroup {
    pub id: GroupId,
    pub name: String,
    pub visible: bool,
    pub layers: Vec<LayerRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileOptions {
    pub min_zoom: u8,
    pub max_zoom: u8,
}

impl Default for TileOptions {
    fn default() -> Self {
        Self {
            min_zoom: 0,
            max_zoom: DEFAULT_BASEMAP_MAX_ZOOM,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Basemap {
    pub id: BasemapId,
    pub name: String,
    /// `None` means a blank (white) background.
    pub url_template: Option<String>,
    pub attribution: String,
    pub is_default: bool,
    pub options: TileOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tool {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InitialView {
    pub center: GeoPoint,
    pub zoom: f64,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub initial_view: Option<InitialView>,
    pub layer_groups: Vec<LayerGroup>,
    pub basemaps: Vec<Basemap>,
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectError {
    Json(String),
    NotAnObject,
}

impl std::fmt::Display for ProjectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectError::Json(msg) => write!(f, "project config is not valid JSON: {msg}"),
            ProjectError::NotAnObject => write!(f, "project config must be a JSON object"),
        }
    }
}

impl std::error::Error for ProjectError {}

impl Project {
    pub fn from_json_str(payload: &str) -> Result<Self, ProjectError> {
        let value: Value =
            serde_json::from_str(payload).map_err(|e| ProjectError::Json(e.to_string()))?;
        Self::from_json_value(&value)
    }

    pub fn from_json_value(value: &Value) -> Result<Self, ProjectError> {
        let root = value.as_object().ok_or(ProjectError::NotAnObject)?;
        let obj = flatten_project_wrapper(root);

        let id = str_field(&obj, &["id", "project_id", "projectId", "slug"]).unwrap_or_default();
        let name = str_field(&obj, &["name", "title"]).unwrap_or_else(|| id.clone());

        let layer_groups = array_field(&obj, &["layer_groups", "layerGroups", "groups"])
            .iter()
            .enumerate()
            .filter_map(|(i, v)| parse_group(i, v))
            .collect();

        let mut basemaps: Vec<Basemap> = array_field(&obj, &["basemaps", "baseMaps", "base_maps"])
            .iter()
            .enumerate()
            .filter_map(|(i, v)| parse_basemap(i, v))
            .collect();
        normalize_default_basemap(&mut basemaps);

        let tools = array_field(&obj, &["tools", "map_tools", "mapTools"])
            .iter()
            .filter_map(parse_tool)
            .collect();

        Ok(Self {
            id,
            name,
            initial_view: parse_initial_view(&obj),
            layer_groups,
            basemaps,
            tools,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.layer_groups.is_empty() && self.basemaps.is_empty()
    }

    pub fn layers(&self) -> impl Iterator<Item = &LayerRecord> {
        self.layer_groups.iter().flat_map(|g| g.layers.iter())
    }

    pub fn layer(&self, id: LayerId) -> Option<&LayerRecord> {
        self.layers().find(|l| l.id == id)
    }

    pub fn group(&self, id: GroupId) -> Option<&LayerGroup> {
        self.layer_groups.iter().find(|g| g.id == id)
    }

    pub fn basemap(&self, id: BasemapId) -> Option<&Basemap> {
        self.basemaps.iter().find(|b| b.id == id)
    }

    pub fn default_basemap(&self) -> Option<&Basemap> {
        self.basemaps.iter().find(|b| b.is_default)
    }

    /// Layers shown at load time: visible by default inside a visible group.
    pub fn initially_visible_layers(&self) -> Vec<LayerId> {
        self.layer_groups
            .iter()
            .filter(|g| g.visible)
            .flat_map(|g| g.layers.iter())
            .filter(|l| l.default_visible)
            .map(|l| l.id)
            .collect()
    }
}

/// Some deployments nest the project fields under `project` and put the
/// collections next to it. Merge both levels, inner fields first.
fn flatten_project_wrapper(root: &Map<String, Value>) -> Map<String, Value> {
    let Some(inner) = root.get("project").and_then(|v| v.as_object()) else {
        return root.clone();
    };
    let mut out = inner.clone();
    for (k, v) in root {
        if k != "project" && !out.contains_key(k) {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

fn parse_group(index: usize, value: &Value) -> Option<LayerGroup> {
    let obj = value.as_object()?;
    let Some(id) = id_field(obj, &["id", "group_id", "groupId"]) else {
        warn!(index, "skipping layer group without id");
        return None;
    };
    let id = GroupId(id);
    let layers = array_field(obj, &["layers", "layer_list", "layerList"])
        .iter()
        .enumerate()
        .filter_map(|(i, v)| parse_layer(id, i, v))
        .collect();

    Some(LayerGroup {
        id,
        name: str_field(obj, &["name", "title"]).unwrap_or_else(|| format!("Group {id}")),
        visible: bool_field(obj, &["visible", "is_visible", "isVisible", "visibility"])
            .unwrap_or(true),
        layers,
    })
}

fn parse_layer(group_id: GroupId, index: usize, value: &Value) -> Option<LayerRecord> {
    let obj = value.as_object()?;
    let Some(id) = id_field(obj, &["id", "layer_id", "layerId"]) else {
        warn!(group = %group_id, index, "skipping layer without id");
        return None;
    };
    let id = LayerId(id);

    Some(LayerRecord {
        id,
        group_id,
        name: str_field(obj, &["name", "title", "layer_name", "layerName"])
            .unwrap_or_else(|| format!("Layer {id}")),
        default_visible: bool_field(
            obj,
            &[
                "visible",
                "is_visible",
                "isVisible",
                "default_visible",
                "defaultVisible",
                "visibility",
            ],
        )
        .unwrap_or(false),
        style: parse_style(obj),
        cluster: parse_cluster(id, obj),
    })
}

fn parse_style(layer: &Map<String, Value>) -> LayerStyle {
    // The style may be an object, a JSON-encoded string, or flattened onto the layer.
    let nested = match field(layer, &["style", "style_config", "styleConfig"]) {
        Some(Value::Object(o)) => Some(o.clone()),
        Some(Value::String(s)) => serde_json::from_str::<Map<String, Value>>(s).ok(),
        _ => None,
    };
    let obj = nested.as_ref().unwrap_or(layer);

    LayerStyle {
        color: str_field(obj, &["color", "stroke_color", "strokeColor"]),
        weight: f64_field(obj, &["weight", "stroke_width", "strokeWidth"]),
        opacity: f64_field(obj, &["opacity", "stroke_opacity", "strokeOpacity"]),
        fill_color: str_field(obj, &["fill_color", "fillColor"]),
        fill_opacity: f64_field(obj, &["fill_opacity", "fillOpacity"]),
        radius: f64_field(obj, &["radius", "point_radius", "pointRadius"]),
    }
}

fn parse_cluster(layer: LayerId, obj: &Map<String, Value>) -> Option<ClusterConfig> {
    let raw = field(
        obj,
        &["cluster", "clustering", "cluster_config", "clusterConfig"],
    )?;
    let cfg = match raw {
        Value::Bool(true) => return Some(ClusterConfig::default()),
        Value::Object(o) => o,
        _ => return None,
    };
    if let Some(false) = bool_field(cfg, &["enabled"]) {
        return None;
    }

    let radius_px = f64_field(cfg, &["radius", "maxClusterRadius", "max_cluster_radius"])
        .filter(|r| *r > 0.0)
        .unwrap_or(DEFAULT_CLUSTER_RADIUS_PX);
    let disable_at_zoom = f64_field(
        cfg,
        &[
            "max_zoom",
            "maxZoom",
            "disableClusteringAtZoom",
            "disable_clustering_at_zoom",
        ],
    )
    .map(|z| z.clamp(0.0, 30.0) as u8);

    Some(ClusterConfig {
        radius_px,
        disable_at_zoom,
        icon: parse_icon_preset(layer, cfg),
    })
}

fn parse_icon_preset(layer: LayerId, cfg: &Map<String, Value>) -> ClusterIconPreset {
    if field(cfg, &["iconCreateFunction", "icon_create_function"]).is_some() {
        warn!(%layer, "ignoring executable cluster icon factory; using default preset");
        return ClusterIconPreset::Default;
    }

    let Some(icon) = field(cfg, &["icon", "icon_preset", "iconPreset"]) else {
        return ClusterIconPreset::Default;
    };
    let (preset, params) = match icon {
        Value::String(s) => (s.trim().to_ascii_lowercase(), None),
        Value::Object(o) => (
            str_field(o, &["preset", "kind", "type"])
                .unwrap_or_default()
                .to_ascii_lowercase(),
            Some(o),
        ),
        _ => return ClusterIconPreset::Default,
    };

    let empty = Map::new();
    let params = params.unwrap_or(&empty);
    match preset.as_str() {
        "" | "default" => ClusterIconPreset::Default,
        "circle" => ClusterIconPreset::Circle {
            color: str_field(params, &["color"]).unwrap_or_else(|| "#3388ff".to_string()),
            size: f64_field(params, &["size"])
                .map(|s| s.clamp(8.0, 256.0) as u32)
                .unwrap_or(40),
        },
        "badge" => ClusterIconPreset::Badge {
            background: str_field(params, &["background", "color"])
                .unwrap_or_else(|| "#333333".to_string()),
            text_color: str_field(params, &["text_color", "textColor"])
                .unwrap_or_else(|| "#ffffff".to_string()),
        },
        _ => {
            warn!(%layer, "unknown cluster icon preset; using default preset");
            ClusterIconPreset::Default
        }
    }
}

fn parse_basemap(index: usize, value: &Value) -> Option<Basemap> {
    let obj = value.as_object()?;
    let Some(id) = id_field(obj, &["id", "basemap_id", "basemapId"]) else {
        warn!(index, "skipping basemap without id");
        return None;
    };
    let id = BasemapId(id);

    let url_template = str_field(
        obj,
        &["url", "url_template", "urlTemplate", "tile_url", "tileUrl"],
    )
    .filter(|u| !u.trim().is_empty());

    let options_obj = match field(obj, &["options", "tile_options", "tileOptions"]) {
        Some(Value::Object(o)) => o,
        _ => obj,
    };
    let defaults = TileOptions::default();
    let options = TileOptions {
        min_zoom: f64_field(options_obj, &["min_zoom", "minZoom"])
            .map(|z| z.clamp(0.0, 30.0) as u8)
            .unwrap_or(defaults.min_zoom),
        max_zoom: f64_field(options_obj, &["max_zoom", "maxZoom"])
            .map(|z| z.clamp(0.0, 30.0) as u8)
            .unwrap_or(defaults.max_zoom),
    };

    Some(Basemap {
        id,
        name: str_field(obj, &["name", "title"]).unwrap_or_else(|| format!("Basemap {id}")),
        url_template,
        attribution: str_field(obj, &["attribution"]).unwrap_or_default(),
        is_default: bool_field(obj, &["is_default", "isDefault", "default"]).unwrap_or(false),
        options,
    })
}

/// Exactly one basemap is the default: the first one flagged, else the first one.
fn normalize_default_basemap(basemaps: &mut [Basemap]) {
    let first_default = basemaps.iter().position(|b| b.is_default);
    if let Some(first) = first_default {
        for (i, b) in basemaps.iter_mut().enumerate() {
            if i != first && b.is_default {
                warn!(basemap = %b.id, "multiple default basemaps; keeping the first");
                b.is_default = false;
            }
        }
    } else if let Some(first) = basemaps.first_mut() {
        first.is_default = true;
    }
}

fn parse_tool(value: &Value) -> Option<Tool> {
    let obj = value.as_object()?;
    let id = str_field(obj, &["id", "tool_id", "toolId", "key"])?;
    Some(Tool {
        name: str_field(obj, &["name", "title"]).unwrap_or_else(|| id.clone()),
        kind: str_field(obj, &["kind", "type", "tool_type", "toolType"]).unwrap_or_default(),
        enabled: bool_field(obj, &["enabled", "is_enabled", "isEnabled", "active"])
            .unwrap_or(true),
        id,
    })
}

fn parse_initial_view(obj: &Map<String, Value>) -> Option<InitialView> {
    let center = match field(obj, &["center", "map_center", "mapCenter"])? {
        // Array form follows the mapping library convention: [lat, lon].
        Value::Array(a) if a.len() >= 2 => GeoPoint::new(a[1].as_f64()?, a[0].as_f64()?),
        Value::Object(o) => GeoPoint::new(
            f64_field(o, &["lon", "lng", "longitude"])?,
            f64_field(o, &["lat", "latitude"])?,
        ),
        _ => return None,
    };
    let zoom = f64_field(obj, &["zoom", "default_zoom", "defaultZoom"]).unwrap_or(2.0);
    Some(InitialView { center, zoom })
}

/// First present, non-null value among `keys`.
fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn array_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> &'a [Value] {
    match field(obj, keys) {
        Some(Value::Array(a)) => a,
        _ => &[],
    }
}

fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match field(obj, keys)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn id_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    match field(obj, keys)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn f64_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    match field(obj, keys)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn bool_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    match field(obj, keys)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "visible" => Some(true),
            "false" | "0" | "no" | "hidden" | "none" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

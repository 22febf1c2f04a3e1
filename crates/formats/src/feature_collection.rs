use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lon_deg: f64,
    pub lat_deg: f64,
}

impl GeoPoint {
    pub fn new(lon_deg: f64, lat_deg: f64) -> Self {
        Self { lon_deg, lat_deg }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(GeoPoint),
    MultiPoint(Vec<GeoPoint>),
    LineString(Vec<GeoPoint>),
    MultiLineString(Vec<Vec<GeoPoint>>),
    Polygon(Vec<Vec<GeoPoint>>),
    MultiPolygon(Vec<Vec<Vec<GeoPoint>>>),
}

impl Geometry {
    /// Point-like geometries are drawn as circle markers rather than paths.
    pub fn is_point_like(&self) -> bool {
        matches!(self, Geometry::Point(_) | Geometry::MultiPoint(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::LineString(_) => "LineString",
            Geometry::MultiLineString(_) => "MultiLineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: Option<String>,
    pub properties: Map<String, Value>,
    pub geometry: Geometry,
}

/// A GeoJSON FeatureCollection as delivered by the layer feature endpoint.
///
/// Serde support goes through the GeoJSON representation, so a collection
/// serialized by this type is valid GeoJSON and vice versa.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureCollectionError {
    /// The payload is not JSON at all.
    Json(String),
    NotAFeatureCollection,
}

impl std::fmt::Display for FeatureCollectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureCollectionError::Json(msg) => write!(f, "invalid JSON: {msg}"),
            FeatureCollectionError::NotAFeatureCollection => {
                write!(f, "expected GeoJSON FeatureCollection")
            }
        }
    }
}

impl std::error::Error for FeatureCollectionError {}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Append the features of another page of the same layer.
    pub fn extend(&mut self, other: FeatureCollection) {
        self.features.extend(other.features);
    }

    pub fn from_geojson_str(payload: &str) -> Result<Self, FeatureCollectionError> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| FeatureCollectionError::Json(e.to_string()))?;
        Self::from_geojson_value(&value)
    }

    /// Only the envelope is strict. Features that cannot be drawn (no
    /// geometry, unknown geometry type, bad coordinates) are skipped with a
    /// warning and the rest of the collection is kept.
    pub fn from_geojson_value(value: &Value) -> Result<Self, FeatureCollectionError> {
        let obj = value
            .as_object()
            .ok_or(FeatureCollectionError::NotAFeatureCollection)?;
        let ty = obj
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or(FeatureCollectionError::NotAFeatureCollection)?;
        if ty != "FeatureCollection" {
            return Err(FeatureCollectionError::NotAFeatureCollection);
        }

        let features_val = obj
            .get("features")
            .and_then(|v| v.as_array())
            .ok_or(FeatureCollectionError::NotAFeatureCollection)?;

        let mut features = Vec::with_capacity(features_val.len());
        for (index, feat_val) in features_val.iter().enumerate() {
            match parse_feature(feat_val) {
                Ok(feature) => features.push(feature),
                Err(skip) => warn!(index, "skipping feature: {skip}"),
            }
        }

        Ok(Self { features })
    }

    /// Emits a GeoJSON FeatureCollection.
    pub fn to_geojson_value(&self) -> Value {
        let mut root = Map::new();
        root.insert(
            "type".to_string(),
            Value::String("FeatureCollection".to_string()),
        );

        let features = self.features.iter().map(feature_to_geojson_value).collect();
        root.insert("features".to_string(), Value::Array(features));
        Value::Object(root)
    }

    pub fn to_geojson_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_geojson_value())
    }
}

impl Serialize for FeatureCollection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_geojson_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FeatureCollection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_geojson_value(&value).map_err(D::Error::custom)
    }
}

/// Why a feature was left out of the collection.
#[derive(Debug, Clone, PartialEq)]
enum Skip {
    NotAFeature,
    Unlocated,
    UntypedGeometry,
    UnsupportedGeometry(String),
    BadCoordinates(String),
}

impl std::fmt::Display for Skip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Skip::NotAFeature => write!(f, "not a GeoJSON Feature object"),
            Skip::Unlocated => write!(f, "no geometry"),
            Skip::UntypedGeometry => write!(f, "geometry has no type"),
            Skip::UnsupportedGeometry(ty) => write!(f, "geometry type {ty} is not drawable"),
            Skip::BadCoordinates(ty) => write!(f, "malformed {ty} coordinates"),
        }
    }
}

fn parse_feature(value: &Value) -> Result<Feature, Skip> {
    let obj = value.as_object().ok_or(Skip::NotAFeature)?;
    if obj.get("type").and_then(Value::as_str) != Some("Feature") {
        return Err(Skip::NotAFeature);
    }

    let id = match obj.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let properties = obj
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let geometry = match obj.get("geometry") {
        None | Some(Value::Null) => return Err(Skip::Unlocated),
        Some(geom) => parse_geometry(geom)?,
    };

    Ok(Feature {
        id,
        properties,
        geometry,
    })
}

fn feature_to_geojson_value(feat: &Feature) -> Value {
    let mut fobj = Map::new();
    fobj.insert("type".to_string(), Value::String("Feature".to_string()));
    if let Some(id) = &feat.id {
        fobj.insert("id".to_string(), Value::String(id.clone()));
    }
    fobj.insert(
        "properties".to_string(),
        Value::Object(feat.properties.clone()),
    );
    fobj.insert(
        "geometry".to_string(),
        geometry_to_geojson_value(&feat.geometry),
    );
    Value::Object(fobj)
}

fn geometry_to_geojson_value(geom: &Geometry) -> Value {
    let coords = match geom {
        Geometry::Point(p) => point_coords(p),
        Geometry::MultiPoint(ps) | Geometry::LineString(ps) => line_coords(ps),
        Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => {
            Value::Array(lines.iter().map(|l| line_coords(l)).collect())
        }
        Geometry::MultiPolygon(polys) => Value::Array(
            polys
                .iter()
                .map(|poly| Value::Array(poly.iter().map(|r| line_coords(r)).collect()))
                .collect(),
        ),
    };

    let mut obj = Map::new();
    obj.insert(
        "type".to_string(),
        Value::String(geom.type_name().to_string()),
    );
    obj.insert("coordinates".to_string(), coords);
    Value::Object(obj)
}

fn point_coords(p: &GeoPoint) -> Value {
    Value::Array(vec![Value::from(p.lon_deg), Value::from(p.lat_deg)])
}

fn line_coords(points: &[GeoPoint]) -> Value {
    Value::Array(points.iter().map(point_coords).collect())
}

fn parse_geometry(value: &Value) -> Result<Geometry, Skip> {
    let ty = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(Skip::UntypedGeometry)?;
    let coords = value.get("coordinates").unwrap_or(&Value::Null);

    let geometry = match ty {
        "Point" => position(coords).map(Geometry::Point),
        "MultiPoint" => positions(coords).map(Geometry::MultiPoint),
        "LineString" => positions(coords).map(Geometry::LineString),
        "MultiLineString" => nested(coords, positions).map(Geometry::MultiLineString),
        "Polygon" => nested(coords, positions).map(Geometry::Polygon),
        "MultiPolygon" => {
            nested(coords, |poly| nested(poly, positions)).map(Geometry::MultiPolygon)
        }
        other => return Err(Skip::UnsupportedGeometry(other.to_string())),
    };
    geometry.ok_or_else(|| Skip::BadCoordinates(ty.to_string()))
}

/// `[lon, lat]` with an optional trailing altitude, which is dropped.
fn position(value: &Value) -> Option<GeoPoint> {
    match value.as_array()?.as_slice() {
        [lon, lat, ..] => Some(GeoPoint::new(lon.as_f64()?, lat.as_f64()?)),
        _ => None,
    }
}

fn positions(value: &Value) -> Option<Vec<GeoPoint>> {
    nested(value, position)
}

fn nested<T>(value: &Value, item: impl Fn(&Value) -> Option<T>) -> Option<Vec<T>> {
    value.as_array()?.iter().map(item).collect()
}

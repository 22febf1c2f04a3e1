use formats::{FeatureCollection, Project};
use foundation::{LayerId, LonLatBounds};
use serde_json::Value;

pub use futures_util::future::LocalBoxFuture;

/// One chunked request against a layer's feature endpoint.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FeatureQuery {
    pub layer_id: LayerId,
    pub bbox: LonLatBounds,
    pub zoom: u8,
    /// Zero-based chunk index.
    pub chunk: u32,
}

impl FeatureQuery {
    pub fn first(layer_id: LayerId, bbox: LonLatBounds, zoom: u8) -> Self {
        Self {
            layer_id,
            bbox,
            zoom,
            chunk: 0,
        }
    }

    pub fn with_chunk(self, chunk: u32) -> Self {
        Self { chunk, ..self }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeaturePage {
    pub collection: FeatureCollection,
    /// Index of the next chunk to request, if the backend has more.
    pub next_chunk: Option<u32>,
}

impl FeaturePage {
    /// Parses a FeatureCollection response carrying an optional top-level
    /// `next_chunk` member.
    pub fn from_response_value(value: &Value) -> Result<Self, BackendError> {
        let collection = FeatureCollection::from_geojson_value(value)
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let next_chunk = match value.get("next_chunk") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                v.as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| BackendError::Decode(format!("invalid next_chunk: {v}")))?,
            ),
        };
        Ok(Self {
            collection,
            next_chunk,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    Network(String),
    Status { code: u16 },
    /// Authentication failed and could not be refreshed.
    Unauthorized,
    Decode(String),
    /// The request was abandoned because nobody wants the result anymore.
    Aborted,
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Network(msg) => write!(f, "network error: {msg}"),
            BackendError::Status { code } => write!(f, "backend responded with HTTP {code}"),
            BackendError::Unauthorized => write!(f, "not authorized"),
            BackendError::Decode(msg) => write!(f, "invalid backend response: {msg}"),
            BackendError::Aborted => write!(f, "request aborted"),
        }
    }
}

impl std::error::Error for BackendError {}

/// The REST backend as seen by the viewer.
///
/// Futures are local (not `Send`): the viewer runs on a single thread, the
/// same way the browser event loop does.
pub trait LayerBackend {
    fn fetch_project<'a>(&'a self, project_id: &'a str)
    -> LocalBoxFuture<'a, Result<Project, BackendError>>;

    fn fetch_features<'a>(
        &'a self,
        query: &'a FeatureQuery,
    ) -> LocalBoxFuture<'a, Result<FeaturePage, BackendError>>;
}

impl<B: LayerBackend + ?Sized> LayerBackend for &B {
    fn fetch_project<'a>(&'a self, project_id: &'a str)
    -> LocalBoxFuture<'a, Result<Project, BackendError>> {
        (**self).fetch_project(project_id)
    }

    fn fetch_features<'a>(
        &'a self,
        query: &'a FeatureQuery,
    ) -> LocalBoxFuture<'a, Result<FeaturePage, BackendError>> {
        (**self).fetch_features(query)
    }
}

impl<B: LayerBackend + ?Sized> LayerBackend for Box<B> {
    fn fetch_project<'a>(&'a self, project_id: &'a str)
    -> LocalBoxFuture<'a, Result<Project, BackendError>> {
        (**self).fetch_project(project_id)
    }

    fn fetch_features<'a>(
        &'a self,
        query: &'a FeatureQuery,
    ) -> LocalBoxFuture<'a, Result<FeaturePage, BackendError>> {
        (**self).fetch_features(query)
    }
}

#[cfg(test)]
mod tests {
    use super::{BackendError, FeaturePage};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn page_reads_next_chunk() {
        let page = FeaturePage::from_response_value(&json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"name": "A"},
                "geometry": {"type": "Point", "coordinates": [10.0, 20.0]}
            }],
            "next_chunk": 3
        }))
        .unwrap();
        assert_eq!(page.collection.len(), 1);
        assert_eq!(page.next_chunk, Some(3));

        let last = FeaturePage::from_response_value(&json!({
            "type": "FeatureCollection",
            "features": [],
            "next_chunk": null
        }))
        .unwrap();
        assert_eq!(last.next_chunk, None);
    }

    #[test]
    fn page_rejects_bad_payloads() {
        assert!(matches!(
            FeaturePage::from_response_value(&json!({"detail": "nope"})),
            Err(BackendError::Decode(_))
        ));
        assert!(matches!(
            FeaturePage::from_response_value(&json!({
                "type": "FeatureCollection",
                "features": [],
                "next_chunk": "two"
            })),
            Err(BackendError::Decode(_))
        ));
    }
}

use std::sync::Arc;

use formats::FeatureCollection;
use foundation::LayerId;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::layer_cache::TTL_MS;

/// Namespace for every key the cache writes to persistent storage.
pub const KEY_PREFIX: &str = "gis_layer_cache:";

pub fn entry_key(layer_id: LayerId) -> String {
    format!("{KEY_PREFIX}{layer_id}")
}

/// An entry is valid while `now - timestamp < TTL`.
pub fn is_fresh(timestamp_ms: u64, now_ms: u64) -> bool {
    now_ms.saturating_sub(timestamp_ms) < TTL_MS
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Arc<FeatureCollection>,
    pub layer_name: String,
    pub timestamp_ms: u64,
    /// Byte length of the serialized payload.
    pub size_bytes: usize,
}

impl CacheEntry {
    pub fn is_fresh_at(&self, now_ms: u64) -> bool {
        is_fresh(self.timestamp_ms, now_ms)
    }
}

/// Persistent representation, written with the payload already serialized.
#[derive(Serialize)]
pub(crate) struct PersistedEntryRef<'a> {
    pub layer_id: LayerId,
    pub layer_name: &'a str,
    pub timestamp_ms: u64,
    pub size_bytes: usize,
    pub data: &'a RawValue,
}

#[derive(Deserialize)]
pub(crate) struct PersistedEntry {
    pub layer_name: String,
    pub timestamp_ms: u64,
    pub size_bytes: usize,
    pub data: FeatureCollection,
}

/// Just the bookkeeping fields; the payload is skipped while parsing.
#[derive(Deserialize)]
pub(crate) struct PersistedMeta {
    pub timestamp_ms: u64,
    pub size_bytes: usize,
}

pub(crate) fn encode_persisted(
    layer_id: LayerId,
    layer_name: &str,
    timestamp_ms: u64,
    payload: &str,
) -> Result<String, serde_json::Error> {
    let data = RawValue::from_string(payload.to_string())?;
    serde_json::to_string(&PersistedEntryRef {
        layer_id,
        layer_name,
        timestamp_ms,
        size_bytes: payload.len(),
        data: &data,
    })
}

use std::collections::BTreeMap;
use std::sync::Arc;

use formats::FeatureCollection;
use foundation::{Clock, LayerId, MS_PER_MINUTE};
use storage::{KeyValueStore, StorageError};
use tracing::{debug, warn};

use crate::cleanup::CleanupTimer;
use crate::entry::{
    CacheEntry, KEY_PREFIX, PersistedEntry, PersistedMeta, encode_persisted, entry_key, is_fresh,
};

pub const TTL_MS: u64 = 30 * MS_PER_MINUTE;
pub const CLEANUP_INTERVAL_MS: u64 = 5 * MS_PER_MINUTE;
/// Total bytes of serialized payloads allowed in the persistent tier.
pub const PERSISTENT_BUDGET_BYTES: usize = 4 * 1024 * 1024;
/// Payloads at or above this size are kept in memory only.
pub const MAX_PERSISTED_ITEM_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Limits {
    budget_bytes: usize,
    max_item_bytes: usize,
}

const LIMITS: Limits = Limits {
    budget_bytes: PERSISTENT_BUDGET_BYTES,
    max_item_bytes: MAX_PERSISTED_ITEM_BYTES,
};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub memory_removed: usize,
    pub persistent_removed: usize,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct EvictionReport {
    pub removed: usize,
    pub freed_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub memory_bytes: usize,
    pub persistent_entries: usize,
    pub persistent_bytes: usize,
    pub persistent_budget_bytes: usize,
    /// Share of the persistent budget in use, e.g. `"12.5%"`.
    pub persistent_usage: String,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "memory: {} entries / {} bytes; persistent: {} entries / {} of {} bytes ({})",
            self.memory_entries,
            self.memory_bytes,
            self.persistent_entries,
            self.persistent_bytes,
            self.persistent_budget_bytes,
            self.persistent_usage
        )
    }
}

#[derive(Debug, Clone)]
struct PersistedSummary {
    key: String,
    timestamp_ms: u64,
    size_bytes: usize,
}

/// Two-tier cache of layer feature collections.
///
/// The memory tier is unbounded and checked first. The persistent tier lives
/// in a `KeyValueStore` under `KEY_PREFIX`, is bounded by
/// `PERSISTENT_BUDGET_BYTES` and survives restarts. No operation returns an
/// error: storage failures are logged and the cache degrades to memory-only
/// residency or a miss.
///
/// Cleanup is explicit: `start` arms a `CLEANUP_INTERVAL_MS` timer against
/// the injected clock and the host calls `tick` from its event loop.
#[derive(Debug)]
pub struct LayerCache<S, C> {
    memory: BTreeMap<LayerId, CacheEntry>,
    store: S,
    clock: C,
    limits: Limits,
    timer: CleanupTimer,
}

impl<S: KeyValueStore, C: Clock> LayerCache<S, C> {
    pub fn new(store: S, clock: C) -> Self {
        Self::with_limits(store, clock, LIMITS)
    }

    fn with_limits(store: S, clock: C, limits: Limits) -> Self {
        Self {
            memory: BTreeMap::new(),
            store,
            clock,
            limits,
            timer: CleanupTimer::new(CLEANUP_INTERVAL_MS),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn put(&mut self, layer_id: LayerId, layer_name: &str, data: impl Into<Arc<FeatureCollection>>) {
        let data = data.into();
        let now = self.clock.now_ms();

        let payload = match data.to_geojson_string() {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(layer = %layer_id, "layer data not serializable, caching in memory only: {e}");
                None
            }
        };
        let size_bytes = payload.as_ref().map_or(0, |p| p.len());

        self.memory.insert(
            layer_id,
            CacheEntry {
                data,
                layer_name: layer_name.to_string(),
                timestamp_ms: now,
                size_bytes,
            },
        );

        let Some(payload) = payload else {
            return;
        };

        let key = entry_key(layer_id);
        // Whatever is persisted for this layer is superseded; it must not count
        // against the budget nor outlive the fresh memory entry.
        self.remove_persisted(&key);

        if size_bytes >= self.limits.max_item_bytes {
            debug!(layer = %layer_id, size_bytes, "layer data too large to persist");
            return;
        }

        let value = match encode_persisted(layer_id, layer_name, now, &payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(layer = %layer_id, "failed to encode cache entry: {e}");
                return;
            }
        };

        if !self.ensure_space(size_bytes) {
            debug!(layer = %layer_id, size_bytes, "persistent budget exhausted, memory only");
            return;
        }

        match self.store.set_item(&key, &value) {
            Ok(()) => debug!(layer = %layer_id, size_bytes, "layer data persisted"),
            Err(StorageError::QuotaExceeded) => {
                let report = self.evict_oldest(size_bytes);
                debug!(
                    layer = %layer_id,
                    removed = report.removed,
                    freed = report.freed_bytes,
                    "storage quota exceeded, retrying after eviction"
                );
                if let Err(e) = self.store.set_item(&key, &value) {
                    warn!(layer = %layer_id, "persisting layer data failed, memory only: {e}");
                }
            }
            Err(e) => warn!(layer = %layer_id, "persisting layer data failed, memory only: {e}"),
        }
    }

    pub fn get(&mut self, layer_id: LayerId) -> Option<Arc<FeatureCollection>> {
        let now = self.clock.now_ms();

        if let Some(entry) = self.memory.get(&layer_id) {
            if entry.is_fresh_at(now) {
                return Some(Arc::clone(&entry.data));
            }
            self.memory.remove(&layer_id);
        }

        let key = entry_key(layer_id);
        let raw = match self.store.get_item(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(layer = %layer_id, "reading persisted layer data failed: {e}");
                return None;
            }
        };

        match serde_json::from_str::<PersistedEntry>(&raw) {
            Ok(p) if is_fresh(p.timestamp_ms, now) => {
                debug!(layer = %layer_id, "promoting persisted layer data to memory");
                let data = Arc::new(p.data);
                self.memory.insert(
                    layer_id,
                    CacheEntry {
                        data: Arc::clone(&data),
                        layer_name: p.layer_name,
                        timestamp_ms: p.timestamp_ms,
                        size_bytes: p.size_bytes,
                    },
                );
                Some(data)
            }
            Ok(_) => {
                debug!(layer = %layer_id, "persisted layer data expired");
                self.remove_persisted(&key);
                None
            }
            Err(e) => {
                warn!(layer = %layer_id, "dropping corrupt persisted layer data: {e}");
                self.remove_persisted(&key);
                None
            }
        }
    }

    pub fn has_valid_cache(&mut self, layer_id: LayerId) -> bool {
        self.get(layer_id).is_some()
    }

    pub fn invalidate(&mut self, layer_id: LayerId) {
        self.memory.remove(&layer_id);
        self.remove_persisted(&entry_key(layer_id));
    }

    /// Drops every entry owned by this cache. Keys outside `KEY_PREFIX` are untouched.
    pub fn invalidate_all(&mut self) {
        self.memory.clear();
        for key in self.owned_keys() {
            self.remove_persisted(&key);
        }
    }

    pub fn cleanup_expired(&mut self) -> CleanupReport {
        let now = self.clock.now_ms();

        let before = self.memory.len();
        self.memory.retain(|_, e| e.is_fresh_at(now));
        let memory_removed = before - self.memory.len();

        let mut persistent_removed = 0;
        for key in self.owned_keys() {
            let expired = match self.store.get_item(&key) {
                Ok(Some(raw)) => match serde_json::from_str::<PersistedMeta>(&raw) {
                    Ok(meta) => !is_fresh(meta.timestamp_ms, now),
                    Err(_) => true,
                },
                Ok(None) => false,
                Err(e) => {
                    warn!(%key, "reading persisted entry during cleanup failed: {e}");
                    false
                }
            };
            if expired && self.remove_persisted(&key) {
                persistent_removed += 1;
            }
        }

        if memory_removed + persistent_removed > 0 {
            debug!(memory_removed, persistent_removed, "expired layer data removed");
        }
        CleanupReport {
            memory_removed,
            persistent_removed,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let persisted = self.persisted_summaries();
        let persistent_bytes: usize = persisted.iter().map(|p| p.size_bytes).sum();
        let budget = self.limits.budget_bytes;
        let pct = if budget == 0 {
            0.0
        } else {
            persistent_bytes as f64 * 100.0 / budget as f64
        };

        CacheStats {
            memory_entries: self.memory.len(),
            memory_bytes: self.memory.values().map(|e| e.size_bytes).sum(),
            persistent_entries: persisted.len(),
            persistent_bytes,
            persistent_budget_bytes: budget,
            persistent_usage: format!("{pct:.1}%"),
        }
    }

    pub fn start(&mut self) {
        self.timer.start(self.clock.now_ms());
    }

    pub fn stop(&mut self) {
        self.timer.stop();
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_running()
    }

    /// Runs `cleanup_expired` if the cleanup timer is due.
    pub fn tick(&mut self) -> Option<CleanupReport> {
        if self.timer.poll(self.clock.now_ms()) {
            Some(self.cleanup_expired())
        } else {
            None
        }
    }

    /// Evicts persisted entries oldest first until `bytes_needed` are freed or
    /// half of the entries (rounded up) are gone, whichever comes first.
    pub fn evict_oldest(&mut self, bytes_needed: usize) -> EvictionReport {
        let mut entries = self.persisted_summaries();
        entries.sort_by(|a, b| {
            a.timestamp_ms
                .cmp(&b.timestamp_ms)
                .then_with(|| a.key.cmp(&b.key))
        });
        let max_removals = entries.len().div_ceil(2);

        let mut report = EvictionReport::default();
        for entry in entries {
            if report.freed_bytes >= bytes_needed || report.removed >= max_removals {
                break;
            }
            report.removed += 1;
            if self.remove_persisted(&entry.key) {
                report.freed_bytes += entry.size_bytes;
            }
        }

        if report.removed > 0 {
            debug!(
                removed = report.removed,
                freed = report.freed_bytes,
                bytes_needed,
                "evicted persisted layer data"
            );
        }
        report
    }

    fn ensure_space(&mut self, incoming: usize) -> bool {
        let used = self.persistent_bytes();
        if used + incoming <= self.limits.budget_bytes {
            return true;
        }
        self.evict_oldest(used + incoming - self.limits.budget_bytes);
        self.persistent_bytes() + incoming <= self.limits.budget_bytes
    }

    fn persistent_bytes(&self) -> usize {
        self.persisted_summaries().iter().map(|p| p.size_bytes).sum()
    }

    fn owned_keys(&self) -> Vec<String> {
        match self.store.keys_with_prefix(KEY_PREFIX) {
            Ok(keys) => keys,
            Err(e) => {
                warn!("listing persisted layer data failed: {e}");
                Vec::new()
            }
        }
    }

    /// Corrupt entries are reported as the oldest possible so eviction takes them first.
    fn persisted_summaries(&self) -> Vec<PersistedSummary> {
        let mut out = Vec::new();
        for key in self.owned_keys() {
            let raw = match self.store.get_item(&key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%key, "reading persisted entry failed: {e}");
                    continue;
                }
            };
            let (timestamp_ms, size_bytes) = match serde_json::from_str::<PersistedMeta>(&raw) {
                Ok(meta) => (meta.timestamp_ms, meta.size_bytes),
                Err(_) => (0, raw.len()),
            };
            out.push(PersistedSummary {
                key,
                timestamp_ms,
                size_bytes,
            });
        }
        out
    }

    fn remove_persisted(&mut self, key: &str) -> bool {
        match self.store.remove_item(key) {
            Ok(()) => true,
            Err(e) => {
                warn!(%key, "removing persisted layer data failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::sync::Arc;

    use formats::{Feature, FeatureCollection, GeoPoint, Geometry};
    use foundation::{LayerId, ManualClock};
    use pretty_assertions::assert_eq;
    use serde_json::{Map, Value};
    use storage::{KeyValueStore, LocalStorageStore, MemoryStore, StorageError};

    use super::{LayerCache, Limits, TTL_MS, CLEANUP_INTERVAL_MS};
    use crate::entry::{KEY_PREFIX, entry_key};

    const T0: u64 = 1_700_000_000_000;

    /// Counts reads so tests can assert a memory hit does no storage I/O.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        reads: Cell<usize>,
    }

    impl KeyValueStore for CountingStore {
        fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.reads.set(self.reads.get() + 1);
            self.inner.get_item(key)
        }
        fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
            self.inner.set_item(key, value)
        }
        fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
            self.inner.remove_item(key)
        }
        fn keys(&self) -> Result<Vec<String>, StorageError> {
            self.inner.keys()
        }
    }

    fn padded(pad: usize) -> FeatureCollection {
        let mut properties = Map::new();
        properties.insert("pad".to_string(), Value::String("x".repeat(pad)));
        FeatureCollection::new(vec![Feature {
            id: None,
            properties,
            geometry: Geometry::Point(GeoPoint::new(1.0, 2.0)),
        }])
    }

    /// A collection whose serialized form is exactly `size` bytes.
    fn payload_of_size(size: usize) -> FeatureCollection {
        let base = padded(0).to_geojson_string().unwrap().len();
        assert!(size >= base, "payload size {size} below minimum {base}");
        let fc = padded(size - base);
        assert_eq!(fc.to_geojson_string().unwrap().len(), size);
        fc
    }

    fn limits(budget_bytes: usize, max_item_bytes: usize) -> Limits {
        Limits {
            budget_bytes,
            max_item_bytes,
        }
    }

    fn persisted_ids<S: KeyValueStore>(store: &S) -> Vec<String> {
        store
            .keys_with_prefix(KEY_PREFIX)
            .unwrap()
            .into_iter()
            .map(|k| k.trim_start_matches(KEY_PREFIX).to_string())
            .collect()
    }

    #[test]
    fn put_get_invalidate_and_expiry() {
        let clock = ManualClock::new(T0);
        let mut cache = LayerCache::new(MemoryStore::new(), clock.clone());
        let roads = LayerId(42);

        assert!(!cache.has_valid_cache(roads));
        cache.put(roads, "Roads", padded(10));
        assert!(cache.has_valid_cache(roads));
        assert_eq!(cache.get(roads).unwrap().len(), 1);

        cache.invalidate(roads);
        assert!(!cache.has_valid_cache(roads));
        assert!(persisted_ids(cache.store()).is_empty());

        cache.put(roads, "Roads", padded(10));
        clock.advance(TTL_MS - 1);
        assert!(cache.has_valid_cache(roads));
        clock.advance(1);
        assert!(!cache.has_valid_cache(roads));
        // The expired persisted copy is deleted on read.
        assert!(persisted_ids(cache.store()).is_empty());
    }

    #[test]
    fn repeated_gets_return_identical_payloads() {
        let mut cache = LayerCache::new(MemoryStore::new(), ManualClock::new(T0));
        cache.put(LayerId(1), "A", padded(3));
        let a = cache.get(LayerId(1)).unwrap();
        let b = cache.get(LayerId(1)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a, b);
    }

    #[test]
    fn memory_hit_skips_storage_reads() {
        let mut cache = LayerCache::new(CountingStore::default(), ManualClock::new(T0));
        cache.put(LayerId(1), "A", padded(3));
        let reads = cache.store().reads.get();
        assert!(cache.get(LayerId(1)).is_some());
        assert_eq!(cache.store().reads.get(), reads);
    }

    #[test]
    fn persisted_entries_are_promoted() {
        let clock = ManualClock::new(T0);
        let mut first = LayerCache::new(CountingStore::default(), clock.clone());
        first.put(LayerId(5), "Parcels", padded(20));
        let expected = first.get(LayerId(5)).unwrap();

        // A fresh process sees only the persistent tier.
        let mut second = LayerCache::new(first.into_store(), clock.clone());
        assert_eq!(second.stats().memory_entries, 0);
        let promoted = second.get(LayerId(5)).unwrap();
        assert_eq!(*promoted, *expected);
        assert_eq!(second.stats().memory_entries, 1);

        let reads = second.store().reads.get();
        assert!(second.get(LayerId(5)).is_some());
        assert_eq!(second.store().reads.get(), reads);

        // Promotion keeps the original timestamp, so TTL still counts from creation.
        clock.advance(TTL_MS);
        assert!(second.get(LayerId(5)).is_none());
    }

    #[test]
    fn corrupt_persisted_entries_read_as_missing() {
        let mut store = MemoryStore::new();
        store.set_item(&entry_key(LayerId(9)), "{not json").unwrap();
        let mut cache = LayerCache::new(store, ManualClock::new(T0));
        assert!(cache.get(LayerId(9)).is_none());
        assert!(persisted_ids(cache.store()).is_empty());
    }

    #[test]
    fn cleanup_removes_expired_and_corrupt_entries() {
        let clock = ManualClock::new(T0);
        let mut store = MemoryStore::new();
        store.set_item(&entry_key(LayerId(99)), "garbage").unwrap();
        store.set_item("other_app:token", "keep me").unwrap();

        let mut cache = LayerCache::new(store, clock.clone());
        cache.put(LayerId(1), "Old", padded(1));
        clock.advance(TTL_MS / 2);
        cache.put(LayerId(2), "New", padded(1));
        clock.advance(TTL_MS / 2);

        let report = cache.cleanup_expired();
        assert_eq!(report.memory_removed, 1);
        assert_eq!(report.persistent_removed, 2);
        assert_eq!(persisted_ids(cache.store()), vec!["2"]);
        assert!(cache.has_valid_cache(LayerId(2)));
        assert_eq!(
            cache.store().get_item("other_app:token").unwrap().as_deref(),
            Some("keep me")
        );
    }

    #[test]
    fn timer_drives_cleanup() {
        let clock = ManualClock::new(T0);
        let mut cache = LayerCache::new(MemoryStore::new(), clock.clone());
        cache.put(LayerId(1), "A", padded(1));

        assert_eq!(cache.tick(), None, "not started");
        cache.start();
        assert!(cache.is_running());

        clock.advance(CLEANUP_INTERVAL_MS - 1);
        assert_eq!(cache.tick(), None);
        clock.advance(1);
        let report = cache.tick().expect("due");
        assert_eq!(report.memory_removed, 0);

        clock.advance(TTL_MS);
        let report = cache.tick().expect("due");
        assert_eq!(report.memory_removed, 1);
        assert_eq!(report.persistent_removed, 1);

        cache.stop();
        clock.advance(10 * CLEANUP_INTERVAL_MS);
        assert_eq!(cache.tick(), None);
    }

    #[test]
    fn eviction_takes_oldest_first() {
        let clock = ManualClock::new(T0);
        let size = 200;
        let mut cache =
            LayerCache::with_limits(MemoryStore::new(), clock.clone(), limits(10_000, 5_000));
        for id in [3, 1, 2] {
            // Timestamps follow insertion order, not id order.
            cache.put(LayerId(id), "L", payload_of_size(size));
            clock.advance(1_000);
        }

        let report = cache.evict_oldest(1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.freed_bytes, size);
        assert_eq!(persisted_ids(cache.store()), vec!["1", "2"]);

        let report = cache.evict_oldest(1);
        assert_eq!(report.removed, 1);
        assert_eq!(persisted_ids(cache.store()), vec!["2"]);
    }

    #[test]
    fn eviction_is_capped_at_half_the_entries() {
        let mut cache = LayerCache::with_limits(
            MemoryStore::new(),
            ManualClock::new(T0),
            limits(10_000, 5_000),
        );
        for id in 1..=5 {
            cache.put(LayerId(id), "L", payload_of_size(200));
        }
        let report = cache.evict_oldest(usize::MAX);
        assert_eq!(report.removed, 3);
        assert_eq!(persisted_ids(cache.store()).len(), 2);
    }

    #[test]
    fn scenario_large_put_evicts_until_it_fits() {
        const KB: usize = 1_000;
        let clock = ManualClock::new(T0);
        let mut cache =
            LayerCache::with_limits(MemoryStore::new(), clock.clone(), limits(1_000 * KB, 600 * KB));

        for id in 1..=9 {
            cache.put(LayerId(id), "Older", payload_of_size(100 * KB));
            clock.advance(1_000);
        }
        assert_eq!(cache.stats().persistent_bytes, 900 * KB);

        let roads = payload_of_size(500 * KB);
        cache.put(LayerId(42), "Roads", roads.clone());

        // 400 KB had to be freed: the four oldest entries go, the rest stay.
        assert_eq!(
            persisted_ids(cache.store()),
            vec!["42", "5", "6", "7", "8", "9"]
        );
        let stats = cache.stats();
        assert_eq!(stats.persistent_bytes, 1_000 * KB);
        assert_eq!(stats.persistent_usage, "100.0%");
        assert_eq!(cache.get(LayerId(42)).unwrap().features, roads.features);
    }

    #[test]
    fn budget_is_never_exceeded() {
        let mut cache = LayerCache::with_limits(
            MemoryStore::new(),
            ManualClock::new(T0),
            limits(5_000, 2_500),
        );
        let base = padded(0).to_geojson_string().unwrap().len();
        let mut seed: u64 = 0x2545_f491;
        for i in 0..200u64 {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let size = base + (seed >> 33) as usize % 2_600;
            cache.put(LayerId(i % 17), "L", payload_of_size(size));
            cache.clock().advance(10);
            assert!(cache.stats().persistent_bytes <= 5_000);
            // Memory always holds the latest put, whatever happened to persistence.
            assert!(cache.has_valid_cache(LayerId(i % 17)));
        }
    }

    #[test]
    fn oversized_items_stay_in_memory() {
        let mut cache = LayerCache::with_limits(
            MemoryStore::new(),
            ManualClock::new(T0),
            limits(10_000, 500),
        );
        cache.put(LayerId(1), "Small", payload_of_size(200));
        cache.put(LayerId(1), "Big", payload_of_size(500));
        assert!(persisted_ids(cache.store()).is_empty(), "stale copy replaced");
        assert!(cache.has_valid_cache(LayerId(1)));
    }

    #[test]
    fn quota_error_triggers_one_eviction_retry() {
        let clock = ManualClock::new(T0);
        // Budget is generous; the store's own quota fits only two entries.
        let probe = crate::entry::encode_persisted(
            LayerId(1),
            "L",
            T0,
            &payload_of_size(300).to_geojson_string().unwrap(),
        )
        .unwrap();
        let per_entry = entry_key(LayerId(1)).len() + probe.len();
        let store = MemoryStore::with_quota(2 * per_entry + per_entry / 2);

        let mut cache = LayerCache::with_limits(store, clock.clone(), limits(100_000, 50_000));
        for id in 1..=3 {
            cache.put(LayerId(id), "L", payload_of_size(300));
            clock.advance(1_000);
        }
        assert_eq!(persisted_ids(cache.store()), vec!["2", "3"]);
        assert!(cache.has_valid_cache(LayerId(1)), "still served from memory");
    }

    #[test]
    fn unavailable_storage_degrades_to_memory() {
        let mut cache = LayerCache::new(
            LocalStorageStore::new().unwrap_or(LocalStorageStore),
            ManualClock::new(T0),
        );
        cache.put(LayerId(1), "A", padded(1));
        assert!(cache.has_valid_cache(LayerId(1)));
        cache.invalidate_all();
        assert!(!cache.has_valid_cache(LayerId(1)));
        let stats = cache.stats();
        assert_eq!(stats.persistent_entries, 0);
        assert_eq!(stats.persistent_usage, "0.0%");
    }

    #[test]
    fn invalidate_all_only_touches_owned_keys() {
        let mut store = MemoryStore::new();
        store.set_item("auth:refresh", "secret").unwrap();
        let mut cache = LayerCache::new(store, ManualClock::new(T0));
        cache.put(LayerId(1), "A", padded(1));
        cache.put(LayerId(2), "B", padded(1));

        cache.invalidate_all();
        assert_eq!(cache.stats().memory_entries, 0);
        assert_eq!(cache.store().keys().unwrap(), vec!["auth:refresh"]);
    }

    #[test]
    fn stats_report_both_tiers() {
        let mut cache = LayerCache::with_limits(
            MemoryStore::new(),
            ManualClock::new(T0),
            limits(1_000, 500),
        );
        cache.put(LayerId(1), "A", payload_of_size(250));
        cache.put(LayerId(2), "B", payload_of_size(600));

        let stats = cache.stats();
        assert_eq!(stats.memory_entries, 2);
        assert_eq!(stats.memory_bytes, 850);
        assert_eq!(stats.persistent_entries, 1);
        assert_eq!(stats.persistent_bytes, 250);
        assert_eq!(stats.persistent_usage, "25.0%");
        assert!(stats.to_string().contains("(25.0%)"));
    }
}

use std::rc::Rc;
use std::sync::Arc;

use backend::{BackendError, FeatureQuery, LayerBackend};
use cache::{CacheStats, CleanupReport, LayerCache};
use formats::FeatureCollection;
use foundation::{BasemapId, Clock, GroupId, LayerId};
use storage::KeyValueStore;
use tracing::{debug, info, warn};

use crate::reconciler::{
    CompleteOutcome, FetchTicket, GroupNode, ReconcileError, Reconciler, ShowOutcome,
};
use crate::surface::{MapSurface, Viewport};

/// Upper bound on chunk requests for one layer load.
pub const MAX_CHUNKS_PER_LOAD: u32 = 1_000;

/// An outstanding layer fetch, detached from the controller so that the
/// caller can keep toggling layers while it runs.
#[derive(Debug)]
pub struct FetchJob {
    ticket: FetchTicket,
    layer_name: String,
    viewport: Viewport,
}

impl FetchJob {
    pub fn ticket(&self) -> &FetchTicket {
        &self.ticket
    }

    pub fn layer_id(&self) -> LayerId {
        self.ticket.layer_id()
    }

    /// Requests every chunk of the layer for the job's viewport.
    ///
    /// The abort flag is checked before each request; a raised flag ends the
    /// job with `BackendError::Aborted`.
    pub async fn run<B: LayerBackend + ?Sized>(
        &self,
        backend: &B,
    ) -> Result<FeatureCollection, BackendError> {
        let mut query =
            FeatureQuery::first(self.layer_id(), self.viewport.bounds, self.viewport.zoom);
        let mut out = FeatureCollection::default();
        loop {
            if self.ticket.is_aborted() {
                return Err(BackendError::Aborted);
            }
            let page = backend.fetch_features(&query).await?;
            out.extend(page.collection);
            match page.next_chunk {
                None => break,
                Some(next) if next > query.chunk && next < MAX_CHUNKS_PER_LOAD => {
                    query = query.with_chunk(next);
                }
                Some(next) => {
                    warn!(layer = %self.layer_id(), chunk = query.chunk, next, "ignoring invalid next_chunk");
                    break;
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InitialLoadReport {
    pub loaded: Vec<LayerId>,
    pub failed: Vec<(LayerId, String)>,
}

/// Ties the reconciler to the layer cache and the backend.
pub struct MapController<M, B, S, C> {
    reconciler: Reconciler<M>,
    cache: LayerCache<S, C>,
    backend: Rc<B>,
}

impl<M, B, S, C> MapController<M, B, S, C>
where
    M: MapSurface,
    B: LayerBackend,
    S: KeyValueStore,
    C: Clock,
{
    pub fn new(reconciler: Reconciler<M>, cache: LayerCache<S, C>, backend: Rc<B>) -> Self {
        Self {
            reconciler,
            cache,
            backend,
        }
    }

    pub fn reconciler(&self) -> &Reconciler<M> {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut Reconciler<M> {
        &mut self.reconciler
    }

    pub fn cache(&self) -> &LayerCache<S, C> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut LayerCache<S, C> {
        &mut self.cache
    }

    pub fn backend(&self) -> Rc<B> {
        Rc::clone(&self.backend)
    }

    /// Shows or hides a layer. A cache hit is rendered immediately; otherwise
    /// the returned job must be run and handed to `complete`.
    pub fn set_layer_visible(
        &mut self,
        id: LayerId,
        visible: bool,
    ) -> Result<Option<FetchJob>, ReconcileError> {
        if !visible {
            self.reconciler.hide_layer(id)?;
            return Ok(None);
        }
        match self.reconciler.show_layer(id)? {
            ShowOutcome::FetchRequired(ticket) => Ok(self.fulfill_from_cache(ticket)),
            ShowOutcome::AttachFailed(e) => {
                warn!(layer = %id, "layer could not be shown: {e}");
                Ok(None)
            }
            ShowOutcome::Attached | ShowOutcome::AlreadyVisible | ShowOutcome::Pending(_) => {
                Ok(None)
            }
        }
    }

    pub fn set_group_visible(
        &mut self,
        group: GroupId,
        visible: bool,
    ) -> Result<Vec<FetchJob>, ReconcileError> {
        let tickets = self.reconciler.set_group_visible(group, visible)?;
        Ok(tickets
            .into_iter()
            .filter_map(|t| self.fulfill_from_cache(t))
            .collect())
    }

    /// Stores a successful result in the cache and hands it to the reconciler.
    pub fn complete(
        &mut self,
        job: FetchJob,
        result: Result<FeatureCollection, BackendError>,
    ) -> CompleteOutcome {
        let result = result.map(|collection| {
            let data = Arc::new(collection);
            self.cache.put(job.layer_id(), &job.layer_name, Arc::clone(&data));
            data
        });
        self.reconciler.complete_fetch(&job.ticket, result)
    }

    /// Shows a layer and, if needed, fetches it to completion.
    pub async fn show_layer(
        &mut self,
        id: LayerId,
    ) -> Result<Option<CompleteOutcome>, ReconcileError> {
        let Some(job) = self.set_layer_visible(id, true)? else {
            return Ok(None);
        };
        let backend = Rc::clone(&self.backend);
        let result = job.run(&*backend).await;
        Ok(Some(self.complete(job, result)))
    }

    /// Loads the initially visible layers one after another. A layer that
    /// fails is logged and skipped.
    pub async fn load_initial_layers(&mut self) -> InitialLoadReport {
        let mut report = InitialLoadReport::default();
        for id in self.reconciler.initially_visible_layers().to_vec() {
            match self.show_layer(id).await {
                Ok(None | Some(CompleteOutcome::Attached | CompleteOutcome::BuiltHidden)) => {
                    report.loaded.push(id);
                }
                Ok(Some(CompleteOutcome::Failed(e))) => report.failed.push((id, e.to_string())),
                Ok(Some(CompleteOutcome::AttachFailed(e))) => {
                    report.failed.push((id, e.to_string()))
                }
                Ok(Some(other)) => report.failed.push((id, format!("{other:?}"))),
                Err(e) => {
                    warn!(layer = %id, "skipping initial layer: {e}");
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "initial layers loaded"
        );
        report
    }

    pub fn switch_basemap(&mut self, id: BasemapId) -> Result<(), ReconcileError> {
        self.reconciler.switch_basemap(id)
    }

    /// Drops all cached layer data and every built instance. Returns the
    /// layers that were visible.
    pub fn clear_cache(&mut self) -> Vec<LayerId> {
        self.cache.invalidate_all();
        let was_visible = self.reconciler.clear_instances();
        info!(layers = was_visible.len(), "layer cache cleared");
        was_visible
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drives the cache cleanup timer.
    pub fn tick(&mut self) -> Option<CleanupReport> {
        self.cache.tick()
    }

    pub fn layer_tree(&self) -> Vec<GroupNode> {
        self.reconciler.layer_tree()
    }

    pub fn teardown(mut self) -> M {
        self.cache.stop();
        self.reconciler.teardown()
    }

    fn fulfill_from_cache(&mut self, ticket: FetchTicket) -> Option<FetchJob> {
        let id = ticket.layer_id();
        if let Some(data) = self.cache.get(id) {
            debug!(layer = %id, "layer served from cache");
            self.reconciler.complete_fetch(&ticket, Ok(data));
            return None;
        }
        Some(FetchJob {
            layer_name: self
                .reconciler
                .layer(id)
                .map(|l| l.name.clone())
                .unwrap_or_default(),
            viewport: self.reconciler.viewport(),
            ticket,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;
    use std::rc::Rc;

    use super::MapController;
    use crate::reconciler::{AbortToken, CompleteOutcome, Reconciler};
    use crate::render::OverlayKind;
    use crate::surface::{HeadlessMap, Viewport};
    use backend::{BackendError, FeaturePage, FeatureQuery, LayerBackend, LocalBoxFuture};
    use cache::LayerCache;
    use formats::{Feature, FeatureCollection, GeoPoint, Geometry, Project};
    use foundation::{GroupId, LayerId, LonLatBounds, ManualClock};
    use futures_util::FutureExt;
    use pretty_assertions::assert_eq;
    use serde_json::{Map, json};
    use storage::MemoryStore;

    const T0: u64 = 1_700_000_000_000;

    #[derive(Default)]
    struct MockBackend {
        pages: BTreeMap<LayerId, Vec<FeaturePage>>,
        failing: Vec<LayerId>,
        queries: RefCell<Vec<FeatureQuery>>,
        calls: Cell<usize>,
        abort_on_first_chunk: RefCell<Option<AbortToken>>,
    }

    impl MockBackend {
        fn with_points(mut self, layer: u64, chunks: &[usize]) -> Self {
            let pages = chunks
                .iter()
                .enumerate()
                .map(|(i, &n)| FeaturePage {
                    collection: points(n),
                    next_chunk: (i + 1 < chunks.len()).then_some(i as u32 + 1),
                })
                .collect();
            self.pages.insert(LayerId(layer), pages);
            self
        }

        /// Single page decoded from a raw backend response body.
        fn with_response(mut self, layer: u64, body: serde_json::Value) -> Self {
            let page = FeaturePage::from_response_value(&body).expect("decodable page");
            self.pages.insert(LayerId(layer), vec![page]);
            self
        }

        fn failing(mut self, layer: u64) -> Self {
            self.failing.push(LayerId(layer));
            self
        }
    }

    impl LayerBackend for MockBackend {
        fn fetch_project<'a>(
            &'a self,
            _project_id: &'a str,
        ) -> LocalBoxFuture<'a, Result<Project, BackendError>> {
            async { Ok(project()) }.boxed_local()
        }

        fn fetch_features<'a>(
            &'a self,
            query: &'a FeatureQuery,
        ) -> LocalBoxFuture<'a, Result<FeaturePage, BackendError>> {
            async move {
                self.calls.set(self.calls.get() + 1);
                self.queries.borrow_mut().push(*query);
                if query.chunk == 0 {
                    if let Some(token) = self.abort_on_first_chunk.borrow().as_ref() {
                        token.request();
                    }
                }
                if self.failing.contains(&query.layer_id) {
                    return Err(BackendError::Status { code: 502 });
                }
                self.pages
                    .get(&query.layer_id)
                    .and_then(|p| p.get(query.chunk as usize))
                    .cloned()
                    .ok_or(BackendError::Status { code: 404 })
            }
            .boxed_local()
        }
    }

    fn points(n: usize) -> FeatureCollection {
        FeatureCollection::new(
            (0..n)
                .map(|i| Feature {
                    id: Some(i.to_string()),
                    properties: Map::new(),
                    geometry: Geometry::Point(GeoPoint::new(i as f64 * 0.001, 45.0)),
                })
                .collect(),
        )
    }

    fn project() -> Project {
        Project::from_json_value(&json!({
            "id": "demo",
            "layer_groups": [
                {"id": 1, "name": "Base", "layers": [
                    {"id": 5, "name": "Parcels", "visible": true},
                    {"id": 6, "name": "Broken", "visible": true},
                    {"id": 7, "name": "Roads"}
                ]},
                {"id": 2, "name": "Assets", "layers": [
                    {"id": 11, "name": "Hydrants", "cluster": {"radius": 60}},
                    {"id": 12, "name": "Valves"}
                ]}
            ],
            "basemaps": [{"id": 1, "name": "Streets", "url": "https://t.example.org/{z}/{x}/{y}.png"}]
        }))
        .unwrap()
    }

    type Controller = MapController<HeadlessMap, MockBackend, MemoryStore, ManualClock>;

    fn viewport() -> Viewport {
        Viewport {
            bounds: LonLatBounds::new(-1.0, 44.0, 2.0, 46.0),
            zoom: 11,
        }
    }

    fn controller_with(backend: MockBackend, store: MemoryStore) -> Controller {
        let reconciler = Reconciler::new(HeadlessMap::new(viewport()), &project());
        let cache = LayerCache::new(store, ManualClock::new(T0));
        MapController::new(reconciler, cache, Rc::new(backend))
    }

    fn controller(backend: MockBackend) -> Controller {
        controller_with(backend, MemoryStore::new())
    }

    #[tokio::test]
    async fn chunks_are_fetched_for_the_viewport_and_cached() {
        let mut c = controller(MockBackend::default().with_points(7, &[3, 2]));
        let outcome = c.show_layer(LayerId(7)).await.unwrap();
        assert_eq!(outcome, Some(CompleteOutcome::Attached));

        let queries = c.backend().queries.borrow().clone();
        assert_eq!(
            queries.iter().map(|q| q.chunk).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(queries[0].bbox, viewport().bounds);
        assert_eq!(queries[0].zoom, 11);

        let summary = c.reconciler().surface().overlays()[&LayerId(7)];
        assert_eq!(summary.feature_count, 5);
        assert_eq!(c.cache_mut().get(LayerId(7)).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn hide_and_reshow_does_not_refetch() {
        let mut c = controller(MockBackend::default().with_points(7, &[4]));
        c.show_layer(LayerId(7)).await.unwrap();
        assert_eq!(c.backend().calls.get(), 1);

        assert!(c.set_layer_visible(LayerId(7), false).unwrap().is_none());
        assert!(!c.reconciler().is_visible(LayerId(7)));
        assert!(c.set_layer_visible(LayerId(7), true).unwrap().is_none());
        assert!(c.reconciler().is_visible(LayerId(7)));
        assert_eq!(c.backend().calls.get(), 1);
    }

    #[tokio::test]
    async fn toggle_before_first_fetch_resolves_fetches_once() {
        let mut c = controller(MockBackend::default().with_points(7, &[10]));
        let job = c.set_layer_visible(LayerId(7), true).unwrap().expect("fetch job");

        assert!(c.set_layer_visible(LayerId(7), false).unwrap().is_none());
        assert!(job.ticket().is_aborted());
        assert!(c.set_layer_visible(LayerId(7), true).unwrap().is_none());
        assert!(!job.ticket().is_aborted());

        let backend = c.backend();
        let result = job.run(&*backend).await;
        assert_eq!(c.complete(job, result), CompleteOutcome::Attached);

        assert_eq!(backend.calls.get(), 1);
        assert!(c.reconciler().is_visible(LayerId(7)));
    }

    #[tokio::test]
    async fn abort_is_honoured_between_chunks() {
        let mut c = controller(MockBackend::default().with_points(7, &[5, 5, 5]));
        let job = c.set_layer_visible(LayerId(7), true).unwrap().expect("fetch job");
        *c.backend().abort_on_first_chunk.borrow_mut() = Some(job.ticket().abort_token());

        let backend = c.backend();
        let result = job.run(&*backend).await;
        assert_eq!(result, Err(BackendError::Aborted));
        assert_eq!(backend.calls.get(), 1);

        assert_eq!(c.complete(job, result), CompleteOutcome::Aborted);
        assert!(!c.reconciler().is_built(LayerId(7)));
        assert!(!c.cache_mut().has_valid_cache(LayerId(7)));
    }

    #[tokio::test]
    async fn cached_layers_render_without_fetching() {
        let mut first = controller(MockBackend::default().with_points(7, &[4]));
        first.show_layer(LayerId(7)).await.unwrap();
        let store = first.teardown_store();

        // Same persistent store, fresh process.
        let mut c = controller_with(MockBackend::default(), store);
        assert!(c.set_layer_visible(LayerId(7), true).unwrap().is_none());
        assert!(c.reconciler().is_visible(LayerId(7)));
        assert_eq!(c.backend().calls.get(), 0);
    }

    #[tokio::test]
    async fn failing_initial_layer_does_not_block_siblings() {
        let backend = MockBackend::default().with_points(5, &[2]).failing(6);
        let mut c = controller(backend);
        let report = c.load_initial_layers().await;

        assert_eq!(report.loaded, vec![LayerId(5)]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, LayerId(6));
        assert!(c.reconciler().is_visible(LayerId(5)));
        assert!(!c.reconciler().is_built(LayerId(6)));
    }

    #[tokio::test]
    async fn clustered_layer_with_many_points_is_one_group() {
        let mut c = controller(MockBackend::default().with_points(11, &[400, 600]));
        c.show_layer(LayerId(11)).await.unwrap();

        let overlays = c.reconciler().surface().overlays();
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays[&LayerId(11)].kind, OverlayKind::Cluster);
        assert_eq!(overlays[&LayerId(11)].feature_count, 1000);
    }

    #[tokio::test]
    async fn group_toggle_returns_jobs_for_missing_layers() {
        let backend = MockBackend::default()
            .with_points(11, &[3])
            .with_points(12, &[1]);
        let mut c = controller(backend);
        let jobs = c.set_group_visible(GroupId(2), true).unwrap();
        assert_eq!(jobs.len(), 2);

        let backend = c.backend();
        for job in jobs {
            let result = job.run(&*backend).await;
            c.complete(job, result);
        }
        assert_eq!(c.reconciler().surface().overlays().len(), 2);

        c.set_group_visible(GroupId(2), false).unwrap();
        assert!(c.reconciler().surface().overlays().is_empty());
    }

    #[tokio::test]
    async fn clear_cache_forces_a_refetch() {
        let mut c = controller(MockBackend::default().with_points(7, &[4]));
        c.show_layer(LayerId(7)).await.unwrap();

        assert_eq!(c.clear_cache(), vec![LayerId(7)]);
        assert!(c.reconciler().surface().overlays().is_empty());
        assert_eq!(c.cache_stats().memory_entries, 0);

        c.show_layer(LayerId(7)).await.unwrap();
        assert_eq!(c.backend().calls.get(), 2);
        assert!(c.reconciler().is_visible(LayerId(7)));
    }

    #[tokio::test]
    async fn unlocated_feature_does_not_fail_the_layer() {
        let body = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "id": 1, "properties": {"name": "Gate"},
                 "geometry": {"type": "Point", "coordinates": [0.5, 45.0]}},
                {"type": "Feature", "id": 2, "properties": {"name": "Head office"}, "geometry": null},
                {"type": "Feature", "id": 3, "properties": {},
                 "geometry": {"type": "LineString", "coordinates": [[0.0, 45.0], [1.0, 45.5]]}}
            ]
        });
        let mut c = controller(MockBackend::default().with_response(7, body));

        let outcome = c.show_layer(LayerId(7)).await.unwrap();
        assert_eq!(outcome, Some(CompleteOutcome::Attached));
        assert!(c.reconciler().is_visible(LayerId(7)));
        assert_eq!(c.reconciler().surface().overlays()[&LayerId(7)].feature_count, 2);
    }

    impl Controller {
        fn teardown_store(self) -> MemoryStore {
            self.cache.into_store()
        }
    }
}

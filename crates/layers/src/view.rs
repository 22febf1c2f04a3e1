use std::rc::Rc;

use backend::LayerBackend;
use cache::LayerCache;
use formats::Project;
use foundation::Clock;
use storage::KeyValueStore;
use tracing::{info, warn};

use crate::controller::MapController;
use crate::reconciler::Reconciler;
use crate::surface::{MapFactory, MapInitError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapViewState {
    Uninitialized,
    /// The project has neither layer groups nor basemaps.
    NoData,
    Ready,
    /// The surface could not be created; `retry` may succeed later.
    Failed(MapInitError),
}

/// Map view lifecycle: surface creation, default basemap, retry.
pub struct MapView<F: MapFactory, B, S, C> {
    factory: F,
    container: String,
    project: Project,
    state: MapViewState,
    controller: Option<MapController<F::Surface, B, S, C>>,
    // Held until a controller takes ownership.
    parts: Option<(LayerCache<S, C>, Rc<B>)>,
}

impl<F, B, S, C> MapView<F, B, S, C>
where
    F: MapFactory,
    B: LayerBackend,
    S: KeyValueStore,
    C: Clock,
{
    pub fn new(
        factory: F,
        container: impl Into<String>,
        project: Project,
        cache: LayerCache<S, C>,
        backend: Rc<B>,
    ) -> Self {
        Self {
            factory,
            container: container.into(),
            project,
            state: MapViewState::Uninitialized,
            controller: None,
            parts: Some((cache, backend)),
        }
    }

    pub fn state(&self) -> &MapViewState {
        &self.state
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn controller(&self) -> Option<&MapController<F::Surface, B, S, C>> {
        self.controller.as_ref()
    }

    pub fn controller_mut(&mut self) -> Option<&mut MapController<F::Surface, B, S, C>> {
        self.controller.as_mut()
    }

    pub fn initialize(&mut self) -> &MapViewState {
        if self.controller.is_some() {
            return &self.state;
        }
        if self.project.is_empty() {
            info!(project = %self.project.id, "project has no layers or basemaps");
            self.state = MapViewState::NoData;
            return &self.state;
        }

        match self
            .factory
            .create(&self.container, self.project.initial_view.as_ref())
        {
            Ok(surface) => {
                let Some((cache, backend)) = self.parts.take() else {
                    return &self.state;
                };
                let mut reconciler = Reconciler::new(surface, &self.project);
                reconciler.attach_default_basemap();
                self.controller = Some(MapController::new(reconciler, cache, backend));
                self.state = MapViewState::Ready;
                info!(project = %self.project.id, "map ready");
            }
            Err(e) => {
                warn!(project = %self.project.id, "map initialization failed: {e}");
                self.state = MapViewState::Failed(e);
            }
        }
        &self.state
    }

    /// Re-runs initialization after a failure. Other states are returned as is.
    pub fn retry(&mut self) -> &MapViewState {
        if matches!(self.state, MapViewState::Failed(_)) {
            return self.initialize();
        }
        &self.state
    }

    /// Releases the map surface, if one was created.
    pub fn teardown(self) -> Option<F::Surface> {
        self.controller.map(MapController::teardown)
    }
}

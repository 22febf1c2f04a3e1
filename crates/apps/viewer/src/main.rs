use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use backend::{AuthTokens, HttpBackend, LayerBackend};
use cache::LayerCache;
use clap::{Parser, Subcommand};
use foundation::{BasemapId, LayerId, SystemClock};
use layers::{GroupNode, HeadlessMap, HeadlessMapFactory, MapController, MapView, MapViewState};
use storage::DirStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless viewer for GIS projects")]
struct Args {
    /// Base URL of the GIS REST API
    #[arg(long, env = "VIEWER_API_URL", default_value = "http://localhost:8000")]
    api_url: String,

    /// Bearer access token
    #[arg(long, env = "VIEWER_TOKEN")]
    token: Option<String>,

    /// Refresh token used when the access token is rejected
    #[arg(long, env = "VIEWER_REFRESH_TOKEN")]
    refresh_token: Option<String>,

    /// Directory for the persistent layer cache
    #[arg(long, env = "VIEWER_CACHE_DIR", default_value = ".viewer-cache")]
    cache_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a project and show its layers
    Show {
        /// Project id
        project: String,

        /// Additional layer to show (repeatable)
        #[arg(long = "layer")]
        layers: Vec<u64>,

        /// Basemap to switch to after loading
        #[arg(long)]
        basemap: Option<u64>,

        /// Keep running and expire cache entries until Ctrl-C
        #[arg(long)]
        watch: bool,

        /// Seconds between cleanup timer polls in watch mode
        #[arg(long, default_value_t = 30)]
        poll_secs: u64,
    },

    /// Print persistent cache usage
    Stats,

    /// Remove every cached layer
    Clear,
}

type Controller = MapController<HeadlessMap, HttpBackend, DirStore, SystemClock>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let store = DirStore::open(&args.cache_dir)?;

    match args.command {
        Command::Show {
            project,
            layers,
            basemap,
            watch,
            poll_secs,
        } => {
            let backend = Rc::new(HttpBackend::new(
                args.api_url,
                AuthTokens {
                    access: args.token,
                    refresh: args.refresh_token,
                },
            ));
            let cache = LayerCache::new(store, SystemClock);
            show(backend, cache, &project, &layers, basemap, watch, poll_secs).await?
        }
        Command::Stats => {
            let cache = LayerCache::new(store, SystemClock);
            println!("{}", cache.stats());
        }
        Command::Clear => {
            let mut cache = LayerCache::new(store, SystemClock);
            cache.invalidate_all();
            println!("cache cleared ({})", cache.stats());
        }
    }

    Ok(())
}

async fn show(
    backend: Rc<HttpBackend>,
    cache: LayerCache<DirStore, SystemClock>,
    project_id: &str,
    extra_layers: &[u64],
    basemap: Option<u64>,
    watch: bool,
    poll_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let project = backend.fetch_project(project_id).await?;
    info!(project = %project.id, name = %project.name, "project loaded");

    let mut view = MapView::new(HeadlessMapFactory::new(), "map", project, cache, backend);
    match view.initialize() {
        MapViewState::Ready => {}
        MapViewState::NoData => {
            println!("project {project_id} has no layers or basemaps");
            return Ok(());
        }
        MapViewState::Failed(e) => return Err(e.clone().into()),
        MapViewState::Uninitialized => return Err("map view did not initialize".into()),
    }
    let Some(controller) = view.controller_mut() else {
        return Err("map view has no controller".into());
    };

    if let Some(id) = basemap {
        controller.switch_basemap(BasemapId(id))?;
    }

    let report = controller.load_initial_layers().await;
    for (id, reason) in &report.failed {
        warn!(layer = %id, "layer not loaded: {reason}");
    }
    for &id in extra_layers {
        if let Err(e) = controller.show_layer(LayerId(id)).await {
            warn!(layer = id, "cannot show layer: {e}");
        }
    }

    print_summary(controller);

    if watch {
        watch_cache(controller, Duration::from_secs(poll_secs.max(1))).await?;
    }

    view.teardown();
    Ok(())
}

async fn watch_cache(controller: &mut Controller, poll: Duration) -> std::io::Result<()> {
    controller.cache_mut().start();
    info!(every = ?poll, "watching layer cache, Ctrl-C to stop");

    let mut interval = tokio::time::interval(poll);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Some(report) = controller.tick() {
                    info!(
                        memory_removed = report.memory_removed,
                        persistent_removed = report.persistent_removed,
                        "cache cleanup ran"
                    );
                }
            }
            res = tokio::signal::ctrl_c() => {
                res?;
                break;
            }
        }
    }

    controller.cache_mut().stop();
    Ok(())
}

fn print_summary(controller: &Controller) {
    let reconciler = controller.reconciler();
    if let Some(id) = reconciler.active_basemap() {
        println!("basemap: {id}");
    }
    for group in controller.layer_tree() {
        print_group(&group);
    }
    for (id, overlay) in reconciler.surface().overlays() {
        println!("overlay {id}: {:?} with {} features", overlay.kind, overlay.feature_count);
    }
    println!("{}", controller.cache_stats());
}

fn print_group(group: &GroupNode) {
    println!("[{}] {} ({})", mark(group.checked), group.name, group.id);
    for layer in &group.layers {
        let state = if layer.loading {
            "loading"
        } else if layer.built {
            "built"
        } else {
            "not loaded"
        };
        println!("  [{}] {} ({}) {state}", mark(layer.checked), layer.name, layer.id);
    }
}

fn mark(checked: bool) -> char {
    if checked { 'x' } else { ' ' }
}

//! Map reconciliation: turns layer data into map objects and keeps the live
//! map in step with what the user asked to see.

pub mod cluster;
pub mod controller;
pub mod popup;
pub mod reconciler;
pub mod render;
pub mod style;
pub mod surface;
pub mod view;

pub use controller::{FetchJob, InitialLoadReport, MapController};
pub use reconciler::*;
pub use render::*;
pub use surface::*;
pub use view::{MapView, MapViewState};

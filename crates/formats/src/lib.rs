pub mod feature_collection;
pub mod project;

pub use feature_collection::*;
pub use project::*;

pub mod cleanup;
pub mod entry;
pub mod layer_cache;

pub use cleanup::*;
pub use entry::*;
pub use layer_cache::*;

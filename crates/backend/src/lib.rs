//! Backend collaborator for the viewer: project configuration and layer
//! features over the REST API.

pub mod http;
pub mod protocol;

pub use http::{AuthTokens, HttpBackend};
pub use protocol::*;

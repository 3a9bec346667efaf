//! Proxy module
//!
//! Handles request forwarding to the upstream completion server.

pub mod headers;
pub mod logging;
pub mod upstream;

pub use logging::RequestContext;
pub use upstream::UpstreamClient;

//! HTTP surface: admission middleware and the service's server.

mod middleware;
mod server;

pub use middleware::{admit, protect, too_many_requests};
pub use server::HttpServer;

//! HTTP server implementation.

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::protect;
use crate::error::Result;
use crate::guard::AdmissionGuard;

/// HTTP server with every route behind the admission guard.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The admission guard instance
    guard: Arc<AdmissionGuard>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, guard: Arc<AdmissionGuard>) -> Self {
        Self { addr, guard }
    }

    /// The routes served, with admission applied.
    pub fn router(&self) -> Router {
        protect(Router::new().route("/", get(index)), self.guard.clone())
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Starting HTTP server");

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

async fn index() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

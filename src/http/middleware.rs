//! Admission middleware for axum routers.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use crate::guard::{AdmissionDecision, AdmissionGuard, RejectionBody};

/// Put every route of `router` behind the admission guard.
///
/// The router must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the peer address
/// is available as the client identity.
pub fn protect(router: Router, guard: Arc<AdmissionGuard>) -> Router {
    router.layer(middleware::from_fn_with_state(guard, admit))
}

/// Evaluate the peer against its quota before running the inner service.
pub async fn admit(
    State(guard): State<Arc<AdmissionGuard>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let identity = peer.ip().to_string();

    match guard.evaluate(&identity).await {
        AdmissionDecision::Allow => next.run(request).await,
        AdmissionDecision::Reject { retry_after_secs } => {
            debug!(
                client = %identity,
                path = %request.uri().path(),
                retry_after_secs = retry_after_secs,
                "Rejecting request"
            );
            too_many_requests(retry_after_secs)
        }
    }
}

/// 429 response carrying the retry-after guidance in header and body.
pub fn too_many_requests(retry_after_secs: u64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after_secs.to_string())],
        Json(RejectionBody::new(retry_after_secs)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GuardConfig, StoreBackend};
    use crate::error::StoreError;
    use crate::store::{CounterStore, Expiry, MemoryCounterStore};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::routing::get;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    struct BrokenStore(StoreError);

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn increment(&self, _key: &str) -> Result<u64, StoreError> {
            Err(self.0.clone())
        }

        async fn set_expiry(&self, _key: &str, _seconds: u64) -> Result<(), StoreError> {
            Err(self.0.clone())
        }

        async fn get_expiry(&self, _key: &str) -> Result<Expiry, StoreError> {
            Err(self.0.clone())
        }
    }

    fn guard_config(max_requests: u64) -> GuardConfig {
        let mut config = GuardConfig {
            max_requests,
            ..GuardConfig::default()
        };
        config.store.backend = StoreBackend::Memory;
        config
    }

    fn app(store: Arc<dyn CounterStore>, max_requests: u64, hits: Arc<AtomicUsize>) -> Router {
        let guard = Arc::new(AdmissionGuard::new(guard_config(max_requests), store).unwrap());
        let router = Router::new().route(
            "/",
            get(move || {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    "ok"
                }
            }),
        );
        protect(router, guard)
    }

    fn request_from(ip: [u8; 4]) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri("/")
            .extension(ConnectInfo(SocketAddr::from((ip, 40000))))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_allows_then_rejects() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app(Arc::new(MemoryCounterStore::new()), 2, hits.clone());

        for _ in 0..2 {
            let response = app.clone().oneshot(request_from([1, 2, 3, 4])).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(request_from([1, 2, 3, 4])).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["detail"], "Too Many Requests");
        assert_eq!(json["retry_after_seconds"], 60);

        // Downstream only ran for the admitted requests.
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_peers_limited_independently() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app(Arc::new(MemoryCounterStore::new()), 1, hits.clone());

        app.clone().oneshot(request_from([10, 0, 0, 1])).await.unwrap();
        let response = app.clone().oneshot(request_from([10, 0, 0, 1])).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = app.clone().oneshot(request_from([10, 0, 0, 2])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_store_outage_passes_requests_through() {
        let hits = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(BrokenStore(StoreError::Unavailable("refused".into())));
        let app = app(store, 1, hits.clone());

        for _ in 0..5 {
            let response = app.clone().oneshot(request_from([1, 2, 3, 4])).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_rejected_credentials_pass_requests_through() {
        let hits = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(BrokenStore(StoreError::Unavailable(
            "NOAUTH Authentication required".into(),
        )));
        let app = app(store, 1, hits.clone());

        for _ in 0..3 {
            let response = app.clone().oneshot(request_from([1, 2, 3, 4])).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}

//! HTTP surface for observability and liveness: `/health`, `/ready`,
//! `/metrics`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use rcp_core::store::Store;
use serde_json::json;

#[derive(Clone)]
pub struct HttpState {
    pub store: Store,
    pub version: &'static str,
    pub started_at: Instant,
    pub pid: u32,
}

pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(state))
}

async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": state.version,
        "pid": state.pid,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

/// Ready once at least one device is registered. An empty fleet is a valid
/// but not-yet-useful daemon state.
async fn ready_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let devices = state.store.list_devices().await;
    if devices.is_empty() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "reason": "no_devices_registered", "device_count": 0 })),
        )
    } else {
        (StatusCode::OK, Json(json!({ "status": "ready", "device_count": devices.len() })))
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let metric_families = rcp_core::metrics::REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], buffer).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to encode metrics: {err}")).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use rcp_common::domain::device::{Device, DeviceId, Environment};
    use tower::ServiceExt;

    fn state(store: Store) -> HttpState {
        HttpState {
            store,
            version: "0.1.0-test",
            started_at: Instant::now(),
            pid: 4242,
        }
    }

    #[tokio::test]
    async fn health_reports_ok_regardless_of_fleet_size() {
        let router = create_router(state(Store::new()));
        let response = router.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_is_unavailable_with_no_devices() {
        let router = create_router(state(Store::new()));
        let response = router.oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn ready_is_ok_once_a_device_is_registered() {
        let store = Store::new();
        store.upsert_device(Device::new(DeviceId::new("dev-1"), "router", "10.0.0.1", 443, Environment::Lab)).await;
        let router = create_router(state(store));
        let response = router.oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

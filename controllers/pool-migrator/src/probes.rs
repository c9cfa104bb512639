//! Health, readiness and metrics endpoints.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared state of the probe server.
#[derive(Clone)]
pub struct ProbeState {
    pub metrics: Arc<Metrics>,
    /// Set once the ReplicaPool watcher is running
    pub ready: Arc<AtomicBool>,
}

pub fn router(state: ProbeState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the probe endpoints on `addr` until the listener fails.
pub async fn serve(addr: SocketAddr, state: ProbeState) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Probe server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<ProbeState>) -> StatusCode {
    if state.ready.load(Ordering::Acquire) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(State(state): State<ProbeState>) -> Response {
    match state.metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(ready: bool) -> ProbeState {
        ProbeState {
            metrics: Arc::new(Metrics::new().unwrap()),
            ready: Arc::new(AtomicBool::new(ready)),
        }
    }

    async fn get_path(state: ProbeState, path: &str) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_healthz() {
        assert_eq!(get_path(state(false), "/healthz").await, (StatusCode::OK, "ok".to_string()));
    }

    #[tokio::test]
    async fn test_readyz_follows_watcher_state() {
        assert_eq!(get_path(state(false), "/readyz").await.0, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(get_path(state(true), "/readyz").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_exposes_counters() {
        let state = state(true);
        state.metrics.pools_created.inc();

        let (status, body) = get_path(state, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("poolshift_pools_created_total 1"));
    }
}

use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tradematch::workflows::dispatch::{
    dispatch_router, DispatchNotifier, DispatchRepository, DispatchService,
};

/// Dispatch API plus the operational endpoints.
pub(crate) fn with_dispatch_routes<S, N>(service: Arc<DispatchService<S, N>>) -> Router
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    dispatch_router(service)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{build_service, seed_demo_roster};
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;
    use tradematch::config::DispatchConfig;

    fn app(ready: bool) -> Router {
        let (service, store) = build_service(&DispatchConfig::default());
        seed_demo_roster(&store, Utc::now()).expect("roster seeds");
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        with_dispatch_routes(service).layer(Extension(state))
    }

    async fn get_status(router: Router, uri: &str) -> StatusCode {
        router
            .oneshot(Request::get(uri).body(Body::empty()).expect("request builds"))
            .await
            .expect("route executes")
            .status()
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        assert_eq!(get_status(app(false), "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_tracks_the_flag() {
        assert_eq!(
            get_status(app(false), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(get_status(app(true), "/ready").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn dispatch_routes_are_mounted() {
        assert_eq!(
            get_status(app(true), "/api/v1/dispatch/jobs/job-1001/eligible-providers").await,
            StatusCode::OK
        );
        assert_eq!(
            get_status(app(true), "/api/v1/dispatch/auto-approval/settings").await,
            StatusCode::OK
        );
    }
}

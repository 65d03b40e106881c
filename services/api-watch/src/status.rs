//! Status server: `/health` and `/metrics`

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use poller::PollerHandle;
use serde_json::json;
use session_auth::{RefreshCoordinator, RefreshState};
use tokio::net::TcpListener;

/// Shared state for the status handlers
#[derive(Clone)]
pub struct StatusState {
    pub auth: RefreshCoordinator,
    pub pollers: Arc<Vec<PollerHandle>>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

pub fn build_router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: StatusState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// 200 while the session is usable, 503 once it has expired.
async fn health_handler(State(state): State<StatusState>) -> impl IntoResponse {
    let authenticated = state.auth.is_authenticated().await;
    let session = match state.auth.state() {
        RefreshState::Failed => "expired",
        RefreshState::Refreshing => "refreshing",
        RefreshState::Idle if authenticated => "active",
        RefreshState::Idle => "logged_out",
    };

    let mut pollers = Vec::with_capacity(state.pollers.len());
    for handle in state.pollers.iter() {
        let snapshot = handle.snapshot().await;
        pollers.push(json!({
            "name": snapshot.name,
            "current_interval_ms": snapshot.current_interval.as_millis() as u64,
            "consecutive_errors": snapshot.consecutive_errors,
            "enabled": snapshot.enabled,
            "visible": snapshot.visible,
            "runs": snapshot.runs,
        }));
    }

    let (status_code, status) = match session {
        "active" | "refreshing" => (StatusCode::OK, "healthy"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
    };

    let body = json!({
        "status": status,
        "session": session,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "pollers": pollers,
    });

    (
        status_code,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus text exposition. Poll intervals and the refresh exchange count
/// are refreshed per scrape.
async fn metrics_handler(State(state): State<StatusState>) -> impl IntoResponse {
    for handle in state.pollers.iter() {
        crate::metrics::record_poll_interval(&handle.snapshot().await);
    }
    crate::metrics::record_refresh_exchanges(state.auth.exchange_count());
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

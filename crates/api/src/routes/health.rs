//! Liveness and readiness probes.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use order_store::OrderStore;
use serde::Serialize;

use crate::routes::orders::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /healthz — the process is up.
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// GET /readyz — 200 only if the database answers within one second.
pub async fn readyz<S: OrderStore>(State(state): State<Arc<AppState<S>>>) -> StatusCode {
    match tokio::time::timeout(Duration::from_secs(1), state.service.ready()).await {
        Ok(Ok(())) => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

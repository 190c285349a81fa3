//! HTTP order-management service.
//!
//! CRUD endpoints over the order store, with the reliable machinery behind
//! them: every mutation commits together with its outbox event, a background
//! relay drains the outbox to Kafka, and a saga manager advances the
//! fulfillment workflow. Observability comes from `tracing` and the
//! Prometheus metrics recorder.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use middleware::RateLimiter;
use routes::orders::AppState;

/// Maximum accepted request body.
pub const MAX_BODY_BYTES: usize = 1 << 20;

/// Deadline for database access within a single request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Builds the API router with all routes and shared state.
pub fn create_app<S: OrderStore + 'static>(
    state: Arc<AppState<S>>,
    limiter: Arc<RateLimiter>,
) -> Router {
    let api = Router::new()
        .route(
            "/orders",
            get(routes::orders::list::<S>).post(routes::orders::create::<S>),
        )
        .route(
            "/orders/{id}",
            get(routes::orders::get::<S>).patch(routes::orders::update_status::<S>),
        )
        .layer(axum::middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit,
        ));

    Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/readyz", get(routes::health::readyz::<S>))
        .nest("/api/v1", api)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds the debug router served on `DEBUG_ADDR`.
pub fn create_debug_app(metrics_handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle)
}

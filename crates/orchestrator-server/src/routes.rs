//! Route definitions for the gateway API.

use crate::{handlers, state::AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

/// Create the main API router.
pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoint
        .route("/metrics", get(handlers::metrics_endpoint))
        // Generation endpoints
        .nest("/v1", generation_routes())
        // Admin endpoints
        .nest("/admin", admin_routes())
        // Middleware
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        // State
        .with_state(state)
}

/// Generation API routes.
fn generation_routes() -> Router<AppState> {
    Router::new()
        .route("/generate", post(handlers::generate))
        .route("/generate/stream", post(handlers::generate_stream))
}

/// Admin/management routes.
fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/providers", get(handlers::admin_providers))
        .route("/budgets", get(handlers::admin_budgets))
}

use super::handlers::{self, AppState};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the Axum router with all endpoints
pub fn create_router(state: AppState) -> Router {
    // CORS configuration (the admin dashboard is served from another origin)
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Prometheus metrics
        .route("/metrics", get(handlers::metrics_handler))
        // Flush orchestration
        .route("/cache/flush", post(handlers::flush_caches))
        // Layer registry
        .route(
            "/cache/layers",
            get(handlers::list_layers).post(handlers::create_layer),
        )
        .route(
            "/cache/layers/{layer_id}",
            get(handlers::get_layer).patch(handlers::update_layer),
        )
        // Operation ledger
        .route(
            "/cache/operations",
            get(handlers::list_operations).delete(handlers::purge_operations),
        )
        .route(
            "/cache/operations/running",
            get(handlers::running_operations),
        )
        .route(
            "/cache/operations/{operation_id}",
            get(handlers::get_operation),
        )
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

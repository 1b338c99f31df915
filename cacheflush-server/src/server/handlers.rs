use crate::core::{
    CacheLayerConfig, FlushCoordinator, FlushError, FlushOperation, LayerUpdate, OperationType,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Default page size for the recent operations view
pub const DEFAULT_OPERATIONS_LIMIT: usize = 20;
/// Largest page the operations endpoint serves
pub const MAX_OPERATIONS_LIMIT: usize = 500;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: FlushCoordinator,
}

impl AppState {
    pub fn new(coordinator: FlushCoordinator) -> Self {
        Self { coordinator }
    }
}

fn default_operation_type() -> OperationType {
    OperationType::Manual
}

#[derive(Debug, Deserialize)]
pub struct FlushRequest {
    pub cache_layers: Vec<String>,
    #[serde(default = "default_operation_type")]
    pub operation_type: OperationType,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct LayersQuery {
    /// Only layers selectable for flushing
    pub active_only: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OperationsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PurgeQuery {
    pub older_than_hours: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub purged: usize,
    pub remaining: usize,
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "cacheflush",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// POST /cache/flush - flush the requested layers
///
/// Every terminal outcome (completed, partial, failed) is a 200.
pub async fn flush_caches(
    State(state): State<AppState>,
    Json(req): Json<FlushRequest>,
) -> Result<Json<FlushOperation>, FlushError> {
    debug!(
        "REST FLUSH layers={:?}, force={}",
        req.cache_layers, req.force
    );

    if req.operation_type != OperationType::Manual {
        return Err(FlushError::Validation(
            "operation_type must be 'manual' for API requests".to_string(),
        ));
    }

    let op = state
        .coordinator
        .start_flush(req.cache_layers, OperationType::Manual, req.force)
        .await?;
    Ok(Json(op))
}

/// GET /cache/layers - layer configs ordered by priority
pub async fn list_layers(
    State(state): State<AppState>,
    Query(query): Query<LayersQuery>,
) -> Json<Vec<CacheLayerConfig>> {
    let registry = state.coordinator.registry();
    let layers = if query.active_only.unwrap_or(false) {
        registry.get_active_layers()
    } else {
        registry.list()
    };
    Json(layers)
}

/// GET /cache/layers/{layer_id}
pub async fn get_layer(
    State(state): State<AppState>,
    Path(layer_id): Path<String>,
) -> Result<Json<CacheLayerConfig>, FlushError> {
    Ok(Json(state.coordinator.registry().get(&layer_id)?))
}

/// POST /cache/layers - register a new layer
pub async fn create_layer(
    State(state): State<AppState>,
    Json(config): Json<CacheLayerConfig>,
) -> Result<impl IntoResponse, FlushError> {
    let created = state.coordinator.registry().register(config)?;
    if !state.coordinator.adapters().contains(&created.layer_id) {
        info!(
            "Layer {} registered without an adapter; flushes will report an error",
            created.layer_id
        );
    }
    Ok((StatusCode::CREATED, Json(created)))
}

/// PATCH /cache/layers/{layer_id} - partial update
pub async fn update_layer(
    State(state): State<AppState>,
    Path(layer_id): Path<String>,
    Json(update): Json<LayerUpdate>,
) -> Result<Json<CacheLayerConfig>, FlushError> {
    if update.is_empty() {
        return Err(FlushError::Validation("no fields to update".to_string()));
    }
    Ok(Json(state.coordinator.registry().update(&layer_id, &update)?))
}

/// GET /cache/operations?limit=N - recent operations, newest first
pub async fn list_operations(
    State(state): State<AppState>,
    Query(query): Query<OperationsQuery>,
) -> Json<Vec<FlushOperation>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_OPERATIONS_LIMIT)
        .min(MAX_OPERATIONS_LIMIT);
    Json(state.coordinator.ledger().list_recent(limit))
}

/// GET /cache/operations/running - operations not yet in the ledger
pub async fn running_operations(State(state): State<AppState>) -> Json<Vec<FlushOperation>> {
    Json(state.coordinator.running_operations())
}

/// GET /cache/operations/{operation_id}
pub async fn get_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> Result<Json<FlushOperation>, FlushError> {
    let id = Uuid::parse_str(&operation_id)
        .map_err(|_| FlushError::InvalidRequest(format!("invalid operation id: {}", operation_id)))?;

    state
        .coordinator
        .ledger()
        .get(&id)
        .map(Json)
        .ok_or(FlushError::OperationNotFound(operation_id))
}

/// DELETE /cache/operations?older_than_hours=N - administrative purge
pub async fn purge_operations(
    State(state): State<AppState>,
    Query(query): Query<PurgeQuery>,
) -> Result<Json<PurgeResponse>, FlushError> {
    let hours = query.older_than_hours.ok_or_else(|| {
        FlushError::Validation("older_than_hours is required".to_string())
    })?;
    if hours <= 0 {
        return Err(FlushError::Validation(format!(
            "older_than_hours must be positive, got {}",
            hours
        )));
    }

    let cutoff = chrono::Duration::try_hours(hours)
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .ok_or_else(|| FlushError::Validation(format!("older_than_hours too large: {}", hours)))?;
    let ledger = state.coordinator.ledger();
    let purged = ledger
        .purge_older_than(cutoff)
        .await
        .map_err(|e| FlushError::Internal(e.to_string()))?;

    Ok(Json(PurgeResponse {
        purged,
        remaining: ledger.len(),
    }))
}

/// GET /metrics - Prometheus metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    match crate::metrics::encode_metrics() {
        Ok(metrics) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            metrics,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

// HTTP Status Code Tests
// Tests that the cache admin API returns correct HTTP status codes for various scenarios

use cacheflush_server::{
    AdapterSet, AppState, CacheLayerConfig, CoordinatorConfig, FlushCoordinator, LayerRegistry,
    MemoryCache, MemoryCacheAdapter, OperationLedger, create_router,
};
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn spawn_test_server() -> String {
    let registry = LayerRegistry::with_layers(vec![
        CacheLayerConfig::new("component_cache", 1),
        CacheLayerConfig::new("api_response_cache", 2),
    ])
    .unwrap();
    let adapters = AdapterSet::new()
        .with(
            "component_cache",
            Arc::new(MemoryCacheAdapter::new(MemoryCache::new())),
        )
        .with(
            "api_response_cache",
            Arc::new(MemoryCacheAdapter::new(MemoryCache::new())),
        );

    let coordinator = FlushCoordinator::new(
        registry,
        adapters,
        OperationLedger::in_memory(),
        CoordinatorConfig::default(),
    );
    let app = create_router(AppState::new(coordinator));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("http://{}", addr);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    url
}

// ==================== FLUSH ENDPOINT STATUS CODES ====================

#[tokio::test]
async fn test_flush_returns_200_ok() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    let response = client
        .post(&format!("{}/cache/flush", base_url))
        .json(&json!({
            "cache_layers": ["component_cache"],
            "operation_type": "manual",
            "force": false
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn test_flush_empty_layer_name_returns_422() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    let response = client
        .post(&format!("{}/cache/flush", base_url))
        .json(&json!({
            "cache_layers": ["component_cache", ""],
            "operation_type": "manual",
            "force": false
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], 422);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_flush_scheduled_type_rejected() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    let response = client
        .post(&format!("{}/cache/flush", base_url))
        .json(&json!({
            "cache_layers": ["component_cache"],
            "operation_type": "scheduled"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_flush_missing_layers_field_returns_422() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    let response = client
        .post(&format!("{}/cache/flush", base_url))
        .json(&json!({"force": true}))
        .send()
        .await
        .unwrap();

    // Axum's Json extractor rejects a body that doesn't match the shape
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_flush_malformed_json_returns_400() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    let response = client
        .post(&format!("{}/cache/flush", base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ==================== LAYER ENDPOINT STATUS CODES ====================

#[tokio::test]
async fn test_get_unknown_layer_returns_404() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    let response = client
        .get(&format!("{}/cache/layers/does_not_exist", base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_patch_unknown_layer_returns_422() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    let response = client
        .patch(&format!("{}/cache/layers/does_not_exist", base_url))
        .json(&json!({"is_active": false}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], 422);
    assert!(body["error"].as_str().unwrap().contains("does_not_exist"));
}

#[tokio::test]
async fn test_patch_zero_interval_returns_422() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    let response = client
        .patch(&format!("{}/cache/layers/component_cache", base_url))
        .json(&json!({"auto_flush_interval_hours": 0}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Rejected update leaves the record untouched
    let layer: serde_json::Value = client
        .get(&format!("{}/cache/layers/component_cache", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(layer["auto_flush_interval_hours"], 24);
}

#[tokio::test]
async fn test_patch_negative_size_returns_422() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    let response = client
        .patch(&format!("{}/cache/layers/component_cache", base_url))
        .json(&json!({"max_size_mb": -5}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_patch_empty_body_returns_422() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    let response = client
        .patch(&format!("{}/cache/layers/component_cache", base_url))
        .json(&json!({}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_create_duplicate_layer_returns_409() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    let layer = serde_json::to_value(CacheLayerConfig::new("component_cache", 9)).unwrap();
    let response = client
        .post(&format!("{}/cache/layers", base_url))
        .json(&layer)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_create_invalid_layer_id_returns_422() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    let layer = serde_json::to_value(CacheLayerConfig::new("Not A Valid Id", 9)).unwrap();
    let response = client
        .post(&format!("{}/cache/layers", base_url))
        .json(&layer)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// ==================== OPERATION ENDPOINT STATUS CODES ====================

#[tokio::test]
async fn test_get_operation_bad_id_returns_400() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    let response = client
        .get(&format!("{}/cache/operations/not-a-uuid", base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_unknown_operation_returns_404() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    let response = client
        .get(&format!(
            "{}/cache/operations/{}",
            base_url,
            uuid::Uuid::new_v4()
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_operations_empty_returns_200() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    let response = client
        .get(&format!("{}/cache/operations?limit=5", base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let ops: Vec<serde_json::Value> = response.json().await.unwrap();
    assert!(ops.is_empty());
}

#[tokio::test]
async fn test_purge_requires_positive_hours() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    let response = client
        .delete(&format!("{}/cache/operations", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = client
        .delete(&format!("{}/cache/operations?older_than_hours=0", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_purge_keeps_recent_operations() {
    let base_url = spawn_test_server().await;
    let client = Client::new();

    client
        .post(&format!("{}/cache/flush", base_url))
        .json(&json!({"cache_layers": ["component_cache"]}))
        .send()
        .await
        .unwrap();

    let response = client
        .delete(&format!("{}/cache/operations?older_than_hours=1", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["purged"], 0);
    assert_eq!(body["remaining"], 1);
}

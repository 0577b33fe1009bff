//! HTTP boundary: routes, status mapping and response shapes

mod common;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use common::{seed_products, Harness};
use serde_json::{json, Value};
use storegate::gateway::http::{create_router, AppState};
use tower::ServiceExt;

fn router(h: &Harness) -> Router {
    create_router(
        AppState {
            gateway: h.gateway.clone(),
        },
        64 * 1024,
    )
}

async fn call(router: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body.to_vec())
}

async fn call_json(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = call(router, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_query_served_then_cached() {
    let h = Harness::new();
    seed_products(&h.primary);
    let query = json!({ "filter": { "brand": "SuperGains" } });

    let (status, body) = call_json(router(&h), post("/data/products/query", query.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cached"], false);
    assert_eq!(body["degraded"], false);
    assert_eq!(body["source"], "primary");
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);

    let (status, body) = call_json(router(&h), post("/data/products/query", query)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cached"], true);
    assert_eq!(body["source"], "cache");
}

#[tokio::test]
async fn test_degraded_query_unavailable() {
    let h = Harness::new();
    h.go_down().await;

    let (status, body) = call_json(router(&h), post("/data/products/query", json!({}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "data_unavailable");
    assert_eq!(body["circuitState"], "DEGRADED");
}

#[tokio::test]
async fn test_degraded_write_read_only_mode() {
    let h = Harness::new();
    h.go_down().await;

    let op = json!({ "action": "delete", "id": "p1" });
    let (status, body) = call_json(router(&h), post("/data/products/write", op)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "read_only_mode");
    assert_eq!(body["reason"], "degraded");
    assert_eq!(body["circuitState"], "DEGRADED");
    assert_eq!(h.primary.write_count(), 0);
}

#[tokio::test]
async fn test_write_applied_and_store_rejection() {
    let h = Harness::new();
    let op = json!({ "action": "insert", "document": { "id": "o1", "total": 68 } });

    let (status, body) = call_json(router(&h), post("/data/orders/write", op.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ok"], true);

    h.primary.set_reject_writes(true);
    let (status, body) = call_json(router(&h), post("/data/orders/write", op)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "store_rejected");
}

#[tokio::test]
async fn test_invalid_collection_rejected() {
    let h = Harness::new();

    let (status, body) = call_json(router(&h), post("/data/pro$ducts/query", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_collection");
    assert_eq!(h.primary.query_count(), 0);
}

#[tokio::test]
async fn test_health_endpoints() {
    let h = Harness::new();

    let (status, body) = call_json(router(&h), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["circuitState"], "NORMAL");
    assert_eq!(body["isPrimaryAvailable"], true);
    assert_eq!(body["fallbackActive"], false);
    assert_eq!(body["sharedCache"]["failures"], 0);

    let (status, _) = call_json(router(&h), get("/health/ready")).await;
    assert_eq!(status, StatusCode::OK);

    h.go_down().await;

    // still 200: reads are served while degraded
    let (status, body) = call_json(router(&h), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["circuitState"], "DEGRADED");
    assert_eq!(body["failureCount"], 3);
    assert_eq!(body["fallbackActive"], true);

    let (status, body) = call_json(router(&h), get("/health/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);

    let (status, body) = call_json(router(&h), get("/health/live")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alive"], true);
}

#[tokio::test]
async fn test_metrics_and_request_id() {
    let h = Harness::new();
    seed_products(&h.primary);
    call(router(&h), post("/data/products/query", json!({}))).await;

    let (status, headers, body) = call(router(&h), get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.contains_key("x-request-id"));

    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("storegate_reads_total{source=\"primary\"} 1"));
    assert!(text.contains("storegate_circuit_state 0"));
    assert!(text.contains("storegate_snapshot_entries{collection=\"products\"} 1"));
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let h = Harness::new();
    let request = Request::builder()
        .uri("/health/live")
        .header("X-Request-ID", "req-42")
        .body(Body::empty())
        .unwrap();

    let (_, headers, _) = call(router(&h), request).await;
    assert_eq!(headers.get("x-request-id").unwrap(), "req-42");
}

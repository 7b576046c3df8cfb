//! HTTP surface tests. Requests go through the router in-process.

mod common;

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{
    studio, studio_with_config, test_config, Behavior, Gate, RecordingLoader, StaticCatalog,
    TestStudio,
};
use diffusion_studio::api::{EvictResponse, SearchResponse};
use diffusion_studio::health::{HealthReport, HealthState};
use diffusion_studio::models::CacheSnapshot;

fn service(catalog: StaticCatalog) -> TestStudio {
    let loader = RecordingLoader::new(Default::default()).failing_on(&["org/missing"]);
    studio(1, loader, catalog)
}

async fn send(router: Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
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

/// Poll `condition` until it holds or a few seconds pass.
async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn generate_body(model_id: &str) -> Value {
    json!({
        "model_id": model_id,
        "prompt": "a cat",
        "height": 256,
        "width": 256,
        "num_steps": 10,
        "guidance_scale": 5.0
    })
}

#[tokio::test]
async fn test_generate_returns_image_and_metadata() {
    let t = service(StaticCatalog::new(&[]));
    let (status, body) =
        send(t.studio.router(), post_json("/api/v1/image/generate", generate_body("m1"))).await;

    assert_eq!(status, StatusCode::OK);
    assert!(!body["image_base64"].as_str().unwrap().is_empty());
    assert_eq!(body["metadata"]["model_id"], "m1");
    assert_eq!(body["metadata"]["prompt"], "a cat");
    assert_eq!(body["metadata"]["negative_prompt"], "");
    assert_eq!(body["metadata"]["num_steps"], 10);
    assert_eq!(t.loader.loads(), 1);
}

#[tokio::test]
async fn test_generate_applies_defaults() {
    let t = service(StaticCatalog::new(&[]));
    let req = post_json("/api/v1/image/generate", json!({"model_id": "m1", "prompt": "a cat"}));
    let (status, body) = send(t.studio.router(), req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["height"], 512);
    assert_eq!(body["metadata"]["width"], 512);
    assert_eq!(body["metadata"]["num_steps"], 25);
    assert_eq!(body["metadata"]["guidance_scale"], 7.5);
}

#[tokio::test]
async fn test_out_of_range_is_rejected_before_loading() {
    let t = service(StaticCatalog::new(&[]));
    let mut body = generate_body("m1");
    body["height"] = json!(64);
    let (status, body) = send(t.studio.router(), post_json("/api/v1/image/generate", body)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("height"));
    assert_eq!(t.loader.loads(), 0);
    assert_eq!(t.reclaimer.passes(), 0);
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let t = service(StaticCatalog::new(&[]));
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/image/generate")
        .header("content-type", "application/json")
        .body(Body::from("{\"model_id\": \"m1\""))
        .unwrap();
    let (status, body) = send(t.studio.router(), req).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].is_string());

    let missing_prompt = post_json("/api/v1/image/generate", json!({"model_id": "m1"}));
    let (status, _) = send(t.studio.router(), missing_prompt).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_load_failure_is_server_error() {
    let t = service(StaticCatalog::new(&[]));
    let (status, body) = send(
        t.studio.router(),
        post_json("/api/v1/image/generate", generate_body("org/missing")),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().contains("org/missing"));
    assert_eq!(t.studio.cache().size(), 0);
}

#[tokio::test]
async fn test_search_respects_limit() {
    let t = service(StaticCatalog::new(&["org/cat-1", "org/cat-2", "org/dog"]));
    let (status, body) = send(t.studio.router(), get("/api/v1/models/search?query=cat&limit=1")).await;

    assert_eq!(status, StatusCode::OK);
    let response: SearchResponse = serde_json::from_value(body).unwrap();
    assert_eq!(response.models, vec!["org/cat-1".to_string()]);
}

#[tokio::test]
async fn test_search_without_query_lists_models() {
    let t = service(StaticCatalog::new(&["org/cat-1", "org/dog"]));
    let (status, body) = send(t.studio.router(), get("/api/v1/models/search")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["models"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_search_catalog_unavailable() {
    let t = service(StaticCatalog::unavailable());
    let (status, body) = send(t.studio.router(), get("/api/v1/models/search?query=cat")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["detail"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_resident_and_evict() {
    let t = service(StaticCatalog::new(&[]));
    let router = t.studio.router();
    send(router.clone(), post_json("/api/v1/image/generate", generate_body("m1"))).await;

    let (status, body) = send(router.clone(), get("/api/v1/models/resident")).await;
    assert_eq!(status, StatusCode::OK);
    let snapshot: CacheSnapshot = serde_json::from_value(body).unwrap();
    assert_eq!(snapshot.capacity, 1);
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.entries[0].model_id, "m1");
    assert_eq!(snapshot.stats.misses, 1);

    let (status, body) =
        send(router.clone(), post_json("/api/v1/models/evict", json!({"model_id": "m1"}))).await;
    assert_eq!(status, StatusCode::OK);
    let evicted: EvictResponse = serde_json::from_value(body).unwrap();
    assert!(evicted.evicted);
    assert!(!t.studio.cache().contains("m1"));

    let (_, body) = send(router, post_json("/api/v1/models/evict", json!({"model_id": "m1"}))).await;
    assert_eq!(body["evicted"], false);
}

#[tokio::test]
async fn test_root_and_metrics() {
    let t = service(StaticCatalog::new(&[]));
    let (status, body) = send(t.studio.router(), get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["device"], "cpu");
    assert!(body["message"].as_str().unwrap().contains("Diffusion Studio"));

    let (status, body) = send(t.studio.router(), get("/api/v1/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["counters"].is_object());
}

#[tokio::test]
async fn test_health_reports_cache() {
    let t = service(StaticCatalog::new(&[]));
    let (status, body) = send(t.studio.router(), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    let report: HealthReport = serde_json::from_value(body).unwrap();
    assert_eq!(report.state, HealthState::Healthy);
    assert!(report.accepting_requests);
    assert_eq!(report.cache_capacity, 1);
    assert!(report.resident_models.is_empty());

    let (status, _) = send(t.studio.router(), get("/health/live")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_shutdown_refuses_new_generations() {
    let t = service(StaticCatalog::new(&[]));
    let router = t.studio.router();
    send(router.clone(), post_json("/api/v1/image/generate", generate_body("m1"))).await;
    assert_eq!(t.studio.cache().size(), 1);

    t.studio.shutdown().await;
    assert_eq!(t.studio.cache().size(), 0);

    let (status, body) =
        send(router.clone(), post_json("/api/v1/image/generate", generate_body("m1"))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["detail"], "server is shutting down");

    let (status, _) = send(router.clone(), get("/health/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let (status, _) = send(router, get("/health/live")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_abandoned_request_completes_and_releases_guard() {
    let gate = Gate::new();
    let loader = RecordingLoader::new(Default::default());
    loader.set_behavior("m1", Behavior::Gated(gate.clone()));
    let t = studio(1, loader, StaticCatalog::new(&[]));
    let router = t.studio.router();
    let coordinator = t.studio.shutdown_coordinator().clone();

    // The client gives up while the pipeline is still running.
    let pending = router
        .clone()
        .oneshot(post_json("/api/v1/image/generate", generate_body("m1")));
    assert!(tokio::time::timeout(Duration::from_millis(100), pending).await.is_err());
    assert!(eventually(|| gate.entered() == 1).await);
    assert_eq!(coordinator.in_flight_count(), 1);

    gate.open();
    assert!(eventually(|| coordinator.in_flight_count() == 0).await);
    assert_eq!(t.studio.cache().resident_models(), vec!["m1".to_string()]);
    assert_eq!(t.log.count("generate:m1"), 1);

    let (status, body) =
        send(router, post_json("/api/v1/image/generate", generate_body("m1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["image_base64"].as_str().unwrap().is_empty());
    assert_eq!(t.loader.loads(), 1);
}

#[tokio::test]
async fn test_readiness_can_require_a_resident_model() {
    let mut config = test_config(1);
    config.health.require_model_loaded = true;
    let loader = RecordingLoader::new(Default::default());
    let t = studio_with_config(config, loader, StaticCatalog::new(&[]));
    let router = t.studio.router();

    let (status, _) = send(router.clone(), get("/health/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let (_, body) = send(router.clone(), get("/health")).await;
    assert_eq!(body["state"], "Degraded");

    send(router.clone(), post_json("/api/v1/image/generate", generate_body("m1"))).await;
    let (status, _) = send(router, get("/health/ready")).await;
    assert_eq!(status, StatusCode::OK);
}

//! Integration tests for the advisor API endpoints

use advisor_lib::{
    health::{components, HealthRegistry},
    observability::{AdvisorMetrics, StructuredLogger},
    ControlLoop, IndicatorStore, MetaCache, ProvisionConfig,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use qos_advisor::api::{create_router, AppState};
use prometheus::{Encoder, TextEncoder};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::CONTROL_LOOP).await;
    health_registry.register(components::API).await;

    let state = Arc::new(AppState::new(
        health_registry,
        AdvisorMetrics::new(),
        Arc::new(ProvisionConfig::default()),
        Arc::new(MetaCache::new()),
        Arc::new(IndicatorStore::default()),
    ));
    let router = create_router(state.clone());

    (router, state)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn share_region(initial_knob: f64) -> Value {
    json!({
        "region_type": "share",
        "owner_pool_name": "share",
        "binding_numas": [0, 1],
        "resource": {
            "enable_reclaim": true,
            "resource_upper_bound": 90.0,
            "resource_lower_bound": 4.0,
            "reserved_for_allocate": 0.0
        },
        "initial_knob": initial_knob
    })
}

fn shared_container(region: &str) -> Value {
    json!({
        "pod_uid": "ignored",
        "pod_namespace": "default",
        "pod_name": "web-0",
        "container_name": "ignored",
        "qos_level": "shared_cores",
        "owner_pool_name": "share",
        "region_names": [region]
    })
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let response = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_degraded_after_partial_cycle_failure() {
    let (app, state) = setup_test_app().await;

    state.health_registry.record_cycle(1, 3).await;

    let response = app.oneshot(get("/healthz")).await.unwrap();

    // Degraded still returns 200 (operational)
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_every_region_fails() {
    let (app, state) = setup_test_app().await;

    state.health_registry.record_cycle(2, 2).await;

    let response = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_ready_flag() {
    let (app, state) = setup_test_app().await;

    let response = app.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["ready"], false);

    state.health_registry.set_ready(true);

    let response = app.oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;

    state.metrics.observe_cycle_latency(0.0002);
    state.metrics.set_regions_controlled(3);

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("qos_advisor_cycle_latency_seconds"));
    assert!(metrics_text.contains("qos_advisor_regions_controlled"));
}

#[tokio::test]
async fn test_put_region_seeds_knob() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(with_json("PUT", "/regions/share-api", share_region(40.0)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status = body_json(response).await;
    assert_eq!(status["region_name"], "share-api");
    assert_eq!(status["region_type"], "share");
    assert_eq!(status["control_knob"]["non_reclaimed_cpu_size"]["value"], 40.0);

    let response = app.oneshot(get("/regions/share-api/knob")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["non_reclaimed_cpu_size"]["value"], 40.0);
}

#[tokio::test]
async fn test_put_region_without_knob_starts_at_full_guarantee() {
    let (app, _state) = setup_test_app().await;

    let mut request = share_region(0.0);
    request["initial_knob"] = Value::Null;
    request["resource"]["reserved_for_allocate"] = json!(10.0);

    let response = app
        .oneshot(with_json("PUT", "/regions/share-full", request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await["control_knob"]["non_reclaimed_cpu_size"]["value"],
        80.0
    );
}

#[tokio::test]
async fn test_put_region_rejects_inverted_bounds() {
    let (app, _state) = setup_test_app().await;

    let mut request = share_region(40.0);
    request["resource"]["resource_lower_bound"] = json!(95.0);

    let response = app
        .oneshot(with_json("PUT", "/regions/share-bad", request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["kind"], "invalid_bounds");
}

#[tokio::test]
async fn test_put_region_rejects_unconfigured_type() {
    let (app, _state) = setup_test_app().await;

    let mut request = share_region(40.0);
    request["region_type"] = json!("isolation");

    let response = app
        .oneshot(with_json("PUT", "/regions/isolation-0", request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_region_returns_404() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(get("/regions/missing/knob"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(with_json(
            "PUT",
            "/regions/missing/indicators",
            json!({ "cpu_schedwait": 800.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(with_json(
            "PUT",
            "/pods/pod-1/containers/app",
            shared_container("missing"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method("DELETE")
        .uri("/regions/missing")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_zero_target_override_rejected() {
    let (app, _state) = setup_test_app().await;

    app.clone()
        .oneshot(with_json("PUT", "/regions/share-zero", share_region(40.0)))
        .await
        .unwrap();

    let response = app
        .oneshot(with_json(
            "PUT",
            "/regions/share-zero/targets",
            json!({ "cpu_schedwait": 0.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["kind"], "zero_target");
}

#[tokio::test]
async fn test_negative_target_override_rejected() {
    let (app, _state) = setup_test_app().await;

    app.clone()
        .oneshot(with_json("PUT", "/regions/share-neg", share_region(40.0)))
        .await
        .unwrap();

    let response = app
        .oneshot(with_json(
            "PUT",
            "/regions/share-neg/targets",
            json!({ "cpu_schedwait": -400.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["kind"], "invalid_parameters");
}

fn exported_series(prefix: &str, region: &str) -> usize {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .unwrap();
    let label = format!("region=\"{}\"", region);
    String::from_utf8(buffer)
        .unwrap()
        .lines()
        .filter(|line| line.starts_with(prefix) && line.contains(&label))
        .count()
}

#[tokio::test]
async fn test_delete_region_drops_its_gauges() {
    let (app, state) = setup_test_app().await;

    app.clone()
        .oneshot(with_json("PUT", "/regions/share-gone", share_region(40.0)))
        .await
        .unwrap();
    app.clone()
        .oneshot(with_json(
            "PUT",
            "/pods/pod-9/containers/app",
            shared_container("share-gone"),
        ))
        .await
        .unwrap();
    app.clone()
        .oneshot(with_json(
            "PUT",
            "/regions/share-gone/indicators",
            json!({ "cpu_schedwait": 800.0 }),
        ))
        .await
        .unwrap();

    let mut control_loop = ControlLoop::new(
        state.config.clone(),
        state.registry.clone(),
        state.store.clone(),
        state.metrics.clone(),
        StructuredLogger::new("test-node"),
    );
    control_loop.run_cycle(chrono::Utc::now().timestamp());

    assert_eq!(exported_series("qos_advisor_control_knob_value", "share-gone"), 1);
    assert_eq!(exported_series("qos_advisor_indicator_delta", "share-gone"), 1);

    let request = Request::builder()
        .method("DELETE")
        .uri("/regions/share-gone")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(exported_series("qos_advisor_control_knob_value", "share-gone"), 0);
    assert_eq!(exported_series("qos_advisor_indicator_delta", "share-gone"), 0);
}

#[tokio::test]
async fn test_pushed_state_drives_control_cycle() {
    let (app, state) = setup_test_app().await;

    app.clone()
        .oneshot(with_json("PUT", "/regions/share-flow", share_region(40.0)))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(with_json(
            "PUT",
            "/pods/pod-1/containers/app",
            shared_container("share-flow"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(with_json(
            "PUT",
            "/regions/share-flow/indicators",
            json!({ "cpu_schedwait": 800.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let container = state.registry.get_container("pod-1", "app").unwrap();
    assert_eq!(container.pod_uid, "pod-1");
    assert_eq!(container.container_name, "app");

    let mut control_loop = ControlLoop::new(
        state.config.clone(),
        state.registry.clone(),
        state.store.clone(),
        state.metrics.clone(),
        StructuredLogger::new("test-node"),
    );
    let summary = control_loop.run_cycle(chrono::Utc::now().timestamp());
    assert_eq!(summary.reports.len(), 1);

    let response = app
        .clone()
        .oneshot(get("/regions/share-flow/knob"))
        .await
        .unwrap();
    let knob = body_json(response).await;
    assert_eq!(knob["non_reclaimed_cpu_size"]["value"], 48.0);
    assert_eq!(knob["non_reclaimed_cpu_size"]["action"], "increase");

    let response = app.clone().oneshot(get("/regions")).await.unwrap();
    let regions = body_json(response).await;
    assert_eq!(regions[0]["region_name"], "share-flow");
    assert_eq!(regions[0]["pod_count"], 1);

    let request = Request::builder()
        .method("DELETE")
        .uri("/pods/pod-1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(body_json(response).await["removed"], 1);

    let summary = control_loop.run_cycle(chrono::Utc::now().timestamp());
    assert_eq!(summary.evicted, vec!["share-flow".to_string()]);
    assert!(state.registry.region_info("share-flow").is_none());
}

//! Integration tests for the management API handlers.
//!
//! Uses `tower::ServiceExt::oneshot` to call the admin router without binding
//! a TCP port — every test gets fresh in-memory state.

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use chrono::Utc;
use gantry_admin::{build_admin_router, AdminState};
use gantry_core::config::GantryConfig;
use gantry_core::router::Router;
use gantry_observability::{LogStore, MetricsCollector};
use gantry_proxy::{CircuitBreaker, HealthRegistry, RateLimiter, TokenVerifier};
use gantry_store::cache::ConfigCache;
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt; // .oneshot()

const SECRET: &str = "admin-test-secret";

// ── Helpers ──────────────────────────────────────────────────

fn make_state() -> Arc<AdminState> {
    let mut cfg = GantryConfig::default();
    cfg.auth.secret_key = SECRET.into();

    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let logs = Arc::new(LogStore::new(1000));

    Arc::new(AdminState {
        cache: ConfigCache::new(),
        router: Arc::new(ArcSwap::new(Arc::new(Router::build(vec![], 1).unwrap()))),
        limiter: Arc::new(RateLimiter::new(true)),
        breaker: Arc::new(CircuitBreaker::new(&cfg.circuit_breaker)),
        health: Arc::new(HealthRegistry::new()),
        logs,
        metrics,
        verifier: Arc::new(TokenVerifier::new(&cfg.auth).unwrap()),
        store: None,
    })
}

fn token(roles: &[&str]) -> String {
    encode(
        &Header::default(),
        &json!({
            "sub": "operator",
            "roles": roles,
            "exp": Utc::now().timestamp() + 600,
        }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn request(method: Method, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = bearer {
        builder = builder.header("authorization", format!("Bearer {t}"));
    }
    match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn admin_req(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    request(method, uri, Some(&token(&["admin"])), body)
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn route_body(pattern: &str) -> Value {
    json!({
        "pattern": pattern,
        "methods": ["GET", "POST"],
        "target_service": "auth",
        "target_base_url": "http://auth:8002",
        "auth_required": false,
        "priority": 10
    })
}

// ── Auth gate ────────────────────────────────────────────────

#[tokio::test]
async fn missing_token_is_401() {
    let app = build_admin_router(make_state());
    let resp = app
        .oneshot(request(Method::GET, "/routes", None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn non_admin_identity_is_403() {
    let app = build_admin_router(make_state());
    let resp = app
        .oneshot(request(Method::GET, "/routes", Some(&token(&["viewer"])), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

// ── Route CRUD ───────────────────────────────────────────────

#[tokio::test]
async fn create_then_get_roundtrips() {
    let state = make_state();

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::POST, "/routes", Some(route_body("/api/v1/auth/*"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["pattern"], "/api/v1/auth/*");
    assert_eq!(created["target_base_url"], "http://auth:8002");

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::GET, &format!("/routes/{id}"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let fetched = body_json(resp).await;
    assert_eq!(fetched["id"], created["id"]);
    assert_eq!(fetched["methods"], json!(["GET", "POST"]));
}

#[tokio::test]
async fn create_swaps_the_live_router() {
    let state = make_state();
    assert!(state.router.load().is_empty());

    build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::POST, "/routes", Some(route_body("/api/v1/auth/*"))))
        .await
        .unwrap();

    let router = state.router.load();
    assert_eq!(router.len(), 1);
    assert!(router.resolve("GET", "/api/v1/auth/login").is_ok());
}

#[tokio::test]
async fn duplicate_active_pattern_is_409_without_mutation() {
    let state = make_state();

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::POST, "/routes", Some(route_body("/api/v1/auth/*"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::POST, "/routes", Some(route_body("/api/v1/auth/*"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], "conflict");
    assert_eq!(state.cache.routes.len(), 1);
}

#[tokio::test]
async fn invalid_pattern_is_400() {
    let app = build_admin_router(make_state());
    let resp = app
        .oneshot(admin_req(Method::POST, "/routes", Some(route_body("no-leading-slash"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_applies_patch_and_leaves_rest() {
    let state = make_state();
    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::POST, "/routes", Some(route_body("/api/v1/content/*"))))
        .await
        .unwrap();
    let id = body_json(resp).await["id"].as_str().unwrap().to_string();

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(
            Method::PUT,
            &format!("/routes/{id}"),
            Some(json!({ "priority": 99, "timeout_ms": 1500 })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated = body_json(resp).await;
    assert_eq!(updated["priority"], 99);
    assert_eq!(updated["timeout_ms"], 1500);
    assert_eq!(updated["pattern"], "/api/v1/content/*");
    assert!(updated["updated_at"].as_str().unwrap() >= updated["created_at"].as_str().unwrap());
}

#[tokio::test]
async fn delete_is_204_then_404_twice() {
    let state = make_state();
    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::POST, "/routes", Some(route_body("/api/v1/x/*"))))
        .await
        .unwrap();
    let id = body_json(resp).await["id"].as_str().unwrap().to_string();

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::DELETE, &format!("/routes/{id}"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // Re-applying the delete yields the same error both times.
    for _ in 0..2 {
        let resp = build_admin_router(Arc::clone(&state))
            .oneshot(admin_req(Method::DELETE, &format!("/routes/{id}"), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "not_found");
    }
}

#[tokio::test]
async fn list_respects_active_only() {
    let state = make_state();
    build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::POST, "/routes", Some(route_body("/a/*"))))
        .await
        .unwrap();
    let mut inactive = route_body("/b/*");
    inactive["active"] = json!(false);
    build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::POST, "/routes", Some(inactive)))
        .await
        .unwrap();

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::GET, "/routes?active_only=true", None))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["total"], 1);

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::GET, "/routes", None))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["total"], 2);
}

// ── Rate-limit CRUD ──────────────────────────────────────────

fn rule_body(name: &str) -> Value {
    json!({
        "name": name,
        "scope": "per_ip",
        "pattern": "/api/*",
        "max_requests": 5,
        "window_seconds": 60
    })
}

#[tokio::test]
async fn rule_crud_and_duplicate_name() {
    let state = make_state();

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::POST, "/rate-limits", Some(rule_body("burst"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let id = body_json(resp).await["id"].as_str().unwrap().to_string();

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::POST, "/rate-limits", Some(rule_body("burst"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(
            Method::PUT,
            &format!("/rate-limits/{id}"),
            Some(json!({ "max_requests": 50 })),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["max_requests"], 50);

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::DELETE, &format!("/rate-limits/{id}"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn rule_with_zero_budget_is_400() {
    let app = build_admin_router(make_state());
    let mut body = rule_body("zero");
    body["max_requests"] = json!(0);
    let resp = app
        .oneshot(admin_req(Method::POST, "/rate-limits", Some(body)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Services & health ────────────────────────────────────────

#[tokio::test]
async fn register_reset_and_health_flow() {
    let state = make_state();

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(
            Method::POST,
            "/services",
            Some(json!({ "service_name": "auth", "base_url": "http://auth:8002/" })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let record = body_json(resp).await;
    assert_eq!(record["status"], "unknown");
    assert_eq!(record["base_url"], "http://auth:8002");

    // Duplicate registration conflicts.
    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(
            Method::POST,
            "/services",
            Some(json!({ "service_name": "auth", "base_url": "http://auth:8002" })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // Open the breaker, then reset through the API.
    for _ in 0..5 {
        state.breaker.record_failure("auth");
    }
    assert!(state.breaker.is_open("auth"));

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::POST, "/services/auth/reset", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!state.breaker.is_open("auth"));

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::POST, "/services/ghost/reset", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::GET, "/health", None))
        .await
        .unwrap();
    let agg = body_json(resp).await;
    assert_eq!(agg["total_services"], 1);
    // A lone never-probed service is neither healthy nor degraded.
    assert_eq!(agg["overall_status"], "unhealthy");
}

// ── Logs & metrics ───────────────────────────────────────────

fn sample_log(path: &str, status: u16, error: Option<&str>) -> gantry_core::log::RequestLog {
    gantry_core::log::RequestLog {
        request_id: uuid::Uuid::new_v4(),
        method: "GET".into(),
        path: path.into(),
        matched_route_id: None,
        target_service: Some("auth".into()),
        user_id: None,
        client_ip: "1.2.3.4".into(),
        status_code: Some(status),
        response_time_ms: 12.0,
        error_message: error.map(str::to_string),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn logs_query_and_errors() {
    let state = make_state();
    state.logs.insert(sample_log("/api/a", 200, None));
    state.logs.insert(sample_log("/api/b", 429, Some("rate_limited:burst")));

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::GET, "/logs?status_code=200", None))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["list"][0]["path"], "/api/a");

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::GET, "/logs/errors", None))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["list"][0]["error_message"], "rate_limited:burst");
}

#[tokio::test]
async fn metrics_aggregates_and_prometheus_text() {
    let state = make_state();
    state.logs.insert(sample_log("/api/a", 200, None));
    state.logs.insert(sample_log("/api/a", 502, None));
    state.metrics.record_request("auth", "GET", 200, 0.01);

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::GET, "/metrics?hours=1", None))
        .await
        .unwrap();
    let stats = body_json(resp).await;
    assert_eq!(stats["total_requests"], 2);
    assert_eq!(stats["failed_requests"], 1);
    assert_eq!(stats["top_endpoints"][0]["path"], "/api/a");

    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(admin_req(Method::GET, "/metrics/prometheus", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("gantry_http_requests_total"));
}

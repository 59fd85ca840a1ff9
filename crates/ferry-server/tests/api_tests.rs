//! Integration tests for the HTTP triggers and ledger listing

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tower::ServiceExt; // for `oneshot`

use ferry_server::api::{self, AppState};
use ferry_server::ingest::{Ledger, LedgerStatus};

mod common;
use common::{TestPipeline, TEST_BUCKET};

fn app(env: &TestPipeline, run_timeout: Duration) -> Router {
    // Never connected: the routes under test do not touch the database
    let db = PgPoolOptions::new()
        .connect_lazy("postgresql://localhost/ferry")
        .unwrap();

    api::create_router(AppState {
        db,
        pipeline: env.pipeline.clone(),
        run_timeout,
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_extract_then_notify_then_list() {
    let env = TestPipeline::new();
    env.source
        .add_file("payments_2025-11-15.csv", b"payment_id,amount\n1,10.50\n");
    let app = app(&env, Duration::from_secs(30));

    let extract = Request::builder()
        .method("POST")
        .uri("/api/v1/extract")
        .body(Body::empty())
        .unwrap();
    let (status, report) = send(&app, extract).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["landed"], 1);
    assert_eq!(report["files"][0]["status"], "landed");

    let uri = report["files"][0]["object_uri"].as_str().unwrap().to_string();
    let key = uri.trim_start_matches(&format!("s3://{}/", TEST_BUCKET)).to_string();

    let (status, load) = send(
        &app,
        post_json(
            "/api/v1/notifications/storage",
            json!({ "bucket": TEST_BUCKET, "name": key }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(load["disposition"], "loaded");
    assert_eq!(load["destination"]["table"], "payments_raw");
    assert_eq!(load["archive"]["status"], "archived");

    let (status, listing) = send(&app, get("/api/v1/ledger?status=success")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["entries"][0]["object_uri"], uri);
    assert_eq!(listing["entries"][0]["status"], "SUCCESS");

    let (_, by_path) = send(
        &app,
        get("/api/v1/ledger?source_path=/outgoing/providers_2025-11-15.csv"),
    )
    .await;
    assert_eq!(by_path["count"], 0);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let env = TestPipeline::new();
    let app = app(&env, Duration::from_secs(30));

    let (status, body) = send(&app, post_json("/api/v1/extract", json!({ "timeout_secs": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["status"], 400);

    let (status, _) = send(
        &app,
        post_json(
            "/api/v1/notifications/storage",
            json!({ "bucket": TEST_BUCKET, "name": "" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, get("/api/v1/ledger?status=DONE")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("DONE"));

    assert_eq!(env.source.opens(), 0);
}

#[tokio::test]
async fn test_extract_timeout_maps_to_gateway_timeout() {
    let env = TestPipeline::new();
    env.source.add_file("payments_2025-11-15.csv", b"payment_id\n1\n");
    env.source.set_fetch_delay(Duration::from_millis(500));
    let app = app(&env, Duration::from_millis(50));

    let (status, body) = send(&app, post_json("/api/v1/extract", json!({}))).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"]["status"], 504);
}

#[tokio::test]
async fn test_unreachable_source_is_a_server_error() {
    let env = TestPipeline::new();
    env.source.set_fail_open(true);
    let app = app(&env, Duration::from_secs(30));

    let (status, body) = send(&app, post_json("/api/v1/extract", json!({}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("connection refused"));
}

/// Land one payments file through the API and return its staging key
async fn land_via_api(env: &TestPipeline, app: &Router) -> String {
    env.source
        .add_file("payments_2025-11-15.csv", b"payment_id,amount\n1,10.50\n");
    let (status, report) = send(app, post_json("/api/v1/extract", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let uri = report["files"][0]["object_uri"].as_str().unwrap();
    uri.trim_start_matches(&format!("s3://{}/", TEST_BUCKET)).to_string()
}

#[tokio::test]
async fn test_load_held_elsewhere_is_a_conflict() {
    let env = TestPipeline::new();
    let app = app(&env, Duration::from_secs(30));
    let key = land_via_api(&env, &app).await;
    let uri = format!("s3://{}/{}", TEST_BUCKET, key);

    // Another worker holds the load reservation
    env.ledger
        .reserve_load("lifefile", &uri, Duration::from_secs(3600))
        .await
        .unwrap();

    let notify = json!({ "bucket": TEST_BUCKET, "name": key });
    let (status, body) = send(&app, post_json("/api/v1/notifications/storage", notify)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["disposition"], "in_progress");
    assert_eq!(env.warehouse.loads(), 0);
}

#[tokio::test]
async fn test_load_timeout_is_retryable() {
    let env = TestPipeline::new();
    let app = app(&env, Duration::from_millis(50));
    env.source
        .add_file("payments_2025-11-15.csv", b"payment_id,amount\n1,10.50\n");
    let report = env.pipeline.run_extract().await.unwrap();
    let key = report.files[0]
        .object_uri
        .as_deref()
        .unwrap()
        .trim_start_matches(&format!("s3://{}/", TEST_BUCKET))
        .to_string();
    env.warehouse.set_delay(Duration::from_millis(500));

    let notify = json!({ "bucket": TEST_BUCKET, "name": key });
    let (status, _) = send(&app, post_json("/api/v1/notifications/storage", notify.clone())).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(env.ledger.snapshot().await[0].status, LedgerStatus::Failed);

    env.warehouse.set_delay(Duration::ZERO);
    let (status, body) = send(&app, post_json("/api/v1/notifications/storage", notify)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disposition"], "loaded");
}

#[tokio::test]
async fn test_unreachable_database_fails_health_check() {
    let env = TestPipeline::new();
    let db = PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(200))
        .connect_lazy("postgresql://127.0.0.1:1/ferry")
        .unwrap();
    let app = api::create_router(AppState {
        db,
        pipeline: env.pipeline.clone(),
        run_timeout: Duration::from_secs(30),
    });

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["status"], 503);
}

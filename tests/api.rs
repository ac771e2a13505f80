use axum::body::Body;
use axum::http::StatusCode;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use dashmap::DashMap;
use easyinjection::api::{build_router, AppState};
use easyinjection::db::Database;
use easyinjection::questions::QuestionBank;

fn create_test_state() -> AppState {
    AppState {
        db: Database::in_memory().unwrap(),
        active_scans: Arc::new(DashMap::new()),
        questions: Arc::new(QuestionBank::builtin()),
    }
}

fn app(state: &AppState) -> axum::Router {
    build_router(state.clone())
}

fn make_request(method: &str, uri: &str, body: Option<Value>) -> axum::http::Request<Body> {
    let builder = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");

    match body {
        Some(b) => builder.body(Body::from(serde_json::to_string(&b).unwrap())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn response_json(response: axum::http::Response<Body>) -> Value {
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        panic!("Empty response body. Status: {}", parts.status);
    }
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let state = create_test_state();
    let response = app(&state)
        .oneshot(make_request("GET", "/api/health", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_create_scan_pending() {
    let state = create_test_state();
    let response = app(&state)
        .oneshot(make_request(
            "POST",
            "/api/scans",
            Some(json!({
                "usuario_id": "u1",
                "alias": "práctica",
                "url": "http://site.test/",
                "flags": { "sqli": true, "xss": true }
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(body["estado"], "pendiente");
    let id = body["id"].as_str().unwrap().to_string();

    let response = app(&state)
        .oneshot(make_request("GET", &format!("/api/scans/{}", id), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stored = response_json(response).await;
    assert_eq!(stored["usuario_id"], "u1");
    assert_eq!(stored["flags"]["sqli"], true);
}

#[tokio::test]
async fn test_create_scan_requires_a_scanner() {
    let state = create_test_state();
    let response = app(&state)
        .oneshot(make_request(
            "POST",
            "/api/scans",
            Some(json!({
                "usuario_id": "u1",
                "url": "http://site.test/",
                "flags": { "sqli": false, "xss": false }
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_missing_scan_is_404() {
    let state = create_test_state();
    let response = app(&state)
        .oneshot(make_request("GET", "/api/scans/nope", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app(&state)
        .oneshot(make_request("GET", "/api/scans/nope/status", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stop_without_active_scan_is_404() {
    let state = create_test_state();
    let response = app(&state)
        .oneshot(make_request("POST", "/api/scans/nope/stop", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_scans() {
    let state = create_test_state();
    for i in 0..3 {
        state
            .db
            .create_scan(&format!("s{}", i), "u1", None, "http://site.test/", true, false)
            .unwrap();
    }
    let response = app(&state)
        .oneshot(make_request("GET", "/api/scans?limit=2", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["scans"].as_array().unwrap().len(), 2);
}

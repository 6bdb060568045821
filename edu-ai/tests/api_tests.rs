//! HTTP API integration tests
//!
//! Exercises the router in-process with tower's `oneshot`.

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use edu_ai::advisory::{InMemoryQuota, ScriptStep, ScriptedTransport};
use edu_ai::advisory::transport::delta_script;
use edu_ai::catalog::Catalog;
use edu_ai::{build_router, AppState};
use edu_common::config::AdvisoryConfig;
use edu_common::events::EventBus;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

const PROFILE_ANSWER: &str = "<profile_analysis><strength_score value=\"81\"/>\
    <summary>Well rounded.</summary><outlook>Good.</outlook>\
    <strengths><item>Grades</item></strengths>\
    <improvement_areas><item>Essays</item></improvement_areas></profile_analysis>";

fn create_test_app(transport: ScriptedTransport, catalog: Arc<Catalog>) -> Router {
    let state = AppState::new(
        catalog,
        Arc::new(transport),
        Arc::new(InMemoryQuota::new(10)),
        EventBus::new(100),
        AdvisoryConfig::default(),
    );
    build_router(state)
}

fn default_app() -> Router {
    create_test_app(
        ScriptedTransport::from_deltas(&[PROFILE_ANSWER]),
        helpers::catalog(),
    )
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
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

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn valid_request() -> Value {
    json!({
        "user_id": "student-1",
        "profile": {
            "strength_score": 82.0,
            "budget": { "min": 0.0, "max": 45000.0 },
            "preferred_categories": ["engineering"]
        },
        "context": "Interested in aerospace."
    })
}

/// Poll GET /advisory/:slot until the session reaches a terminal state
async fn wait_for_terminal(app: &Router, slot: &str) -> Value {
    for _ in 0..100 {
        let response = app
            .clone()
            .oneshot(get(&format!("/advisory/{}", slot)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let session = body_json(response).await;
        if matches!(
            session["state"].as_str(),
            Some("DONE" | "FAILED" | "CANCELLED")
        ) {
            return session;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session in slot {} never finished", slot);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = default_app();

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "edu-ai");
    assert_eq!(json["catalog_records"], 8);
    assert!(json["version"].is_string());
    assert!(json["git_hash"].is_string());
}

#[tokio::test]
async fn test_health_degraded_without_catalog() {
    let app = create_test_app(
        ScriptedTransport::from_deltas(&[PROFILE_ANSWER]),
        Arc::new(Catalog::empty()),
    );

    let json = body_json(app.oneshot(get("/health")).await.unwrap()).await;

    assert_eq!(json["status"], "degraded");
    assert_eq!(json["catalog_records"], 0);
}

#[tokio::test]
async fn test_start_session_returns_accepted() {
    let app = default_app();

    let response = app
        .oneshot(post_json("/advisory/analysis", valid_request()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["slot"], "analysis");
    assert!(json["session_id"].is_string());
}

#[tokio::test]
async fn test_completed_session_is_readable() {
    let app = default_app();

    let started = body_json(
        app.clone()
            .oneshot(post_json("/advisory/analysis", valid_request()))
            .await
            .unwrap(),
    )
    .await;

    let session = wait_for_terminal(&app, "analysis").await;

    assert_eq!(session["session_id"], started["session_id"]);
    assert_eq!(session["state"], "DONE");
    assert_eq!(session["user_id"], "student-1");
    let extraction = &session["outcome"]["extraction"];
    assert_eq!(extraction["status"], "complete");
    assert_eq!(extraction["strategy"], "tagged_block");
    assert_eq!(
        extraction["fields"]["strength_score"],
        json!({ "kind": "number", "value": 81.0 })
    );
    assert_eq!(session["outcome"]["degraded"], false);
}

#[tokio::test]
async fn test_recommendations_fall_back_over_http() {
    let app = create_test_app(
        ScriptedTransport::from_deltas(&["Sorry, no list today."]),
        helpers::catalog(),
    );

    app.clone()
        .oneshot(post_json("/advisory/recommendations", valid_request()))
        .await
        .unwrap();
    let session = wait_for_terminal(&app, "recommendations").await;

    assert_eq!(session["state"], "DONE");
    let entries = session["outcome"]["recommendations"].as_array().unwrap();
    assert_eq!(entries.len(), 5);
    assert!(entries.iter().all(|e| e["origin"] == "fallback"));
    assert_eq!(entries[0]["rank"], 1);
}

#[tokio::test]
async fn test_unknown_slot_is_not_found() {
    let app = default_app();

    let response = app
        .oneshot(post_json("/advisory/horoscope", valid_request()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_request_is_bad_request() {
    let app = default_app();
    let mut request = valid_request();
    request["profile"]["strength_score"] = json!(140.0);

    let response = app
        .oneshot(post_json("/advisory/analysis", request))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("strength_score"));
}

#[tokio::test]
async fn test_get_without_session_is_not_found() {
    let app = default_app();

    let response = app.oneshot(get("/advisory/flashcards")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_without_active_session_is_not_found() {
    let app = default_app();

    let response = app.oneshot(delete("/advisory/cost_estimate")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_running_session() {
    let mut script = delta_script(&["Working on it"]);
    script.pop();
    script.push(ScriptStep::Hang);
    let app = create_test_app(ScriptedTransport::new(vec![script]), helpers::catalog());

    let started = body_json(
        app.clone()
            .oneshot(post_json("/advisory/cost_estimate", valid_request()))
            .await
            .unwrap(),
    )
    .await;

    let response = app
        .clone()
        .oneshot(delete("/advisory/cost_estimate"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cancelled = body_json(response).await;
    assert_eq!(cancelled["session_id"], started["session_id"]);

    let session = wait_for_terminal(&app, "cost_estimate").await;
    assert_eq!(session["state"], "CANCELLED");
    assert!(session["outcome"].is_null());
}

#[tokio::test]
async fn test_second_post_supersedes_running_session() {
    let mut hanging = delta_script(&["Still thinking"]);
    hanging.pop();
    hanging.push(ScriptStep::Hang);
    let app = create_test_app(
        ScriptedTransport::new(vec![hanging, delta_script(&[PROFILE_ANSWER])]),
        helpers::catalog(),
    );

    let first = body_json(
        app.clone()
            .oneshot(post_json("/advisory/analysis", valid_request()))
            .await
            .unwrap(),
    )
    .await;
    let response = app
        .clone()
        .oneshot(post_json("/advisory/analysis", valid_request()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let second = body_json(response).await;
    assert_ne!(first["session_id"], second["session_id"]);

    let session = wait_for_terminal(&app, "analysis").await;
    assert_eq!(session["session_id"], second["session_id"]);
    assert_eq!(session["state"], "DONE");
}

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{Value, json};
use serial_test::serial;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use crate::app_router;
use crate::automations::{ActionExecutor, AutomationEngine, PgAutomationStore};
use crate::services::Mailer;
use crate::tests::helpers::*;

fn offline_app() -> Router {
    app_router(test_state(None, test_engine(InMemoryStore::with_rules(vec![]), None)))
}

fn db_app(pool: sqlx::PgPool, mailer: Arc<RecordingMailer>) -> Router {
    let store = Arc::new(PgAutomationStore::new(pool.clone()));
    let engine = AutomationEngine::new(
        store,
        ActionExecutor::new(Some(mailer as Arc<dyn Mailer>), test_settings()),
    );
    app_router(test_state(Some(pool), engine))
}

fn request(method: &str, uri: &str, user_id: Uuid, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", create_test_jwt(user_id)));

    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn welcome_rule() -> Value {
    json!({
        "name": "Welcome new clients",
        "trigger_event": "client_created",
        "action_payload": {
            "subject": "Welcome {{client_name}}",
            "body": "Thanks for choosing us."
        }
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = offline_app();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_automations_require_a_token() {
    let app = offline_app();
    let request = Request::builder().uri("/api/v1/automations").body(Body::empty()).unwrap();

    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_event_catalog_lists_every_trigger() {
    let app = offline_app();

    let (status, body) = send(&app, request("GET", "/api/v1/automations/events", Uuid::new_v4(), None)).await;

    assert_eq!(status, StatusCode::OK);
    let events = body.as_array().unwrap();
    assert_eq!(events.len(), 10);
    assert_eq!(events[0]["event"], "client_created");
    assert!(
        events
            .iter()
            .find(|e| e["event"] == "invoice_overdue")
            .unwrap()["variables"]
            .as_array()
            .unwrap()
            .contains(&json!("days_overdue"))
    );
}

#[tokio::test]
#[serial]
async fn test_create_and_list_automations() {
    let ctx = require_db!();
    let app = db_app(ctx.db_pool.clone(), RecordingMailer::new());
    let owner = Uuid::new_v4();

    let (status, created) = send(&app, request("POST", "/api/v1/automations", owner, Some(welcome_rule()))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["is_active"], true);
    assert_eq!(created["action_type"], "send_email");

    let (_, mine) = send(&app, request("GET", "/api/v1/automations", owner, None)).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let (_, theirs) = send(&app, request("GET", "/api/v1/automations", Uuid::new_v4(), None)).await;
    assert!(theirs.as_array().unwrap().is_empty());

    let id = created["id"].as_str().unwrap();
    let (status, _) = send(&app, request("GET", &format!("/api/v1/automations/{}", id), Uuid::new_v4(), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_invalid_rules_are_rejected() {
    let ctx = require_db!();
    let app = db_app(ctx.db_pool.clone(), RecordingMailer::new());

    let invalid = json!({
        "name": "",
        "trigger_event": "invoice_paid",
        "action_payload": {"subject": "Hi", "body": "There"}
    });
    let (status, body) = send(&app, request("POST", "/api/v1/automations", Uuid::new_v4(), Some(invalid))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"]["name"].is_array());
    assert!(body["details"]["trigger_event"].is_array());

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_toggle_and_test_endpoint() {
    let ctx = require_db!();
    let mailer = RecordingMailer::new();
    let app = db_app(ctx.db_pool.clone(), mailer.clone());
    let owner = Uuid::new_v4();

    let (_, created) = send(&app, request("POST", "/api/v1/automations", owner, Some(welcome_rule()))).await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, toggled) = send(&app, request("POST", &format!("/api/v1/automations/{}/toggle", id), owner, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["is_active"], false);

    let sample = json!({"context": {"client_name": "Acme", "client_email": "a@x.com"}});
    let (status, outcome) =
        send(&app, request("POST", &format!("/api/v1/automations/{}/test", id), owner, Some(sample))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["success"], true, "inactive rules can still be tested: {}", outcome);
    assert_eq!(outcome["recipient"], "a@x.com");
    assert_eq!(mailer.sent()[0].subject, "Welcome Acme");

    let (status, runs) = send(&app, request("GET", &format!("/api/v1/automations/{}/runs", id), owner, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(runs["meta"]["total"], 1);
    assert_eq!(runs["data"][0]["result"], "success");
    assert_eq!(runs["data"][0]["input"]["client_name"], "Acme");

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_run_history_is_paginated_and_filtered() {
    let ctx = require_db!();
    let app = db_app(ctx.db_pool.clone(), RecordingMailer::new());
    let owner = Uuid::new_v4();

    let (_, created) = send(&app, request("POST", "/api/v1/automations", owner, Some(welcome_rule()))).await;
    let id = created["id"].as_str().unwrap().to_string();

    for n in 0..3 {
        let context = if n == 0 {
            json!({"context": {"client_name": "Nobody"}})
        } else {
            json!({"context": {"client_name": "Acme", "client_email": "a@x.com"}})
        };
        send(&app, request("POST", &format!("/api/v1/automations/{}/test", id), owner, Some(context))).await;
    }

    let (_, page) = send(&app, request("GET", "/api/v1/automation-runs?page=1&per_page=2", owner, None)).await;
    assert_eq!(page["data"].as_array().unwrap().len(), 2);
    assert_eq!(page["meta"]["total"], 3);
    assert_eq!(page["meta"]["total_pages"], 2);
    assert_eq!(page["meta"]["has_next"], true);

    let (_, errors) = send(&app, request("GET", "/api/v1/automation-runs?result=error", owner, None)).await;
    assert_eq!(errors["meta"]["total"], 1);
    assert!(errors["data"][0]["output"]["error"].as_str().unwrap().contains("No recipient"));

    let (_, other) = send(&app, request("GET", "/api/v1/automation-runs", Uuid::new_v4(), None)).await;
    assert_eq!(other["meta"]["total"], 0);

    ctx.cleanup().await;
}

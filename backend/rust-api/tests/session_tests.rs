use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose, Engine as _};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;

use common::{ASSESSMENT_ID, EMPTY_ASSESSMENT_ID};

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, json)
}

async fn create_session(app: &Router) -> String {
    let (status, view) = send(
        app,
        "POST",
        "/api/v1/sessions",
        Some(json!({ "assessment_id": ASSESSMENT_ID, "candidate_id": "cand-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", view);
    view["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_create_session_starts_countdown() {
    let app = common::create_test_app();

    let (status, view) = send(
        &app.router,
        "POST",
        "/api/v1/sessions",
        Some(json!({ "assessment_id": ASSESSMENT_ID })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(view["status"], "in_progress");
    assert_eq!(view["current_index"], 0);
    assert_eq!(view["question_count"], 3);
    assert_eq!(view["timer"]["total_seconds"], 600);
    assert_eq!(view["timer"]["display"], "10:00");
    assert_eq!(view["timer"]["phase"], "normal");
    assert_eq!(view["progress"]["statuses"], json!(["current", "pending", "pending"]));
    assert_eq!(view["question"]["surface"]["kind"], "choice");
    assert_eq!(view["monitor"], "inactive");
    assert_eq!(app.state.sessions.len().await, 1);
}

#[tokio::test]
async fn test_create_session_rejects_unknown_and_empty_assessments() {
    let app = common::create_test_app();

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/sessions",
        Some(json!({ "assessment_id": "missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/sessions",
        Some(json!({ "assessment_id": EMPTY_ASSESSMENT_ID })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(app.state.sessions.is_empty().await);
}

#[tokio::test]
async fn test_single_choice_selection_replaces_previous() {
    let app = common::create_test_app();
    let id = create_session(&app.router).await;
    let uri = format!("/api/v1/sessions/{}/answers", id);

    send(&app.router, "POST", &uri, Some(json!({ "select": 1 }))).await;
    let (status, view) = send(&app.router, "POST", &uri, Some(json!({ "select": 2 }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["answered_count"], 1);
    let rows = view["question"]["surface"]["rows"].as_array().unwrap();
    assert_eq!(rows[1]["selected"], false);
    assert_eq!(rows[2]["selected"], true);
    assert_eq!(rows[2]["text"], "204");
}

#[tokio::test]
async fn test_cleared_code_answer_does_not_restore_starter() {
    let app = common::create_test_app();
    let id = create_session(&app.router).await;

    let (_, view) = send(
        &app.router,
        "POST",
        &format!("/api/v1/sessions/{}/navigate", id),
        Some(json!({ "to": 2 })),
    )
    .await;
    assert_eq!(view["question"]["surface"]["kind"], "code_editor");
    assert_eq!(view["question"]["surface"]["value"], "// TODO");

    send(
        &app.router,
        "POST",
        &format!("/api/v1/sessions/{}/answers", id),
        Some(json!({ "text": "" })),
    )
    .await;
    send(
        &app.router,
        "POST",
        &format!("/api/v1/sessions/{}/navigate", id),
        Some(json!({ "direction": "previous" })),
    )
    .await;
    let (_, view) = send(
        &app.router,
        "POST",
        &format!("/api/v1/sessions/{}/navigate", id),
        Some(json!({ "direction": "next" })),
    )
    .await;

    assert_eq!(view["current_index"], 2);
    assert_eq!(view["question"]["surface"]["value"], "");
}

#[tokio::test]
async fn test_navigation_out_of_range_is_rejected() {
    let app = common::create_test_app();
    let id = create_session(&app.router).await;

    let (status, _) = send(
        &app.router,
        "POST",
        &format!("/api/v1/sessions/{}/navigate", id),
        Some(json!({ "to": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, view) = send(&app.router, "GET", &format!("/api/v1/sessions/{}", id), None).await;
    assert_eq!(view["current_index"], 0);
}

#[tokio::test]
async fn test_finish_then_submit_delivers_once() {
    let app = common::create_test_app();
    let id = create_session(&app.router).await;

    send(
        &app.router,
        "POST",
        &format!("/api/v1/sessions/{}/answers", id),
        Some(json!({ "select": 1 })),
    )
    .await;

    let (status, view) = send(
        &app.router,
        "POST",
        &format!("/api/v1/sessions/{}/finish", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "under_review");

    let submit_uri = format!("/api/v1/sessions/{}/submit", id);
    let (status, view) = send(&app.router, "POST", &submit_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "submitted");
    assert_eq!(view["ended_by"], "confirmation");
    assert_eq!(view["submission"]["state"], "delivered");

    // Duplicate confirm is a no-op
    let (status, _) = send(&app.router, "POST", &submit_uri, None).await;
    assert_eq!(status, StatusCode::OK);

    let payloads = app.sink.payloads().await;
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].answers.get("q1").map(String::as_str), Some("201"));
    assert_eq!(payloads[0].question_count, 3);

    // Answers are frozen
    let (status, view) = send(
        &app.router,
        "POST",
        &format!("/api/v1/sessions/{}/answers", id),
        Some(json!({ "select": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["answered_count"], 1);
}

#[tokio::test]
async fn test_presence_requires_camera_monitoring() {
    let app = common::create_test_app();
    let id = create_session(&app.router).await;

    let (status, _) = send(
        &app.router,
        "POST",
        &format!("/api/v1/sessions/{}/presence", id),
        Some(json!({ "face_detected": true })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, view) = send(
        &app.router,
        "POST",
        "/api/v1/sessions",
        Some(json!({ "assessment_id": ASSESSMENT_ID, "camera": { "granted": true } })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let monitored = view["session_id"].as_str().unwrap();

    let (status, _) = send(
        &app.router,
        "POST",
        &format!("/api/v1/sessions/{}/presence", monitored),
        Some(json!({ "face_detected": true })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_cancel_removes_session() {
    let app = common::create_test_app();
    let id = create_session(&app.router).await;

    let (status, _) = send(
        &app.router,
        "DELETE",
        &format!("/api/v1/sessions/{}", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app.router, "GET", &format!("/api/v1/sessions/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(app.sink.payloads().await.is_empty());
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let app = common::create_test_app();
    let (status, _) = send(&app.router, "GET", "/api/v1/sessions/does-not-exist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app.router,
        "GET",
        "/api/v1/sessions/does-not-exist/stream",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_and_trace_id() {
    let app = common::create_test_app();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-trace-id", "trace-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-trace-id"], "trace-123");
}

#[tokio::test]
#[serial_test::serial]
async fn test_metrics_require_basic_auth() {
    std::env::set_var("METRICS_AUTH", "scraper:secret");
    let app = common::create_test_app();

    let (status, _) = send(&app.router, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let credentials = general_purpose::STANDARD.encode("scraper:secret");
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .header("authorization", format!("Basic {}", credentials))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&body).contains("http_requests_total"));

    std::env::remove_var("METRICS_AUTH");
}

#[tokio::test]
async fn test_submitted_sessions_are_evicted_but_still_readable() {
    let app = common::create_test_app();
    let ids = [
        create_session(&app.router).await,
        create_session(&app.router).await,
    ];
    assert_eq!(app.state.sessions.len().await, 2);

    for id in &ids {
        let (status, _) = send(
            &app.router,
            "POST",
            &format!("/api/v1/sessions/{}/submit", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !app.state.sessions.is_empty().await {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("finished sessions should leave the live map");
    assert_eq!(app.state.sessions.finished_len().await, 2);

    let (status, view) = send(
        &app.router,
        "GET",
        &format!("/api/v1/sessions/{}", ids[0]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "submitted");

    let (status, view) = send(
        &app.router,
        "POST",
        &format!("/api/v1/sessions/{}/submit", ids[1]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["submission"]["state"], "delivered");

    let (status, _) = send(
        &app.router,
        "POST",
        &format!("/api/v1/sessions/{}/navigate", ids[1]),
        Some(json!({ "to": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.sink.payloads().await.len(), 2);
}

//! End-to-end tests through the axum router with `oneshot`, using the
//! in-memory store and a wiremock webhook receiver.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use pulse_core::store::{MemoryStore, StatusStore};
use pulse_core::NotificationDestination;
use pulse_server::http::{build_router, HttpState};
use pulse_server::subsystems::dispatcher::NotificationDispatcher;
use pulse_server::subsystems::ingest::ReportProcessor;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    app: Router,
    dispatcher: Arc<NotificationDispatcher>,
}

fn harness(dispatcher: NotificationDispatcher) -> Harness {
    let store: Arc<dyn StatusStore> = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(dispatcher);
    let processor = Arc::new(ReportProcessor::new(store, dispatcher.clone()));
    Harness {
        app: build_router(Arc::new(HttpState::new(processor))),
        dispatcher,
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_status(body: Value, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook/status")
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-pulse-user", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

// ===========================================================================
// TEST 1: GET /health
// ===========================================================================
#[tokio::test]
async fn test_health_endpoint() {
    let h = harness(NotificationDispatcher::disabled());
    let (status, body) = send(&h.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory");
}

// ===========================================================================
// TEST 2: running -> success posts one notification to the webhook
// ===========================================================================
#[tokio::test]
async fn test_completed_run_notifies_webhook() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dispatcher = NotificationDispatcher::new(
        NotificationDestination::Webhook(format!("{}/hook", mock_server.uri())),
        Duration::from_secs(5),
        Duration::from_secs(30),
    )
    .unwrap();
    let h = harness(dispatcher);

    let (status, body) = send(
        &h.app,
        post_status(
            json!({
                "agent_id": "agent-7",
                "agent_name": "Seven",
                "session_topic": "release",
                "status": "running",
                "timestamp": "2024-05-01T10:00:00Z"
            }),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Status reported successfully");

    let (status, _) = send(
        &h.app,
        post_status(
            json!({
                "agent_id": "agent-7",
                "session_topic": "release",
                "status": "failed",
                "timestamp": "2024-05-01T11:00:00Z",
                "message": "tests red"
            }),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    h.dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let payload: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(payload["msg_type"], "text");
    let text = payload["content"]["text"].as_str().unwrap();
    assert!(text.starts_with("🔔 Session Status Change\n\n"));
    assert!(text.contains("Agent Name: Seven"));
    assert!(text.contains("Status: running → failed"));
    assert!(text.contains("Timestamp: 2024-05-01T11:00:00Z"));
    assert!(text.contains("Duration: 1h0m0s"));
    assert!(text.ends_with("Message: tests red"));
}

// ===========================================================================
// TEST 3: bad input is a 400 with the error envelope
// ===========================================================================
#[tokio::test]
async fn test_invalid_reports_are_rejected() {
    let h = harness(NotificationDispatcher::disabled());

    let req = Request::builder()
        .method("POST")
        .uri("/webhook/status")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (status, body) = send(
        &h.app,
        post_status(
            json!({
                "agent_id": "a",
                "session_topic": "t",
                "status": "running",
                "timestamp": "yesterday"
            }),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (status, body) = send(
        &h.app,
        post_status(
            json!({
                "agent_id": "a",
                "session_topic": "t",
                "status": "running",
                "timestamp": Utc::now(),
                "ttl_minutes": 2000
            }),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("ttl"));

    let (status, body) = send(&h.app, get("/api/agents")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}

// ===========================================================================
// TEST 4: another user's agent is forbidden
// ===========================================================================
#[tokio::test]
async fn test_foreign_owner_gets_403() {
    let h = harness(NotificationDispatcher::disabled());
    let report = json!({
        "agent_id": "shared",
        "session_topic": "t",
        "status": "running",
        "timestamp": Utc::now()
    });

    let (status, _) = send(&h.app, post_status(report.clone(), Some("alice"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&h.app, post_status(report, Some("mallory"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

// ===========================================================================
// TEST 5: read API reflects ingested reports
// ===========================================================================
#[tokio::test]
async fn test_read_api_round_trip() {
    let h = harness(NotificationDispatcher::disabled());
    for (topic, status, ts) in [
        ("nightly build", "running", "2024-05-01T10:00:00Z"),
        ("nightly build", "success", "2024-05-01T10:30:00Z"),
    ] {
        let (code, _) = send(
            &h.app,
            post_status(
                json!({
                    "agent_id": "ci",
                    "session_topic": topic,
                    "status": status,
                    "timestamp": ts
                }),
                None,
            ),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
    }

    let (status, body) = send(&h.app, get("/api/agents/ci")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["latest_status"], "success");
    assert_eq!(body["session_count"], 1);

    let (status, body) = send(&h.app, get("/api/agents/ci/sessions?expired=false")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions"][0]["current_status"], "success");

    let (status, body) = send(&h.app, get("/api/agents/ci/sessions/nightly%20build")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["history"][0]["status"], "success");
    assert_eq!(body["history"][1]["status"], "running");

    let (status, body) = send(&h.app, get("/api/agents/ci/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (status, _) = send(&h.app, get("/api/agents/nobody")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

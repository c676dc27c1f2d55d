//! Pulse HTTP API
//!
//! Axum server for status ingestion and the read API. Each endpoint has a thin
//! handler that delegates to an inner function returning
//! `(StatusCode, serde_json::Value)`, so the logic is testable without axum.
//!
//! Endpoints:
//! - GET  /health
//! - POST /webhook/status                              ingest a status report
//! - GET  /api/agents?status=&search=                  agents with session stats
//! - GET  /api/agents/:agent_id
//! - GET  /api/agents/:agent_id/sessions?expired=
//! - GET  /api/agents/:agent_id/sessions/:session_topic
//! - GET  /api/agents/:agent_id/status                 latest status across sessions

use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::future::try_join_all;
use pulse_core::config::HttpConfig;
use pulse_core::models::{Agent, AgentStatus, Session, Status};
use pulse_core::report::StatusReport;
use pulse_core::store::{latest_of, StatusStore, StoreError};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::subsystems::ingest::{Identity, ReportProcessor};

/// Header carrying the caller identity, set by an upstream authenticator.
pub const USER_HEADER: &str = "x-pulse-user";

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub store: Arc<dyn StatusStore>,
    pub processor: Arc<ReportProcessor>,
}

impl HttpState {
    pub fn new(processor: Arc<ReportProcessor>) -> Self {
        Self {
            store: processor.store().clone(),
            processor,
        }
    }
}

pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/webhook/status", post(report_handler))
        .route("/api/agents", get(list_agents_handler))
        .route("/api/agents/:agent_id", get(get_agent_handler))
        .route("/api/agents/:agent_id/sessions", get(list_sessions_handler))
        .route(
            "/api/agents/:agent_id/sessions/:session_topic",
            get(get_session_handler),
        )
        .route("/api/agents/:agent_id/status", get(agent_status_handler))
        .with_state(state)
}

/// Serve until the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    config: &HttpConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Pulse HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct AgentQuery {
    pub status: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SessionQuery {
    /// `false` hides expired sessions; absent or `true` includes them.
    pub expired: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct AgentSummary {
    #[serde(flatten)]
    pub agent: Agent,
    pub session_count: usize,
    pub active_session_count: usize,
    pub latest_status: Option<Status>,
    pub latest_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    pub current_status: Option<Status>,
}

/// A session with its full history, newest first.
#[derive(Debug, Serialize)]
pub struct SessionDetail {
    pub session: SessionView,
    pub history: Vec<AgentStatus>,
}

fn error_body(code: &str, message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "error": code,
        "message": message.into(),
    })
}

fn store_failure(e: StoreError) -> (StatusCode, serde_json::Value) {
    if e.is_not_found() {
        return (StatusCode::NOT_FOUND, error_body("not_found", "not found"));
    }
    tracing::error!(error = %e, "Store error while serving request");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        error_body("internal_error", e.to_string()),
    )
}

fn to_json<T: Serialize>(value: &T) -> (StatusCode, serde_json::Value) {
    match serde_json::to_value(value) {
        Ok(v) => (StatusCode::OK, v),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_body("internal_error", e.to_string()),
        ),
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub fn health_inner(store: &dyn StatusStore) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "store": store.name(),
        }),
    )
}

pub async fn report_inner(
    processor: &ReportProcessor,
    report: StatusReport,
    identity: Identity,
) -> (StatusCode, serde_json::Value) {
    match processor.process_report(report, &identity).await {
        Ok(_) => (
            StatusCode::OK,
            serde_json::json!({
                "success": true,
                "message": "Status reported successfully",
            }),
        ),
        Err(e) => {
            if e.status_code().is_server_error() {
                tracing::error!(error = %e, "Failed to process status report");
            }
            (e.status_code(), error_body(e.error_code(), e.to_string()))
        }
    }
}

pub async fn list_agents_inner(
    store: &dyn StatusStore,
    query: AgentQuery,
) -> (StatusCode, serde_json::Value) {
    let status_filter = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => match raw.parse::<Status>() {
            Ok(s) => Some(s),
            Err(e) => return (StatusCode::BAD_REQUEST, error_body("bad_request", e)),
        },
        None => None,
    };
    let needle = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let agents = match store.list_agents().await {
        Ok(a) => a,
        Err(e) => return store_failure(e),
    };

    let matching = agents.into_iter().filter(|agent| match &needle {
        Some(n) => {
            agent.agent_id.to_lowercase().contains(n)
                || agent
                    .name
                    .as_deref()
                    .is_some_and(|name| name.to_lowercase().contains(n))
        }
        None => true,
    });

    let mut summaries = match try_join_all(matching.map(|agent| summarize(store, agent))).await {
        Ok(s) => s,
        Err(e) => return store_failure(e),
    };
    if let Some(wanted) = status_filter {
        summaries.retain(|s| s.latest_status == Some(wanted));
    }
    summaries.sort_by(|a, b| a.agent.agent_id.cmp(&b.agent.agent_id));

    let count = summaries.len();
    match serde_json::to_value(&summaries) {
        Ok(agents) => (
            StatusCode::OK,
            serde_json::json!({ "agents": agents, "count": count }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_body("internal_error", e.to_string()),
        ),
    }
}

pub async fn get_agent_inner(
    store: &dyn StatusStore,
    agent_id: &str,
) -> (StatusCode, serde_json::Value) {
    let agent = match store.get_agent(agent_id).await {
        Ok(a) => a,
        Err(e) => return store_failure(e),
    };
    match summarize(store, agent).await {
        Ok(summary) => to_json(&summary),
        Err(e) => store_failure(e),
    }
}

pub async fn list_sessions_inner(
    store: &dyn StatusStore,
    agent_id: &str,
    query: SessionQuery,
) -> (StatusCode, serde_json::Value) {
    if let Err(e) = store.get_agent(agent_id).await {
        return store_failure(e);
    }

    let include_expired = query.expired.unwrap_or(true);
    let mut sessions = match store.list_sessions(agent_id, include_expired).await {
        Ok(s) => s,
        Err(e) => return store_failure(e),
    };
    sessions.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));

    let mut views = Vec::with_capacity(sessions.len());
    for session in sessions {
        let history = match store
            .get_status_history(&session.agent_id, &session.session_topic)
            .await
        {
            Ok(h) => h,
            Err(e) => return store_failure(e),
        };
        views.push(SessionView {
            current_status: latest_of(&history).map(|s| s.status),
            session,
        });
    }

    let count = views.len();
    match serde_json::to_value(&views) {
        Ok(sessions) => (
            StatusCode::OK,
            serde_json::json!({ "sessions": sessions, "count": count }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_body("internal_error", e.to_string()),
        ),
    }
}

pub async fn get_session_inner(
    store: &dyn StatusStore,
    agent_id: &str,
    session_topic: &str,
) -> (StatusCode, serde_json::Value) {
    let session = match store.get_session(agent_id, session_topic).await {
        Ok(s) => s,
        Err(e) => return store_failure(e),
    };
    let mut history = match store.get_status_history(agent_id, session_topic).await {
        Ok(h) => h,
        Err(e) => return store_failure(e),
    };

    let current_status = latest_of(&history).map(|s| s.status);
    history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    to_json(&SessionDetail {
        session: SessionView {
            session,
            current_status,
        },
        history,
    })
}

pub async fn agent_status_inner(
    store: &dyn StatusStore,
    agent_id: &str,
) -> (StatusCode, serde_json::Value) {
    if let Err(e) = store.get_agent(agent_id).await {
        return store_failure(e);
    }
    match latest_for_agent(store, agent_id).await {
        Ok(Some(latest)) => to_json(&latest),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            error_body("not_found", "no status reported yet"),
        ),
        Err(e) => store_failure(e),
    }
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.store.as_ref());
    (status, Json(body))
}

pub async fn report_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    payload: Result<Json<StatusReport>, JsonRejection>,
) -> impl IntoResponse {
    let report = match payload {
        Ok(Json(report)) => report,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(error_body("bad_request", rejection.body_text())),
            );
        }
    };

    let identity = Identity {
        user: headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
    };

    let (status, body) = report_inner(&state.processor, report, identity).await;
    (status, Json(body))
}

pub async fn list_agents_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<AgentQuery>,
) -> impl IntoResponse {
    let (status, body) = list_agents_inner(state.store.as_ref(), query).await;
    (status, Json(body))
}

pub async fn get_agent_handler(
    State(state): State<Arc<HttpState>>,
    Path(agent_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = get_agent_inner(state.store.as_ref(), &agent_id).await;
    (status, Json(body))
}

pub async fn list_sessions_handler(
    State(state): State<Arc<HttpState>>,
    Path(agent_id): Path<String>,
    Query(query): Query<SessionQuery>,
) -> impl IntoResponse {
    let (status, body) = list_sessions_inner(state.store.as_ref(), &agent_id, query).await;
    (status, Json(body))
}

pub async fn get_session_handler(
    State(state): State<Arc<HttpState>>,
    Path((agent_id, session_topic)): Path<(String, String)>,
) -> impl IntoResponse {
    let (status, body) = get_session_inner(state.store.as_ref(), &agent_id, &session_topic).await;
    (status, Json(body))
}

pub async fn agent_status_handler(
    State(state): State<Arc<HttpState>>,
    Path(agent_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = agent_status_inner(state.store.as_ref(), &agent_id).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

async fn summarize(store: &dyn StatusStore, agent: Agent) -> Result<AgentSummary, StoreError> {
    let sessions = store.list_sessions(&agent.agent_id, true).await?;
    let active_session_count = sessions.iter().filter(|s| !s.expired).count();
    let latest = latest_for_agent(store, &agent.agent_id).await?;

    Ok(AgentSummary {
        session_count: sessions.len(),
        active_session_count,
        latest_status: latest.as_ref().map(|s| s.status),
        latest_message: latest.and_then(|s| s.message),
        agent,
    })
}

/// Latest status across all sessions of an agent.
async fn latest_for_agent(
    store: &dyn StatusStore,
    agent_id: &str,
) -> Result<Option<AgentStatus>, StoreError> {
    let sessions = store.list_sessions(agent_id, true).await?;
    let mut latest: Option<AgentStatus> = None;
    for session in &sessions {
        match store.get_latest_status(agent_id, &session.session_topic).await {
            Ok(status) => {
                if latest.as_ref().map_or(true, |l| status.timestamp > l.timestamp) {
                    latest = Some(status);
                }
            }
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(latest)
}

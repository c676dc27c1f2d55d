//! Status report ingestion: validate, detect the transition, persist, notify.

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use pulse_core::models::{Agent, AgentStatus, Session, Status, DEFAULT_TTL_MINUTES};
use pulse_core::notification::NotificationData;
use pulse_core::report::{CheckedReport, StatusReport, ValidationError};
use pulse_core::store::{latest_of, StatusStore, StoreError};
use thiserror::Error;

use super::dispatcher::NotificationDispatcher;

/// Who is reporting. Set by whatever authenticates the request upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user: Option<String>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user: Some(id.into()),
        }
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("agent {agent_id} is owned by another user")]
    Forbidden { agent_id: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::Validation(_) => StatusCode::BAD_REQUEST,
            IngestError::Forbidden { .. } => StatusCode::FORBIDDEN,
            IngestError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            IngestError::Validation(_) => "bad_request",
            IngestError::Forbidden { .. } => "forbidden",
            IngestError::Store(_) => "internal_error",
        }
    }
}

/// What the history said before this report was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionContext {
    pub previous_status: Option<Status>,
    /// Earliest `running` timestamp in the session.
    pub running_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportOutcome {
    pub previous_status: Option<Status>,
    /// Set when the report completed a run and a notification was handed off.
    pub notification: Option<NotificationData>,
}

// ============================================================================
// TRANSITION DETECTION
// ============================================================================

/// Scan an unordered history. Ties on timestamp go to the first entry seen.
pub fn detect_transition(history: &[AgentStatus]) -> TransitionContext {
    let previous_status = latest_of(history).map(|s| s.status);

    let running_start = history
        .iter()
        .filter(|s| s.status == Status::Running)
        .fold(None, |earliest: Option<DateTime<Utc>>, s| match earliest {
            Some(t) if t <= s.timestamp => Some(t),
            _ => Some(s.timestamp),
        });

    TransitionContext {
        previous_status,
        running_start,
    }
}

/// A run just ended: the session was running and the new status closes it.
pub fn should_notify(previous: Option<Status>, new_status: Status) -> bool {
    previous == Some(Status::Running) && new_status.ends_run()
}

pub fn running_duration(running_start: Option<DateTime<Utc>>, at: DateTime<Utc>) -> Duration {
    running_start.map(|start| at - start).unwrap_or_else(Duration::zero)
}

// ============================================================================
// PUBLIC API
// ============================================================================

pub struct ReportProcessor {
    store: Arc<dyn StatusStore>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl ReportProcessor {
    pub fn new(store: Arc<dyn StatusStore>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    /// Apply one report. Any store failure aborts it; delivery failures never surface here.
    pub async fn process_report(
        &self,
        report: StatusReport,
        identity: &Identity,
    ) -> Result<ReportOutcome, IngestError> {
        let report = report.checked()?;
        let now = Utc::now();

        let existing = optional(self.store.get_agent(&report.agent_id).await)?;
        if let Some(agent) = &existing {
            if let (Some(owner), Some(caller)) = (&agent.owner, &identity.user) {
                if owner != caller {
                    tracing::warn!(
                        agent_id = %report.agent_id,
                        caller = %caller,
                        "Rejected report for agent owned by another user"
                    );
                    return Err(IngestError::Forbidden {
                        agent_id: report.agent_id,
                    });
                }
            }
        }

        let history = self
            .store
            .get_status_history(&report.agent_id, &report.session_topic)
            .await?;
        let context = detect_transition(&history);

        let agent = merge_agent(existing, &report, identity, now);
        self.store.upsert_agent(&agent).await?;

        let existing_session = optional(
            self.store
                .get_session(&report.agent_id, &report.session_topic)
                .await,
        )?;
        let session = merge_session(existing_session, &report, now);
        self.store.upsert_session(&session).await?;

        self.store
            .append_status(&AgentStatus {
                agent_id: report.agent_id.clone(),
                session_topic: report.session_topic.clone(),
                status: report.status,
                timestamp: report.timestamp,
                message: report.message.clone(),
                content: report.content.clone(),
            })
            .await?;

        tracing::info!(
            agent_id = %report.agent_id,
            session_topic = %report.session_topic,
            status = %report.status,
            previous = ?context.previous_status,
            "Status report recorded"
        );

        let notification = if should_notify(context.previous_status, report.status) {
            let data = NotificationData {
                agent_id: report.agent_id.clone(),
                agent_name: agent.name.clone().unwrap_or_default(),
                session_topic: report.session_topic.clone(),
                from_status: Status::Running,
                to_status: report.status,
                timestamp: report.timestamp,
                message: report.message,
                content: report.content,
                duration: running_duration(context.running_start, report.timestamp),
            };
            if let Err(e) = self.dispatcher.notify(&data) {
                tracing::error!(agent_id = %data.agent_id, error = %e, "Failed to queue notification");
            }
            Some(data)
        } else {
            None
        };

        Ok(ReportOutcome {
            previous_status: context.previous_status,
            notification,
        })
    }
}

// ============================================================================
// INTERNAL HELPERS
// ============================================================================

fn optional<T>(result: Result<T, StoreError>) -> Result<Option<T>, StoreError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

fn merge_agent(
    existing: Option<Agent>,
    report: &CheckedReport,
    identity: &Identity,
    now: DateTime<Utc>,
) -> Agent {
    let mut agent = existing.unwrap_or_else(|| Agent::new(report.agent_id.clone(), now));
    if agent.owner.is_none() {
        agent.owner = identity.user.clone();
    }
    if report.agent_name.is_some() {
        agent.name = report.agent_name.clone();
    }
    if report.agent_source.is_some() {
        agent.source = report.agent_source.clone();
    }
    agent.last_seen = now;
    agent
}

fn merge_session(existing: Option<Session>, report: &CheckedReport, now: DateTime<Utc>) -> Session {
    match existing {
        Some(mut session) => {
            session.last_updated = now.max(session.created);
            if report.ttl_minutes != 0 {
                session.ttl_minutes = report.ttl_minutes;
            }
            if session.expired {
                tracing::info!(
                    agent_id = %session.agent_id,
                    session_topic = %session.session_topic,
                    "Reviving expired session"
                );
                session.expired = false;
                session.expired_at = None;
            }
            session
        }
        None => {
            let ttl = if report.ttl_minutes == 0 {
                DEFAULT_TTL_MINUTES
            } else {
                report.ttl_minutes
            };
            Session::new(report.agent_id.clone(), report.session_topic.clone(), ttl, now)
        }
    }
}

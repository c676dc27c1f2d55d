//! Storage abstraction for agents, sessions and status history.
//!
//! Every method is an independently synchronized operation. Callers must not
//! assume atomicity across two calls; `expire_session` exists so the expiry
//! sweep can flip a session without writing back a stale copy.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Agent, AgentStatus, Session};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn upsert_agent(&self, agent: &Agent) -> Result<(), StoreError>;

    async fn get_agent(&self, agent_id: &str) -> Result<Agent, StoreError>;

    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError>;

    /// Fails with `NotFound` if the owning agent does not exist.
    async fn upsert_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn get_session(&self, agent_id: &str, session_topic: &str)
        -> Result<Session, StoreError>;

    async fn list_sessions(
        &self,
        agent_id: &str,
        include_expired: bool,
    ) -> Result<Vec<Session>, StoreError>;

    /// Mark the session expired at `now` if it is still live and past its TTL.
    ///
    /// The staleness check and the flip happen under the store's own
    /// synchronization. Returns whether the session was flipped.
    async fn expire_session(
        &self,
        agent_id: &str,
        session_topic: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Fails with `NotFound` if the session does not exist.
    async fn append_status(&self, status: &AgentStatus) -> Result<(), StoreError>;

    /// Full history in no particular order; empty if the session has none.
    async fn get_status_history(
        &self,
        agent_id: &str,
        session_topic: &str,
    ) -> Result<Vec<AgentStatus>, StoreError>;

    async fn get_latest_status(
        &self,
        agent_id: &str,
        session_topic: &str,
    ) -> Result<AgentStatus, StoreError> {
        let history = self.get_status_history(agent_id, session_topic).await?;
        latest_of(&history).cloned().ok_or(StoreError::NotFound)
    }

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Entry with the greatest timestamp; on ties the first one wins.
pub fn latest_of(history: &[AgentStatus]) -> Option<&AgentStatus> {
    history.iter().fold(None, |latest: Option<&AgentStatus>, s| match latest {
        Some(l) if s.timestamp <= l.timestamp => Some(l),
        _ => Some(s),
    })
}

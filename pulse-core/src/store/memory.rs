use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{StatusStore, StoreError};
use crate::models::{Agent, AgentStatus, Session};

type SessionKey = (String, String);

#[derive(Default)]
struct Inner {
    agents: HashMap<String, Agent>,
    /// agent_id -> session_topic -> session
    sessions: HashMap<String, HashMap<String, Session>>,
    statuses: HashMap<SessionKey, Vec<AgentStatus>>,
}

/// Process-local store. Each call takes the lock once and never holds it across an `.await`.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn upsert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        if agent.agent_id.is_empty() {
            return Err(StoreError::Invalid("agent_id is required".to_string()));
        }
        self.write()
            .agents
            .insert(agent.agent_id.clone(), agent.clone());
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Agent, StoreError> {
        self.read()
            .agents
            .get(agent_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        Ok(self.read().agents.values().cloned().collect())
    }

    async fn upsert_session(&self, session: &Session) -> Result<(), StoreError> {
        session.check_invariants().map_err(StoreError::Invalid)?;

        let mut inner = self.write();
        if !inner.agents.contains_key(&session.agent_id) {
            return Err(StoreError::NotFound);
        }
        inner
            .sessions
            .entry(session.agent_id.clone())
            .or_default()
            .insert(session.session_topic.clone(), session.clone());
        Ok(())
    }

    async fn get_session(
        &self,
        agent_id: &str,
        session_topic: &str,
    ) -> Result<Session, StoreError> {
        self.read()
            .sessions
            .get(agent_id)
            .and_then(|sessions| sessions.get(session_topic))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_sessions(
        &self,
        agent_id: &str,
        include_expired: bool,
    ) -> Result<Vec<Session>, StoreError> {
        let inner = self.read();
        let sessions = match inner.sessions.get(agent_id) {
            Some(sessions) => sessions
                .values()
                .filter(|s| include_expired || !s.expired)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        Ok(sessions)
    }

    async fn expire_session(
        &self,
        agent_id: &str,
        session_topic: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.write();
        let session = inner
            .sessions
            .get_mut(agent_id)
            .and_then(|sessions| sessions.get_mut(session_topic))
            .ok_or(StoreError::NotFound)?;

        if session.expired || !session.is_stale(now) {
            return Ok(false);
        }
        session.expired = true;
        session.expired_at = Some(now);
        Ok(true)
    }

    async fn append_status(&self, status: &AgentStatus) -> Result<(), StoreError> {
        let mut inner = self.write();
        let session_exists = inner
            .sessions
            .get(&status.agent_id)
            .is_some_and(|sessions| sessions.contains_key(&status.session_topic));
        if !session_exists {
            return Err(StoreError::NotFound);
        }
        inner
            .statuses
            .entry((status.agent_id.clone(), status.session_topic.clone()))
            .or_default()
            .push(status.clone());
        Ok(())
    }

    async fn get_status_history(
        &self,
        agent_id: &str,
        session_topic: &str,
    ) -> Result<Vec<AgentStatus>, StoreError> {
        let key = (agent_id.to_string(), session_topic.to_string());
        Ok(self.read().statuses.get(&key).cloned().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

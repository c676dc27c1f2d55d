//! Postgres-backed store. Expects the schema in `migrations/0001_init.sql`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{StatusStore, StoreError};
use crate::models::{Agent, AgentStatus, Session, DEFAULT_TTL_MINUTES};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct StatusRow {
    agent_id: String,
    session_topic: String,
    status: String,
    timestamp: DateTime<Utc>,
    message: Option<String>,
    content: Option<String>,
}

impl TryFrom<StatusRow> for AgentStatus {
    type Error = StoreError;

    fn try_from(row: StatusRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(StoreError::Invalid)?;
        Ok(AgentStatus {
            agent_id: row.agent_id,
            session_topic: row.session_topic,
            status,
            timestamp: row.timestamp,
            message: row.message,
            content: row.content,
        })
    }
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StatusStore for PgStore {
    async fn upsert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO agents (agent_id, owner, name, source, registered, last_seen)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (agent_id) DO UPDATE
            SET owner = EXCLUDED.owner,
                name = EXCLUDED.name,
                source = EXCLUDED.source,
                last_seen = EXCLUDED.last_seen
            "#,
        )
        .bind(&agent.agent_id)
        .bind(&agent.owner)
        .bind(&agent.name)
        .bind(&agent.source)
        .bind(agent.registered)
        .bind(agent.last_seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Agent, StoreError> {
        sqlx::query_as::<_, Agent>(
            "SELECT agent_id, owner, name, source, registered, last_seen FROM agents WHERE agent_id = $1",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let agents = sqlx::query_as::<_, Agent>(
            "SELECT agent_id, owner, name, source, registered, last_seen FROM agents ORDER BY agent_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(agents)
    }

    async fn upsert_session(&self, session: &Session) -> Result<(), StoreError> {
        session.check_invariants().map_err(StoreError::Invalid)?;

        let result = sqlx::query(
            r#"
            INSERT INTO sessions (agent_id, session_topic, created, last_updated, expired, expired_at, ttl_minutes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (agent_id, session_topic) DO UPDATE
            SET last_updated = EXCLUDED.last_updated,
                expired = EXCLUDED.expired,
                expired_at = EXCLUDED.expired_at,
                ttl_minutes = EXCLUDED.ttl_minutes
            "#,
        )
        .bind(&session.agent_id)
        .bind(&session.session_topic)
        .bind(session.created)
        .bind(session.last_updated)
        .bind(session.expired)
        .bind(session.expired_at)
        .bind(session.ttl_minutes)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(StoreError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_session(
        &self,
        agent_id: &str,
        session_topic: &str,
    ) -> Result<Session, StoreError> {
        sqlx::query_as::<_, Session>(
            r#"
            SELECT agent_id, session_topic, created, last_updated, expired, expired_at, ttl_minutes
            FROM sessions
            WHERE agent_id = $1 AND session_topic = $2
            "#,
        )
        .bind(agent_id)
        .bind(session_topic)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn list_sessions(
        &self,
        agent_id: &str,
        include_expired: bool,
    ) -> Result<Vec<Session>, StoreError> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT agent_id, session_topic, created, last_updated, expired, expired_at, ttl_minutes
            FROM sessions
            WHERE agent_id = $1 AND ($2 OR expired = false)
            ORDER BY last_updated DESC
            "#,
        )
        .bind(agent_id)
        .bind(include_expired)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn expire_session(
        &self,
        agent_id: &str,
        session_topic: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET expired = true,
                expired_at = $3
            WHERE agent_id = $1
              AND session_topic = $2
              AND expired = false
              AND last_updated + make_interval(mins => CASE WHEN ttl_minutes = 0 THEN $4 ELSE ttl_minutes END) < $3
            "#,
        )
        .bind(agent_id)
        .bind(session_topic)
        .bind(now)
        .bind(DEFAULT_TTL_MINUTES)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_status(&self, status: &AgentStatus) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO agent_statuses (agent_id, session_topic, status, timestamp, message, content)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&status.agent_id)
        .bind(&status.session_topic)
        .bind(status.status.as_str())
        .bind(status.timestamp)
        .bind(&status.message)
        .bind(&status.content)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(StoreError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_status_history(
        &self,
        agent_id: &str,
        session_topic: &str,
    ) -> Result<Vec<AgentStatus>, StoreError> {
        let rows = sqlx::query_as::<_, StatusRow>(
            r#"
            SELECT agent_id, session_topic, status, timestamp, message, content
            FROM agent_statuses
            WHERE agent_id = $1 AND session_topic = $2
            ORDER BY id
            "#,
        )
        .bind(agent_id)
        .bind(session_topic)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AgentStatus::try_from).collect()
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

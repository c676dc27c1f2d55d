use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// TTL applied when a session carries `ttl_minutes == 0`.
pub const DEFAULT_TTL_MINUTES: i32 = 30;

pub const MAX_TTL_MINUTES: i32 = 1440;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub agent_id: String,
    pub session_topic: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub expired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
    pub ttl_minutes: i32,
}

impl Session {
    pub fn new(
        agent_id: impl Into<String>,
        session_topic: impl Into<String>,
        ttl_minutes: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_topic: session_topic.into(),
            created: now,
            last_updated: now,
            expired: false,
            expired_at: None,
            ttl_minutes,
        }
    }

    pub fn effective_ttl(&self) -> Duration {
        let minutes = if self.ttl_minutes == 0 {
            DEFAULT_TTL_MINUTES
        } else {
            self.ttl_minutes
        };
        Duration::minutes(minutes as i64)
    }

    /// True once `now` is strictly past `last_updated + ttl`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now > self.last_updated + self.effective_ttl()
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        if self.agent_id.is_empty() {
            return Err("agent_id is required".to_string());
        }
        if self.session_topic.is_empty() {
            return Err("session_topic is required".to_string());
        }
        if self.last_updated < self.created {
            return Err("last_updated must be >= created".to_string());
        }
        if !(0..=MAX_TTL_MINUTES).contains(&self.ttl_minutes) {
            return Err("ttl_minutes must be 0 or 1-1440".to_string());
        }
        Ok(())
    }
}

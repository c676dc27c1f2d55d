//! Inbound status reports and their validation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Status, MAX_TTL_MINUTES};

pub const MAX_AGENT_ID_CHARS: usize = 100;
pub const MAX_AGENT_LABEL_CHARS: usize = 200;
pub const MAX_SESSION_TOPIC_CHARS: usize = 500;
pub const MAX_MESSAGE_CHARS: usize = 1000;
pub const MAX_CONTENT_CHARS: usize = 10000;

/// Wire form of a status update pushed by an agent.
///
/// Every field defaults so that a missing field surfaces as a validation
/// error rather than a decode error. An unparseable `timestamp` still
/// fails decoding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusReport {
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_source: Option<String>,
    pub session_topic: String,
    pub status: String,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_minutes: Option<i64>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("agent_id is required")]
    MissingAgentId,

    #[error("agent_id must be 1-100 characters")]
    AgentIdTooLong,

    #[error("agent_name must be 0-200 characters")]
    AgentNameTooLong,

    #[error("agent_source must be 0-200 characters")]
    AgentSourceTooLong,

    #[error("session_topic is required")]
    MissingSessionTopic,

    #[error("session_topic must be 1-500 characters")]
    SessionTopicTooLong,

    #[error("status must be one of: running, success, failed, pending (got '{0}')")]
    InvalidStatus(String),

    #[error("timestamp is required")]
    MissingTimestamp,

    #[error("message must be 0-1000 characters")]
    MessageTooLong,

    #[error("content must be 0-10000 characters")]
    ContentTooLong,

    #[error("ttl_minutes must be 0 or 1-1440 (got {0})")]
    InvalidTtl(i64),
}

/// A report that passed validation, with its fields in typed form.
#[derive(Debug, Clone)]
pub struct CheckedReport {
    pub agent_id: String,
    pub agent_name: Option<String>,
    pub agent_source: Option<String>,
    pub session_topic: String,
    pub status: Status,
    pub timestamp: DateTime<Utc>,
    pub message: Option<String>,
    pub content: Option<String>,
    /// 0 means "not supplied".
    pub ttl_minutes: i32,
}

impl StatusReport {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.agent_id.is_empty() {
            return Err(ValidationError::MissingAgentId);
        }
        if char_len(&self.agent_id) > MAX_AGENT_ID_CHARS {
            return Err(ValidationError::AgentIdTooLong);
        }
        if opt_char_len(&self.agent_name) > MAX_AGENT_LABEL_CHARS {
            return Err(ValidationError::AgentNameTooLong);
        }
        if opt_char_len(&self.agent_source) > MAX_AGENT_LABEL_CHARS {
            return Err(ValidationError::AgentSourceTooLong);
        }
        if self.session_topic.is_empty() {
            return Err(ValidationError::MissingSessionTopic);
        }
        if char_len(&self.session_topic) > MAX_SESSION_TOPIC_CHARS {
            return Err(ValidationError::SessionTopicTooLong);
        }
        if self.status.parse::<Status>().is_err() {
            return Err(ValidationError::InvalidStatus(self.status.clone()));
        }
        match self.timestamp {
            Some(ts) if !is_zero_time(&ts) => {}
            _ => return Err(ValidationError::MissingTimestamp),
        }
        if opt_char_len(&self.message) > MAX_MESSAGE_CHARS {
            return Err(ValidationError::MessageTooLong);
        }
        if opt_char_len(&self.content) > MAX_CONTENT_CHARS {
            return Err(ValidationError::ContentTooLong);
        }
        if let Some(ttl) = self.ttl_minutes {
            if ttl < 0 || ttl > MAX_TTL_MINUTES as i64 {
                return Err(ValidationError::InvalidTtl(ttl));
            }
        }
        Ok(())
    }

    /// Validate and convert into typed fields. Empty optional strings become `None`.
    pub fn checked(self) -> Result<CheckedReport, ValidationError> {
        self.validate()?;

        let status = self
            .status
            .parse::<Status>()
            .map_err(|_| ValidationError::InvalidStatus(self.status.clone()))?;
        let timestamp = self.timestamp.ok_or(ValidationError::MissingTimestamp)?;

        Ok(CheckedReport {
            agent_id: self.agent_id,
            agent_name: non_empty(self.agent_name),
            agent_source: non_empty(self.agent_source),
            session_topic: self.session_topic,
            status,
            timestamp,
            message: non_empty(self.message),
            content: non_empty(self.content),
            ttl_minutes: self.ttl_minutes.unwrap_or(0) as i32,
        })
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn opt_char_len(s: &Option<String>) -> usize {
    s.as_deref().map(char_len).unwrap_or(0)
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.is_empty())
}

/// `0001-01-01T00:00:00Z`, the zero time some reporters send instead of omitting the field.
fn is_zero_time(ts: &DateTime<Utc>) -> bool {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|zero| ts.naive_utc() == zero)
        .unwrap_or(false)
}

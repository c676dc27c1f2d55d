use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Running,
    Success,
    Failed,
    Pending,
}

impl Status {
    pub const ALL: [Status; 4] = [Status::Running, Status::Success, Status::Failed, Status::Pending];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Running => "running",
            Status::Success => "success",
            Status::Failed => "failed",
            Status::Pending => "pending",
        }
    }

    /// Whether a session leaving `running` for this status is worth notifying about.
    pub fn ends_run(&self) -> bool {
        matches!(self, Status::Success | Status::Failed | Status::Pending)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status '{}'", s))
    }
}

/// One immutable entry of a session's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub agent_id: String,
    pub session_topic: String,
    pub status: Status,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parses_wire_names() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("RUNNING".parse::<Status>().is_err());
        assert!("done".parse::<Status>().is_err());
    }

    #[test]
    fn test_only_running_is_not_a_run_end() {
        assert!(!Status::Running.ends_run());
        assert!(Status::Success.ends_run());
        assert!(Status::Failed.ends_run());
        assert!(Status::Pending.ends_run());
    }
}

//! Transition notification payloads.
//!
//! The JSON envelope `{"msg_type":"text","content":{"text":...}}` is what the
//! downstream chat-bot receiver expects; field names must not change.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Status;

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub msg_type: String,
    pub content: WebhookContent,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookContent {
    pub text: String,
}

/// Everything a status-change notification needs. Built per transition, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationData {
    pub agent_id: String,
    pub agent_name: String,
    pub session_topic: String,
    pub from_status: Status,
    pub to_status: Status,
    pub timestamp: DateTime<Utc>,
    pub message: Option<String>,
    pub content: Option<String>,
    /// Time since the earliest `running` record of the session, zero if none.
    pub duration: Duration,
}

pub fn format_message(data: &NotificationData) -> String {
    let mut msg = format!(
        "🔔 Session Status Change\n\n\
         Agent ID: {}\n\
         Agent Name: {}\n\
         Session: {}\n\
         Status: {} → {}\n\
         Timestamp: {}\n\
         Duration: {}",
        data.agent_id,
        data.agent_name,
        data.session_topic,
        data.from_status,
        data.to_status,
        data.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        format_go_duration(data.duration),
    );

    if let Some(message) = data.message.as_deref().filter(|m| !m.is_empty()) {
        msg.push_str("\nMessage: ");
        msg.push_str(message);
    }

    if let Some(content) = data.content.as_deref().filter(|c| !c.is_empty()) {
        msg.push_str("\nContent: ");
        msg.push_str(content);
    }

    msg
}

pub fn build_payload(data: &NotificationData) -> Result<Vec<u8>, serde_json::Error> {
    let payload = WebhookPayload {
        msg_type: "text".to_string(),
        content: WebhookContent {
            text: format_message(data),
        },
    };
    serde_json::to_vec(&payload)
}

/// Render a duration the way Go's `time.Duration.String` does: `0s`, `1.5ms`,
/// `5m0s`, `1h0m0s`, `-2s`. Receivers already parse this format.
pub fn format_go_duration(d: Duration) -> String {
    let (negative, nanos): (bool, u128) = match d.num_nanoseconds() {
        Some(n) => (n < 0, n.unsigned_abs() as u128),
        None => {
            let secs = d.num_seconds();
            (secs < 0, secs.unsigned_abs() as u128 * 1_000_000_000)
        }
    };

    if nanos == 0 {
        return "0s".to_string();
    }

    let body = if nanos < 1_000_000_000 {
        let (prec, unit) = if nanos < 1_000 {
            (0, "ns")
        } else if nanos < 1_000_000 {
            (3, "µs")
        } else {
            (6, "ms")
        };
        let (whole, frac) = split_fraction(nanos, prec);
        format!("{}{}{}", whole, frac, unit)
    } else {
        let (total_secs, frac) = split_fraction(nanos, 9);
        let secs = total_secs % 60;
        let mins = (total_secs / 60) % 60;
        let hours = total_secs / 3600;
        if hours > 0 {
            format!("{}h{}m{}{}s", hours, mins, secs, frac)
        } else if mins > 0 {
            format!("{}m{}{}s", mins, secs, frac)
        } else {
            format!("{}{}s", secs, frac)
        }
    };

    if negative {
        format!("-{}", body)
    } else {
        body
    }
}

/// Split `value` into its integer part and a `.ddd` suffix (trailing zeros trimmed)
/// at `prec` decimal places.
fn split_fraction(value: u128, prec: u32) -> (u128, String) {
    let scale = 10u128.pow(prec);
    let whole = value / scale;
    let frac = value % scale;
    if frac == 0 {
        return (whole, String::new());
    }
    let digits = format!("{:0width$}", frac, width = prec as usize);
    (whole, format!(".{}", digits.trim_end_matches('0')))
}

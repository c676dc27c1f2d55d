//! pulse — report agent status to a Pulse server and inspect what it knows
//!
//! # Subcommands
//! - `report <agent_id> <session_topic> <status> [...]` — post a status report
//! - `agents [--status <s>] [--search <q>]`              — list agents with stats
//! - `sessions <agent_id> [--active]`                    — list an agent's sessions
//! - `health`                                            — show server health

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";
const USER_HEADER: &str = "x-pulse-user";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "pulse", version, about = "Report and inspect AI agent status")]
struct Cli {
    /// Pulse HTTP server URL
    #[arg(long, env = "PULSE_URL", default_value = DEFAULT_SERVER)]
    url: String,

    /// Identity sent with every request
    #[arg(long, env = "PULSE_USER")]
    user: Option<String>,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Post a status report
    Report {
        agent_id: String,
        session_topic: String,
        /// running, success, failed or pending
        status: String,

        #[arg(long)]
        message: Option<String>,

        #[arg(long)]
        content: Option<String>,

        /// Agent display name
        #[arg(long)]
        name: Option<String>,

        /// Where the agent runs (ci, laptop, ...)
        #[arg(long)]
        source: Option<String>,

        /// Session TTL in minutes (1-1440, server default 30)
        #[arg(long)]
        ttl: Option<u32>,

        /// RFC3339 timestamp, defaults to now
        #[arg(long)]
        timestamp: Option<DateTime<Utc>>,
    },

    /// List agents
    Agents {
        /// Only agents whose latest status matches
        #[arg(long)]
        status: Option<String>,

        /// Case-insensitive match on id or name
        #[arg(long)]
        search: Option<String>,
    },

    /// List sessions of one agent
    Sessions {
        agent_id: String,

        /// Hide expired sessions
        #[arg(long)]
        active: bool,
    },

    /// Show server health
    Health,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AgentRow {
    pub agent_id: String,
    pub name: Option<String>,
    pub session_count: usize,
    pub active_session_count: usize,
    pub latest_status: Option<String>,
    pub latest_message: Option<String>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AgentList {
    pub agents: Vec<AgentRow>,
}

#[derive(Debug, Deserialize)]
pub struct SessionRow {
    pub session_topic: String,
    pub current_status: Option<String>,
    pub expired: bool,
    pub last_updated: DateTime<Utc>,
    pub ttl_minutes: i32,
}

#[derive(Debug, Deserialize)]
pub struct SessionList {
    pub sessions: Vec<SessionRow>,
}

// ============================================================================
// Formatting
// ============================================================================

#[allow(clippy::too_many_arguments)]
pub fn build_report(
    agent_id: &str,
    session_topic: &str,
    status: &str,
    message: Option<&str>,
    content: Option<&str>,
    name: Option<&str>,
    source: Option<&str>,
    ttl: Option<u32>,
    timestamp: DateTime<Utc>,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "agent_id": agent_id,
        "session_topic": session_topic,
        "status": status,
        "timestamp": timestamp,
    });
    let fields = [
        ("message", message),
        ("content", content),
        ("agent_name", name),
        ("agent_source", source),
    ];
    if let Some(obj) = body.as_object_mut() {
        for (key, value) in fields {
            if let Some(v) = value {
                obj.insert(key.to_string(), serde_json::json!(v));
            }
        }
        if let Some(ttl) = ttl {
            obj.insert("ttl_minutes".to_string(), serde_json::json!(ttl));
        }
    }
    body
}

pub fn format_agent(agent: &AgentRow) -> String {
    let label = match &agent.name {
        Some(name) => format!("{} ({})", agent.agent_id, name),
        None => agent.agent_id.clone(),
    };
    let mut line = format!(
        "{:<40} {:<8} sessions {}/{}  last seen {}",
        label,
        agent.latest_status.as_deref().unwrap_or("-"),
        agent.active_session_count,
        agent.session_count,
        agent.last_seen.format("%Y-%m-%d %H:%M:%S"),
    );
    if let Some(msg) = agent.latest_message.as_deref().filter(|m| !m.is_empty()) {
        let preview: String = msg.chars().take(60).collect();
        line.push_str("  ");
        line.push_str(&preview);
    }
    line
}

pub fn format_session(session: &SessionRow) -> String {
    let state = if session.expired { "expired" } else { "live" };
    let ttl = if session.ttl_minutes == 0 {
        "default".to_string()
    } else {
        format!("{}m", session.ttl_minutes)
    };
    format!(
        "{:<40} {:<8} {:<8} ttl {:<8} updated {}",
        session.session_topic,
        session.current_status.as_deref().unwrap_or("-"),
        state,
        ttl,
        session.last_updated.format("%Y-%m-%d %H:%M:%S"),
    )
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

struct Api {
    client: reqwest::blocking::Client,
    base: String,
    user: Option<String>,
}

impl Api {
    fn new(base: &str, user: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            user,
        })
    }

    fn with_user(
        &self,
        req: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.user {
            Some(user) => req.header(USER_HEADER, user),
            None => req,
        }
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}{}", self.base, path);
        let resp = self.with_user(self.client.get(&url).query(query)).send()?;
        read_json(&url, resp)
    }

    fn post(&self, path: &str, body: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}{}", self.base, path);
        let resp = self.with_user(self.client.post(&url).json(body)).send()?;
        read_json(&url, resp)
    }
}

fn read_json(url: &str, resp: reqwest::blocking::Response) -> anyhow::Result<serde_json::Value> {
    let status = resp.status();
    let body: serde_json::Value = resp.json().unwrap_or_default();
    if !status.is_success() {
        let message = body["message"].as_str().unwrap_or("no details");
        anyhow::bail!("{} returned {}: {}", url, status, message);
    }
    Ok(body)
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let api = Api::new(&cli.url, cli.user)?;

    match cli.command {
        Commands::Report {
            agent_id,
            session_topic,
            status,
            message,
            content,
            name,
            source,
            ttl,
            timestamp,
        } => {
            let body = build_report(
                &agent_id,
                &session_topic,
                &status,
                message.as_deref(),
                content.as_deref(),
                name.as_deref(),
                source.as_deref(),
                ttl,
                timestamp.unwrap_or_else(Utc::now),
            );
            let resp = api.post("/webhook/status", &body)?;
            if cli.json {
                print_json(&resp)?;
            } else {
                println!("{}/{} -> {}", agent_id, session_topic, status);
            }
        }
        Commands::Agents { status, search } => {
            let mut query = Vec::new();
            if let Some(s) = status {
                query.push(("status", s));
            }
            if let Some(s) = search {
                query.push(("search", s));
            }
            let resp = api.get("/api/agents", &query)?;
            if cli.json {
                return print_json(&resp);
            }
            let list: AgentList = serde_json::from_value(resp)?;
            if list.agents.is_empty() {
                eprintln!("No agents found");
            }
            for agent in &list.agents {
                println!("{}", format_agent(agent));
            }
        }
        Commands::Sessions { agent_id, active } => {
            let mut query = Vec::new();
            if active {
                query.push(("expired", "false".to_string()));
            }
            let resp = api.get(&format!("/api/agents/{}/sessions", agent_id), &query)?;
            if cli.json {
                return print_json(&resp);
            }
            let list: SessionList = serde_json::from_value(resp)?;
            if list.sessions.is_empty() {
                eprintln!("No sessions for {}", agent_id);
            }
            for session in &list.sessions {
                println!("{}", format_session(session));
            }
        }
        Commands::Health => {
            let resp = api.get("/health", &[])?;
            if cli.json {
                return print_json(&resp);
            }
            println!("Pulse server: {}", resp["status"].as_str().unwrap_or("unknown"));
            println!("Version:      {}", resp["version"].as_str().unwrap_or("?"));
            println!("Store:        {}", resp["store"].as_str().unwrap_or("?"));
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("pulse: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

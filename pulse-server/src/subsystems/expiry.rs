//! Session expiry sweep.
//!
//! A session is stale once `now > last_updated + ttl` (ttl 0 means 30 minutes).
//! The sweep only ever flips `expired` to true; a later report revives the
//! session through the ingestion path, never through here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use pulse_core::store::{StatusStore, StoreError};
use tokio::sync::broadcast;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions_scanned: usize,
    pub sessions_expired: usize,
    pub elapsed_ms: u64,
}

pub struct ExpirySweeper {
    store: Arc<dyn StatusStore>,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    /// One pass over every live session of every agent.
    ///
    /// A failure on one agent is logged and the sweep moves on; only failing
    /// to list agents aborts the pass.
    pub async fn run_once(&self) -> Result<SweepReport, StoreError> {
        let start = Instant::now();
        let now = Utc::now();
        let mut report = SweepReport::default();

        let agents = self.store.list_agents().await?;
        for agent in agents {
            let sessions = match self.store.list_sessions(&agent.agent_id, false).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(agent_id = %agent.agent_id, error = %e, "Failed to list sessions for expiry");
                    continue;
                }
            };

            for session in sessions {
                report.sessions_scanned += 1;
                if !session.is_stale(now) {
                    continue;
                }
                match self
                    .store
                    .expire_session(&session.agent_id, &session.session_topic, now)
                    .await
                {
                    Ok(true) => {
                        report.sessions_expired += 1;
                        tracing::debug!(
                            agent_id = %session.agent_id,
                            session_topic = %session.session_topic,
                            "Session expired"
                        );
                    }
                    // Refreshed or already expired since we listed it.
                    Ok(false) | Err(StoreError::NotFound) => {}
                    Err(e) => {
                        tracing::warn!(
                            agent_id = %session.agent_id,
                            session_topic = %session.session_topic,
                            error = %e,
                            "Failed to expire session"
                        );
                    }
                }
            }
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        Ok(report)
    }
}

/// Background loop: runs `run_once` every `interval` until shutdown fires.
pub async fn run_expiry_loop(
    sweeper: ExpirySweeper,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        "Expiry sweeper started (interval: {}s, store: {})",
        interval.as_secs(),
        sweeper.store.name()
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sweeper.run_once().await {
                    Ok(report) if report.sessions_expired > 0 => {
                        tracing::info!(
                            "Expiry sweep complete: {} scanned, {} expired in {}ms",
                            report.sessions_scanned,
                            report.sessions_expired,
                            report.elapsed_ms
                        );
                    }
                    Ok(report) => {
                        tracing::debug!("Expiry sweep: {} scanned, nothing stale", report.sessions_scanned);
                    }
                    Err(e) => tracing::error!("Expiry sweep error: {}", e),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Expiry sweeper shutting down");
                break;
            }
        }
    }
}

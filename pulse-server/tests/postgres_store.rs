//! PgStore tests. These need a reachable PostgreSQL at `DATABASE_URL` and
//! skip themselves otherwise. The schema is applied from `migrations/`.

use std::sync::Arc;

use chrono::{Duration, DurationRound, Utc};
use pulse_core::models::{Agent, AgentStatus, Session, Status};
use pulse_core::store::{PgStore, StatusStore, StoreError};
use pulse_server::subsystems::expiry::ExpirySweeper;
use sqlx::PgPool;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

async fn make_store() -> Option<PgStore> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    sqlx::raw_sql(SCHEMA).execute(&pool).await.ok()?;
    Some(PgStore::new(pool))
}

async fn cleanup(store: &PgStore, agent_id: &str) {
    sqlx::query("DELETE FROM agents WHERE agent_id = $1")
        .bind(agent_id)
        .execute(store.pool())
        .await
        .ok();
}

/// Postgres keeps microseconds; truncate so round-tripped values compare equal.
fn now() -> chrono::DateTime<Utc> {
    Utc::now()
        .duration_trunc(Duration::microseconds(1))
        .unwrap()
}

// ===========================================================================
// TEST 1: agent/session/status round trip
// ===========================================================================
#[tokio::test]
async fn test_pg_round_trip() {
    let store = match make_store().await {
        Some(s) => s,
        None => {
            eprintln!("Skipping test_pg_round_trip: DB unavailable");
            return;
        }
    };
    let agent_id = "pg-test-round-trip";
    cleanup(&store, agent_id).await;

    let t0 = now();
    let mut agent = Agent::new(agent_id, t0);
    agent.name = Some("PG".to_string());
    store.upsert_agent(&agent).await.unwrap();
    assert_eq!(store.get_agent(agent_id).await.unwrap(), agent);

    let session = Session::new(agent_id, "topic", 15, t0);
    store.upsert_session(&session).await.unwrap();
    assert_eq!(store.get_session(agent_id, "topic").await.unwrap(), session);

    for (status, offset) in [(Status::Running, 0), (Status::Success, 5)] {
        store
            .append_status(&AgentStatus {
                agent_id: agent_id.to_string(),
                session_topic: "topic".to_string(),
                status,
                timestamp: t0 + Duration::minutes(offset),
                message: None,
                content: None,
            })
            .await
            .unwrap();
    }

    assert_eq!(store.get_status_history(agent_id, "topic").await.unwrap().len(), 2);
    assert_eq!(
        store.get_latest_status(agent_id, "topic").await.unwrap().status,
        Status::Success
    );

    cleanup(&store, agent_id).await;
}

// ===========================================================================
// TEST 2: missing parents map to NotFound
// ===========================================================================
#[tokio::test]
async fn test_pg_missing_parent_is_not_found() {
    let store = match make_store().await {
        Some(s) => s,
        None => {
            eprintln!("Skipping test_pg_missing_parent_is_not_found: DB unavailable");
            return;
        }
    };

    let result = store
        .upsert_session(&Session::new("pg-test-ghost", "topic", 0, now()))
        .await;
    assert!(matches!(result, Err(StoreError::NotFound)));
    assert!(store.get_agent("pg-test-ghost").await.unwrap_err().is_not_found());
}

// ===========================================================================
// TEST 3: sweeper expires stale Postgres sessions only
// ===========================================================================
#[tokio::test]
async fn test_pg_expiry_sweep() {
    let store = match make_store().await {
        Some(s) => s,
        None => {
            eprintln!("Skipping test_pg_expiry_sweep: DB unavailable");
            return;
        }
    };
    let agent_id = "pg-test-expiry";
    cleanup(&store, agent_id).await;

    let t0 = now();
    store
        .upsert_agent(&Agent::new(agent_id, t0 - Duration::hours(2)))
        .await
        .unwrap();
    store
        .upsert_session(&Session::new(agent_id, "stale", 0, t0 - Duration::minutes(61)))
        .await
        .unwrap();
    store
        .upsert_session(&Session::new(agent_id, "fresh", 0, t0 - Duration::minutes(10)))
        .await
        .unwrap();

    let store = Arc::new(store);
    ExpirySweeper::new(store.clone()).run_once().await.unwrap();

    let stale = store.get_session(agent_id, "stale").await.unwrap();
    assert!(stale.expired);
    assert!(stale.expired_at.is_some());
    assert!(!store.get_session(agent_id, "fresh").await.unwrap().expired);

    // A second flip is refused.
    assert!(!store.expire_session(agent_id, "stale", Utc::now()).await.unwrap());

    cleanup(&store, agent_id).await;
}

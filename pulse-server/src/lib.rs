pub mod http;
pub mod subsystems;

use std::sync::Arc;

use pulse_core::store::{MemoryStore, PgStore, StatusStore};
use pulse_core::{PulseConfig, PulseError};

/// Postgres when `[database]` is configured, otherwise a process-local store.
pub async fn open_store(config: &PulseConfig) -> Result<Arc<dyn StatusStore>, PulseError> {
    match &config.database {
        Some(db) => {
            let pool = pulse_core::db::create_pool(db).await?;
            tracing::info!(max_connections = db.max_connections, "Using Postgres store");
            Ok(Arc::new(PgStore::new(pool)))
        }
        None => {
            tracing::warn!("No [database] configured, state will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

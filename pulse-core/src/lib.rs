pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notification;
pub mod report;
pub mod store;
pub mod webhook;

pub use config::{NotificationDestination, PulseConfig};
pub use error::PulseError;
pub use models::{Agent, AgentStatus, Session, Status};
pub use notification::{build_payload, format_message, NotificationData};
pub use report::{CheckedReport, StatusReport, ValidationError};
pub use store::{MemoryStore, PgStore, StatusStore, StoreError};
pub use webhook::{DeliveryError, WebhookClient};

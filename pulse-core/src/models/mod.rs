mod agent;
mod session;
mod status;

pub use agent::Agent;
pub use session::{Session, DEFAULT_TTL_MINUTES, MAX_TTL_MINUTES};
pub use status::{AgentStatus, Status};

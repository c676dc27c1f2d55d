pub mod dispatcher;
pub mod expiry;
pub mod ingest;

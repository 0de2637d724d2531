//! Infrastructure layer for storage, configuration and external integrations
//!
//! Database connections, the canonical record store, the run ledger,
//! configuration loading, logging setup and the file-replay connector.

pub mod config;
pub mod database_connection;
pub mod logging;
pub mod replay;
pub mod run_ledger;
pub mod upsert_store;

// Re-export commonly used infrastructure types
pub use config::{AppConfig, ConfigManager};
pub use database_connection::DatabaseConnection;
pub use replay::ReplayConnector;
pub use run_ledger::RunLedger;
pub use upsert_store::{UpsertOutcome, UpsertStore};

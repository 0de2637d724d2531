//! Incremental multi-source data synchronization engine
//!
//! Pulls bounded time windows from independently rate-limited external
//! sources, deduplicates and upserts canonical records against prior
//! snapshots, isolates failures per source and per window, and records
//! every run in an auditable ledger so overlapping re-runs stay safe.

// Module declarations
pub mod domain;
pub mod infrastructure;
pub mod sync;

// Re-export the engine's public surface
pub use domain::{
    Connector, ConnectorError, EntityKind, RawRecord, Source, SourceProfile, SyncMode,
    SyncWindow, WindowPlanner,
};
pub use infrastructure::database_connection::DatabaseConnection;
pub use infrastructure::replay::ReplayConnector;
pub use infrastructure::run_ledger::RunLedger;
pub use infrastructure::upsert_store::UpsertStore;
pub use sync::{BackfillOptions, FanOutReport, SyncReport, SyncService};

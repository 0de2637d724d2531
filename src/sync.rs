//! Sync engine - orchestration of incremental multi-source synchronization
//!
//! Connector output flows through normalization and the validation gate into
//! the canonical store, one bounded window at a time, with failures isolated
//! per window and every run recorded in the ledger.

pub mod normalizer;
pub mod orchestrator;
pub mod service;
pub mod summary;

// Clean re-exports
pub use normalizer::{NormalizeError, Normalizer};
pub use orchestrator::SyncOrchestrator;
pub use service::{BackfillOptions, SyncService};
pub use summary::{FanOutReport, RunStatus, SyncReport, SyncType, WindowError, WindowOutcome};

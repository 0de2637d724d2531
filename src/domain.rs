//! Domain module - core types and contracts of the sync engine
//!
//! Pure building blocks: source identities and profiles, window planning,
//! the canonical record model, the connector contract and the validation
//! gate. Nothing in here performs I/O.

pub mod connector;
pub mod record;
pub mod source;
pub mod validation;
pub mod window;

// Re-export commonly used items for convenience
pub use connector::{Connector, ConnectorError};
pub use record::{entities_for, CanonicalRecord, EntityKind, NaturalKey, RawRecord};
pub use source::{Source, SourceProfile, SyncMode, TraversalOrder};
pub use validation::{RejectReason, ValidationFailure, ValidationGate};
pub use window::{PlanError, SyncWindow, WindowPlanner};

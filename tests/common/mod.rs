//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use storefront_sync::domain::connector::{Connector, ConnectorError};
use storefront_sync::domain::record::{EntityKind, RawRecord};
use storefront_sync::domain::source::{Source, SourceProfile};
use storefront_sync::domain::window::SyncWindow;
use storefront_sync::{DatabaseConnection, RunLedger, SyncService, UpsertStore};

/// Connector double that plays back a scripted sequence of fetch results.
pub struct ScriptedConnector {
    source: Source,
    script: Mutex<Vec<Result<Vec<RawRecord>, ConnectorError>>>,
}

impl ScriptedConnector {
    pub fn new(source: Source, script: Vec<Result<Vec<RawRecord>, ConnectorError>>) -> Self {
        Self {
            source,
            script: Mutex::new(script),
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn source(&self) -> Source {
        self.source
    }

    async fn fetch(&self, _window: &SyncWindow) -> Result<Vec<RawRecord>, ConnectorError> {
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            return Ok(Vec::new());
        }
        script.remove(0)
    }

    async fn fetch_snapshot(&self) -> Result<Vec<RawRecord>, ConnectorError> {
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            return Ok(Vec::new());
        }
        script.remove(0)
    }
}

/// Fresh temp database plus the storage handles tests need.
pub async fn storage() -> (tempfile::TempDir, UpsertStore, RunLedger) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("test.db").display());
    let db = DatabaseConnection::new(&url).await.unwrap();
    db.migrate().await.unwrap();
    (
        dir,
        UpsertStore::new(db.pool().clone()),
        RunLedger::new(db.pool().clone()),
    )
}

/// Service over the given storage with test-friendly pacing for `source`.
pub fn service_with(
    store: UpsertStore,
    ledger: RunLedger,
    connector: Arc<dyn Connector>,
) -> SyncService {
    let source = connector.source();
    let mut service = SyncService::new(store, ledger);
    service.register(connector);
    service.set_profile(source, fast_profile(source));
    service
}

pub fn fast_profile(source: Source) -> SourceProfile {
    let mut profile = SourceProfile::for_source(source);
    profile.pacing_delay_ms = 0;
    profile.freshness_lag_days = 0;
    profile.request_timeout_seconds = 5;
    profile.max_requests_per_second = 1_000;
    profile
}

pub fn order(id: u64, total: f64) -> RawRecord {
    RawRecord::new(
        EntityKind::Order,
        json!({"id": id, "total_price": total, "created_at": "2025-01-02T00:00:00Z"}),
    )
}

//! NDJSON replay connector
//!
//! Replays exported records from disk through the normal sync pipeline.
//! Exports live under `<dir>/<source>/<entity>.ndjson`, one JSON document
//! per line. Windowed fetches keep only the lines whose date falls inside
//! the requested window; snapshot fetches return everything.
//!
//! This is the connector behind the operational binary and offline
//! reprocessing; live API connectors are wired in by the hosting service.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::connector::{Connector, ConnectorError};
use crate::domain::record::{entities_for, EntityKind, RawRecord};
use crate::domain::source::Source;
use crate::domain::validation::parse_flexible_date;
use crate::domain::window::SyncWindow;

pub struct ReplayConnector {
    source: Source,
    dir: PathBuf,
}

impl ReplayConnector {
    pub fn new(source: Source, dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            dir: dir.into(),
        }
    }

    fn entity_file(&self, entity: EntityKind) -> PathBuf {
        self.dir
            .join(self.source.as_str())
            .join(format!("{entity}.ndjson"))
    }

    async fn read_entity(
        &self,
        entity: EntityKind,
        window: Option<&SyncWindow>,
    ) -> Result<Vec<RawRecord>, ConnectorError> {
        let path = self.entity_file(entity);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ConnectorError::Transient(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let mut records = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let payload: serde_json::Value = match serde_json::from_str(line) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(
                        file = %path.display(),
                        line = line_no + 1,
                        error = %e,
                        "skipping malformed export line"
                    );
                    continue;
                }
            };
            if let Some(window) = window {
                match record_date(&payload) {
                    Some(date) if window.contains(date) => {}
                    Some(_) => continue,
                    None => {
                        debug!(
                            file = %path.display(),
                            line = line_no + 1,
                            "skipping undated line in windowed replay"
                        );
                        continue;
                    }
                }
            }
            records.push(RawRecord::new(entity, payload));
        }
        Ok(records)
    }
}

/// The date a record belongs to, for window filtering.
fn record_date(payload: &serde_json::Value) -> Option<chrono::NaiveDate> {
    for field in ["date", "created_at", "processed_at", "updated_at"] {
        if let Some(raw) = payload.get(field).and_then(serde_json::Value::as_str) {
            if let Some(date) = parse_flexible_date(raw) {
                return Some(date);
            }
        }
    }
    None
}

#[async_trait]
impl Connector for ReplayConnector {
    fn source(&self) -> Source {
        self.source
    }

    async fn fetch(&self, window: &SyncWindow) -> Result<Vec<RawRecord>, ConnectorError> {
        let mut all = Vec::new();
        for entity in entities_for(self.source) {
            all.extend(self.read_entity(*entity, Some(window)).await?);
        }
        debug!(
            source = %self.source,
            window = %window,
            records = all.len(),
            "replayed export window"
        );
        Ok(all)
    }

    async fn fetch_snapshot(&self) -> Result<Vec<RawRecord>, ConnectorError> {
        let mut all = Vec::new();
        for entity in entities_for(self.source) {
            all.extend(self.read_entity(*entity, None).await?);
        }
        Ok(all)
    }
}

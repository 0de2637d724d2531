//! Canonical record store
//!
//! Persists canonical entities keyed by natural key. Upserts are idempotent:
//! an absent key inserts, a present key replaces the attribute document and
//! fetch timestamp while `first_seen_at` survives. Within one batch the
//! writes run sequentially, so repeated keys resolve by arrival order.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::domain::record::{CanonicalRecord, EntityKind};
use crate::domain::source::Source;

/// Counts returned by a batch upsert: `saved` rows were new, `updated` rows
/// replaced an existing key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub saved: u64,
    pub updated: u64,
}

impl UpsertOutcome {
    pub fn total(&self) -> u64 {
        self.saved + self.updated
    }
}

/// Repository over the `canonical_records` table.
#[derive(Clone)]
pub struct UpsertStore {
    pool: Arc<SqlitePool>,
}

impl UpsertStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Insert-or-replace every record, reporting how many keys were new.
    pub async fn upsert_batch(&self, records: &[CanonicalRecord]) -> Result<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        for record in records {
            if self.upsert_one(record).await? {
                outcome.saved += 1;
            } else {
                outcome.updated += 1;
            }
        }
        Ok(outcome)
    }

    /// Returns true when the record's key was not present before.
    async fn upsert_one(&self, record: &CanonicalRecord) -> Result<bool> {
        let storage_key = record.natural_key.as_storage_key();
        let existing_first_seen = self
            .first_seen_at(record.source, record.entity, &storage_key)
            .await?;
        let is_new = existing_first_seen.is_none();
        let first_seen_at = existing_first_seen.unwrap_or(record.fetched_at);

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO canonical_records
            (source, entity, natural_key, snapshot_date, attributes, first_seen_at, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.source.as_str())
        .bind(record.entity.as_str())
        .bind(&storage_key)
        .bind(record.snapshot_date)
        .bind(record.attributes.to_string())
        .bind(first_seen_at)
        .bind(record.fetched_at)
        .execute(&*self.pool)
        .await?;

        Ok(is_new)
    }

    async fn first_seen_at(
        &self,
        source: Source,
        entity: EntityKind,
        storage_key: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT first_seen_at FROM canonical_records WHERE source = ? AND entity = ? AND natural_key = ?",
        )
        .bind(source.as_str())
        .bind(entity.as_str())
        .bind(storage_key)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.map(|r| r.get("first_seen_at")))
    }

    /// Attribute document for one key, if present.
    pub async fn get_attributes(
        &self,
        source: Source,
        entity: EntityKind,
        storage_key: &str,
    ) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query(
            "SELECT attributes FROM canonical_records WHERE source = ? AND entity = ? AND natural_key = ?",
        )
        .bind(source.as_str())
        .bind(entity.as_str())
        .bind(storage_key)
        .fetch_optional(&*self.pool)
        .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("attributes");
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    pub async fn count_records(&self, source: Option<Source>) -> Result<i64> {
        let count = match source {
            Some(source) => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM canonical_records WHERE source = ?",
                )
                .bind(source.as_str())
                .fetch_one(&*self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM canonical_records")
                    .fetch_one(&*self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    /// Retention hook: delete dated snapshot rows older than `cutoff`.
    /// Entities keyed by external id alone (no snapshot date) are never
    /// touched. Explicitly invoked; the engine never calls this on its own.
    pub async fn prune_snapshots_before(&self, cutoff: NaiveDate) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM canonical_records WHERE snapshot_date IS NOT NULL AND snapshot_date < ?",
        )
        .bind(cutoff)
        .execute(&*self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

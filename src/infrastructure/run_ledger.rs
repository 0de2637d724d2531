//! Run ledger
//!
//! Append-only record of every orchestrator run plus the validation failure
//! sink and the per-source freshness table. A run's row is created when the
//! run starts and finalized exactly once when it ends; the finalize update
//! is guarded so the row can never be rewritten afterward.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::source::Source;
use crate::domain::validation::ValidationFailure;
use crate::sync::summary::{RunStatus, SyncReport, SyncType};

/// One persisted `sync_logs` row.
#[derive(Debug, Clone)]
pub struct SyncLogRow {
    pub id: String,
    pub source: String,
    pub sync_type: String,
    pub status: String,
    pub requested_start: NaiveDate,
    pub requested_end: NaiveDate,
    pub window_count: i64,
    pub windows_processed: i64,
    pub windows_failed: i64,
    pub records_fetched: i64,
    pub records_saved: i64,
    pub records_updated: i64,
    pub records_rejected: i64,
    pub window_outcomes: Option<String>,
    pub error_details: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
}

/// One row of the per-source freshness view.
#[derive(Debug, Clone)]
pub struct SyncStatusRow {
    pub source_name: String,
    pub source_type: String,
    pub last_sync_attempt: Option<DateTime<Utc>>,
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub sync_status: Option<String>,
    pub records_synced: i64,
    pub records_failed: i64,
    pub error_count: i64,
    pub last_error: Option<String>,
    pub is_healthy: bool,
    pub health_score: i64,
    pub data_lag_hours: f64,
}

#[derive(Clone)]
pub struct RunLedger {
    pool: Arc<SqlitePool>,
}

impl RunLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the run's row in `running` state and return its id.
    pub async fn open_run(
        &self,
        source: Source,
        sync_type: SyncType,
        requested_start: NaiveDate,
        requested_end: NaiveDate,
        window_count: usize,
    ) -> Result<Uuid> {
        let run_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO sync_logs
            (id, source, sync_type, status, requested_start, requested_end, window_count, started_at)
            VALUES (?, ?, ?, 'running', ?, ?, ?, ?)
            "#,
        )
        .bind(run_id.to_string())
        .bind(source.as_str())
        .bind(sync_type.as_str())
        .bind(requested_start)
        .bind(requested_end)
        .bind(window_count as i64)
        .bind(Utc::now())
        .execute(&*self.pool)
        .await?;

        tracing::debug!(run_id = %run_id, source = %source, "sync log opened");
        Ok(run_id)
    }

    /// Record the run's final counts and terminal status.
    ///
    /// Only a `running` row can be finalized; a second call is an error and
    /// leaves the first result intact.
    pub async fn finalize_run(&self, run_id: Uuid, report: &SyncReport) -> Result<()> {
        let error_details = serde_json::json!({
            "errors": report.errors,
            "cancelled": report.cancelled,
            "rate_limit_retries": report
                .windows
                .iter()
                .map(|w| u64::from(w.rate_limit_retries))
                .sum::<u64>(),
        });
        let window_outcomes = serde_json::to_string(&report.windows)?;

        let result = sqlx::query(
            r#"
            UPDATE sync_logs
            SET status = ?,
                windows_processed = ?,
                windows_failed = ?,
                records_fetched = ?,
                records_saved = ?,
                records_updated = ?,
                records_rejected = ?,
                window_outcomes = ?,
                error_details = ?,
                completed_at = ?,
                duration_seconds = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(report.status.as_str())
        .bind(report.windows_processed as i64)
        .bind(report.windows_failed as i64)
        .bind(report.total_records as i64)
        .bind(report.saved as i64)
        .bind(report.updated as i64)
        .bind(report.rejected as i64)
        .bind(window_outcomes)
        .bind(error_details.to_string())
        .bind(report.completed_at)
        .bind(report.duration_seconds)
        .bind(run_id.to_string())
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("sync log {run_id} is not running; refusing to rewrite a finalized row");
        }

        tracing::info!(
            run_id = %run_id,
            source = %report.source,
            status = report.status.as_str(),
            saved = report.saved,
            updated = report.updated,
            rejected = report.rejected,
            duration_seconds = report.duration_seconds,
            "sync log finalized"
        );
        Ok(())
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<Option<SyncLogRow>> {
        let row = sqlx::query("SELECT * FROM sync_logs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&*self.pool)
            .await?;
        Ok(row.map(|r| Self::map_log_row(&r)))
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<SyncLogRow>> {
        let rows = sqlx::query("SELECT * FROM sync_logs ORDER BY started_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&*self.pool)
            .await?;
        Ok(rows.iter().map(Self::map_log_row).collect())
    }

    fn map_log_row(row: &sqlx::sqlite::SqliteRow) -> SyncLogRow {
        SyncLogRow {
            id: row.get("id"),
            source: row.get("source"),
            sync_type: row.get("sync_type"),
            status: row.get("status"),
            requested_start: row.get("requested_start"),
            requested_end: row.get("requested_end"),
            window_count: row.get("window_count"),
            windows_processed: row.get("windows_processed"),
            windows_failed: row.get("windows_failed"),
            records_fetched: row.get("records_fetched"),
            records_saved: row.get("records_saved"),
            records_updated: row.get("records_updated"),
            records_rejected: row.get("records_rejected"),
            window_outcomes: row.get("window_outcomes"),
            error_details: row.get("error_details"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            duration_seconds: row.get("duration_seconds"),
        }
    }

    // ===============================
    // VALIDATION FAILURE SINK
    // ===============================

    pub async fn record_validation_failure(&self, failure: &ValidationFailure) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO validation_failures
            (source, entity, natural_key, reason, payload_excerpt, occurred_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(failure.source.as_str())
        .bind(failure.entity.as_str())
        .bind(&failure.natural_key)
        .bind(&failure.reason)
        .bind(&failure.payload_excerpt)
        .bind(failure.occurred_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    pub async fn validation_failure_count(&self, source: Option<Source>) -> Result<i64> {
        let count = match source {
            Some(source) => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM validation_failures WHERE source = ?",
                )
                .bind(source.as_str())
                .fetch_one(&*self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM validation_failures")
                    .fetch_one(&*self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    /// Retention hook: drop failure rows older than `cutoff`. Explicit only.
    pub async fn prune_validation_failures(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM validation_failures WHERE occurred_at < ?")
            .bind(cutoff)
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ===============================
    // PER-SOURCE FRESHNESS VIEW
    // ===============================

    /// Upsert the single-row-per-source freshness view after a run.
    ///
    /// Consumed by dashboards and the stale-data warning; the engine itself
    /// never reads it back.
    pub async fn update_sync_status(&self, report: &SyncReport) -> Result<()> {
        let now = Utc::now();
        let existing = sqlx::query(
            "SELECT error_count, first_error_at, last_successful_sync FROM sync_status WHERE source_name = ?",
        )
        .bind(report.source.as_str())
        .fetch_optional(&*self.pool)
        .await?;

        let prior_error_count: i64 = existing
            .as_ref()
            .map(|r| r.get("error_count"))
            .unwrap_or(0);
        let prior_first_error: Option<DateTime<Utc>> =
            existing.as_ref().and_then(|r| r.get("first_error_at"));
        let prior_success: Option<DateTime<Utc>> =
            existing.as_ref().and_then(|r| r.get("last_successful_sync"));

        let succeeded = matches!(report.status, RunStatus::Success | RunStatus::Partial);
        let (
            last_successful_sync,
            error_count,
            first_error_at,
            last_error,
            is_healthy,
            health_score,
            data_lag_hours,
        ) = if succeeded {
            let score: i64 = if report.status == RunStatus::Success { 100 } else { 80 };
            (Some(report.completed_at), 0i64, None, None, true, score, 0.0)
        } else {
            let error_count = prior_error_count + 1;
            // Health degrades with consecutive failures.
            let health_score: i64 = if error_count >= 5 {
                0
            } else if error_count >= 3 {
                30
            } else {
                (100 - error_count * 20).max(0)
            };
            let is_healthy = health_score >= 50;
            let lag_hours = prior_success
                .map(|t| (now - t).num_minutes() as f64 / 60.0)
                .unwrap_or(0.0);
            let last_error = report
                .errors
                .first()
                .map(|e| e.error.clone())
                .unwrap_or_else(|| "sync failed".to_string());
            (
                prior_success,
                error_count,
                prior_first_error.or(Some(now)),
                Some(last_error),
                is_healthy,
                health_score,
                lag_hours,
            )
        };

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO sync_status
            (source_name, source_type, last_sync_attempt, last_successful_sync, sync_status,
             sync_duration_seconds, records_synced, records_failed, error_count, first_error_at,
             last_error, is_healthy, health_score, data_lag_hours, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(report.source.as_str())
        .bind(report.source.category())
        .bind(report.started_at)
        .bind(last_successful_sync)
        .bind(if succeeded {
            report.status.as_str()
        } else {
            "failed"
        })
        .bind(report.duration_seconds)
        .bind((report.saved + report.updated) as i64)
        .bind(report.rejected as i64)
        .bind(error_count)
        .bind(first_error_at)
        .bind(last_error)
        .bind(is_healthy)
        .bind(health_score)
        .bind(data_lag_hours)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    pub async fn sync_status(&self) -> Result<Vec<SyncStatusRow>> {
        let rows = sqlx::query("SELECT * FROM sync_status ORDER BY source_name")
            .fetch_all(&*self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| SyncStatusRow {
                source_name: row.get("source_name"),
                source_type: row.get("source_type"),
                last_sync_attempt: row.get("last_sync_attempt"),
                last_successful_sync: row.get("last_successful_sync"),
                sync_status: row.get("sync_status"),
                records_synced: row.get("records_synced"),
                records_failed: row.get("records_failed"),
                error_count: row.get("error_count"),
                last_error: row.get("last_error"),
                is_healthy: row.get("is_healthy"),
                health_score: row.get("health_score"),
                data_lag_hours: row.get("data_lag_hours"),
            })
            .collect())
    }
}

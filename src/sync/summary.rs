//! Run summaries
//!
//! The structured results callers rely on. Field names on `SyncReport` are a
//! stable surface consumed by scripts, HTTP handlers and scheduled jobs; do
//! not rename them.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::source::Source;

/// What kind of run produced a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// Recent-range sync, newest windows first.
    Incremental,
    /// Explicit historical backfill, oldest windows first.
    Backfill,
    /// Daily snapshot accumulation for current-state-only sources.
    Snapshot,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Incremental => "incremental",
            SyncType::Backfill => "backfill",
            SyncType::Snapshot => "snapshot",
        }
    }
}

/// Terminal status of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    /// Success if nothing failed, failed if nothing succeeded, else partial.
    pub fn from_counts(processed: usize, failed: usize) -> Self {
        if failed == 0 {
            RunStatus::Success
        } else if processed == 0 {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }
}

/// One entry in a report's error list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowError {
    /// 1-based position in the planned sequence.
    pub window: usize,
    pub error: String,
}

/// Everything that happened inside one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowOutcome {
    pub window: usize,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub success: bool,
    pub fetched: u64,
    pub saved: u64,
    pub updated: u64,
    pub rejected: u64,
    /// Extra attempts consumed by rate-limit signals that later succeeded.
    pub rate_limit_retries: u32,
    pub error: Option<String>,
}

impl WindowOutcome {
    pub fn failed(
        window: usize,
        start_date: NaiveDate,
        end_date: NaiveDate,
        error: String,
        rate_limit_retries: u32,
    ) -> Self {
        Self {
            window,
            start_date,
            end_date,
            success: false,
            fetched: 0,
            saved: 0,
            updated: 0,
            rejected: 0,
            rate_limit_retries,
            error: Some(error),
        }
    }
}

/// Structured result of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub source: Source,
    pub sync_type: SyncType,
    pub status: RunStatus,
    pub success: bool,
    /// Windows that completed without error.
    pub windows_processed: usize,
    pub windows_failed: usize,
    pub total_records: u64,
    pub saved: u64,
    pub updated: u64,
    pub rejected: u64,
    pub duration_seconds: f64,
    pub errors: Vec<WindowError>,
    /// Per-window detail, in traversal order.
    pub windows: Vec<WindowOutcome>,
    pub requested_start: NaiveDate,
    pub requested_end: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// True when the run was aborted between windows.
    pub cancelled: bool,
}

impl SyncReport {
    /// Aggregate per-window outcomes into the caller-facing summary.
    pub fn from_outcomes(
        run_id: Uuid,
        source: Source,
        sync_type: SyncType,
        requested_start: NaiveDate,
        requested_end: NaiveDate,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        outcomes: Vec<WindowOutcome>,
        cancelled: bool,
    ) -> Self {
        let windows_processed = outcomes.iter().filter(|o| o.success).count();
        let windows_failed = outcomes.iter().filter(|o| !o.success).count();
        let errors = outcomes
            .iter()
            .filter_map(|o| {
                o.error.as_ref().map(|e| WindowError {
                    window: o.window,
                    error: e.clone(),
                })
            })
            .collect();
        let status = RunStatus::from_counts(windows_processed, windows_failed);

        Self {
            run_id,
            source,
            sync_type,
            status,
            success: status == RunStatus::Success,
            windows_processed,
            windows_failed,
            total_records: outcomes.iter().map(|o| o.fetched).sum(),
            saved: outcomes.iter().map(|o| o.saved).sum(),
            updated: outcomes.iter().map(|o| o.updated).sum(),
            rejected: outcomes.iter().map(|o| o.rejected).sum(),
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1_000.0,
            errors,
            windows: outcomes,
            requested_start,
            requested_end,
            started_at,
            completed_at,
            cancelled,
        }
    }
}

/// Aggregate of one `sync_all` invocation across sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutReport {
    pub success: bool,
    pub sources_synced: usize,
    pub total_sources: usize,
    pub total_duration_seconds: f64,
    /// Per-source reports keyed by source name; sources whose run could not
    /// even start (planning or ledger failure) appear in `failures` instead.
    pub results: BTreeMap<String, SyncReport>,
    pub failures: BTreeMap<String, String>,
}

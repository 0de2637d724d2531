//! Per-source sync orchestration
//!
//! Drives one source end to end: windows are processed strictly in planned
//! order, each failure is contained to its window, and every run leaves
//! exactly one ledger row behind. Partial progress is durable; re-running
//! the same range is safe because the store upsert is idempotent.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::connector::{Connector, ConnectorError};
use crate::domain::record::RawRecord;
use crate::domain::source::SourceProfile;
use crate::domain::validation::{ValidationFailure, ValidationGate};
use crate::domain::window::SyncWindow;
use crate::infrastructure::run_ledger::RunLedger;
use crate::infrastructure::upsert_store::UpsertStore;
use crate::sync::normalizer::Normalizer;
use crate::sync::summary::{SyncReport, SyncType, WindowOutcome};

/// Orchestrates the window sequence of a single source.
pub struct SyncOrchestrator {
    connector: Arc<dyn Connector>,
    store: UpsertStore,
    ledger: RunLedger,
    profile: SourceProfile,
    gate: ValidationGate,
    /// Request quota on top of inter-window pacing.
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    pub fn new(
        connector: Arc<dyn Connector>,
        store: UpsertStore,
        ledger: RunLedger,
        profile: SourceProfile,
    ) -> Self {
        let rps = NonZeroU32::new(profile.max_requests_per_second).unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_second(rps));

        Self {
            connector,
            store,
            ledger,
            profile,
            gate: ValidationGate::default(),
            limiter,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort the run between windows; the in-flight window finishes
    /// naturally and its records stay upserted.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Process every planned window in order and append one ledger row.
    ///
    /// Window-level errors never surface as `Err`; they are captured into
    /// the report. `Err` means the run could not be recorded at all.
    pub async fn run(
        &self,
        plan: Vec<SyncWindow>,
        sync_type: SyncType,
        pacing_delay: Duration,
    ) -> Result<SyncReport> {
        let source = self.connector.source();
        let requested_start = plan.iter().map(|w| w.start_date).min();
        let requested_end = plan.iter().map(|w| w.end_date).max();
        let (requested_start, requested_end) = match (requested_start, requested_end) {
            (Some(s), Some(e)) => (s, e),
            _ => {
                let today = Utc::now().date_naive();
                (today, today)
            }
        };

        let run_id = self
            .ledger
            .open_run(source, sync_type, requested_start, requested_end, plan.len())
            .await
            .context("failed to open sync log")?;
        let started_at = Utc::now();

        info!(
            run_id = %run_id,
            source = %source,
            windows = plan.len(),
            range = %format!("{requested_start}..{requested_end}"),
            "sync run starting"
        );

        let mut outcomes = Vec::with_capacity(plan.len());
        let mut cancelled = false;

        for (idx, window) in plan.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(run_id = %run_id, source = %source, "sync run cancelled between windows");
                cancelled = true;
                break;
            }
            if idx > 0 {
                sleep(jittered(pacing_delay)).await;
            }

            let outcome = self.process_window(idx + 1, window, pacing_delay).await;
            if let Some(err) = &outcome.error {
                warn!(
                    run_id = %run_id,
                    source = %source,
                    window = %window,
                    error = %err,
                    "window failed; continuing with next window"
                );
            }
            outcomes.push(outcome);
        }

        let report = SyncReport::from_outcomes(
            run_id,
            source,
            sync_type,
            requested_start,
            requested_end,
            started_at,
            Utc::now(),
            outcomes,
            cancelled,
        );

        self.ledger
            .finalize_run(run_id, &report)
            .await
            .context("failed to finalize sync log")?;
        // Freshness tracking must never break the sync itself.
        if let Err(e) = self.ledger.update_sync_status(&report).await {
            warn!(source = %source, error = %e, "failed to update sync status row");
        }

        info!(
            run_id = %run_id,
            source = %source,
            status = report.status.as_str(),
            windows_processed = report.windows_processed,
            windows_failed = report.windows_failed,
            saved = report.saved,
            updated = report.updated,
            rejected = report.rejected,
            "sync run finished"
        );
        Ok(report)
    }

    /// Snapshot-accumulate mode: one fetch of current state, stamped with
    /// today's date so history accretes across days and re-runs within a
    /// day replace idempotently. No window concept at all.
    pub async fn run_snapshot(&self) -> Result<SyncReport> {
        let source = self.connector.source();
        let today = Utc::now().date_naive();
        let requested_end = today.succ_opt().unwrap_or(today);

        let run_id = self
            .ledger
            .open_run(source, SyncType::Snapshot, today, requested_end, 1)
            .await
            .context("failed to open sync log")?;
        let started_at = Utc::now();
        info!(run_id = %run_id, source = %source, snapshot_date = %today, "snapshot sync starting");

        let fetched = self
            .fetch_with_retry(
                || self.connector.fetch_snapshot(),
                self.profile.pacing_delay(),
            )
            .await;

        let outcome = match fetched {
            Ok((records, rate_limit_retries)) => {
                self.persist_window(1, today, requested_end, records, Some(today), rate_limit_retries)
                    .await
            }
            Err((message, rate_limit_retries)) => {
                WindowOutcome::failed(1, today, requested_end, message, rate_limit_retries)
            }
        };

        let report = SyncReport::from_outcomes(
            run_id,
            source,
            SyncType::Snapshot,
            today,
            requested_end,
            started_at,
            Utc::now(),
            vec![outcome],
            false,
        );

        self.ledger
            .finalize_run(run_id, &report)
            .await
            .context("failed to finalize sync log")?;
        if let Err(e) = self.ledger.update_sync_status(&report).await {
            warn!(source = %source, error = %e, "failed to update sync status row");
        }
        Ok(report)
    }

    async fn process_window(
        &self,
        number: usize,
        window: &SyncWindow,
        pacing_delay: Duration,
    ) -> WindowOutcome {
        debug!(window = %window, "processing window {number}");

        let fetched = self
            .fetch_with_retry(|| self.connector.fetch(window), pacing_delay)
            .await;

        match fetched {
            Ok((records, rate_limit_retries)) => {
                self.persist_window(
                    number,
                    window.start_date,
                    window.end_date,
                    records,
                    None,
                    rate_limit_retries,
                )
                .await
            }
            Err((message, rate_limit_retries)) => WindowOutcome::failed(
                number,
                window.start_date,
                window.end_date,
                message,
                rate_limit_retries,
            ),
        }
    }

    /// Fetch with the per-call timeout and the single rate-limit retry.
    ///
    /// A first rate-limit signal waits out the pacing delay (or the source's
    /// hint, whichever is longer) and retries once; a second signal becomes
    /// the window's failure so a throttled backfill cannot stall unbounded.
    async fn fetch_with_retry<F, Fut>(
        &self,
        fetch: F,
        pacing_delay: Duration,
    ) -> Result<(Vec<RawRecord>, u32), (String, u32)>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<RawRecord>, ConnectorError>>,
    {
        let mut rate_limit_retries = 0u32;
        loop {
            self.limiter.until_ready().await;

            let attempt = tokio::time::timeout(self.profile.request_timeout(), fetch()).await;
            match attempt {
                Err(_elapsed) => {
                    // A per-call timeout is just another connector failure.
                    return Err((
                        format!(
                            "transient_error: request timed out after {}s",
                            self.profile.request_timeout_seconds
                        ),
                        rate_limit_retries,
                    ));
                }
                Ok(Ok(records)) => return Ok((records, rate_limit_retries)),
                Ok(Err(ConnectorError::RateLimited { retry_after })) if rate_limit_retries == 0 => {
                    rate_limit_retries += 1;
                    let wait = retry_after.unwrap_or(pacing_delay).max(pacing_delay);
                    warn!(
                        source = %self.connector.source(),
                        wait_ms = wait.as_millis() as u64,
                        "rate limited; pausing before single retry"
                    );
                    sleep(jittered(wait)).await;
                }
                Ok(Err(err)) => {
                    if err.is_auth() {
                        // Likely poisons every later window of this source,
                        // but windows are still attempted uniformly.
                        error!(source = %self.connector.source(), error = %err, "authentication failure");
                    }
                    return Err((err.to_string(), rate_limit_retries));
                }
            }
        }
    }

    /// Normalize, validate and upsert one window's records.
    async fn persist_window(
        &self,
        number: usize,
        start_date: NaiveDate,
        end_date: NaiveDate,
        records: Vec<RawRecord>,
        snapshot_hint: Option<NaiveDate>,
        rate_limit_retries: u32,
    ) -> WindowOutcome {
        let source = self.connector.source();
        let fetched_at = Utc::now();
        let today = fetched_at.date_naive();
        let fetched = records.len() as u64;

        let mut accepted = Vec::with_capacity(records.len());
        let mut rejected = 0u64;
        for raw in &records {
            let canonical = match Normalizer::normalize(source, raw, fetched_at, snapshot_hint) {
                Ok(rec) => rec,
                Err(reason) => {
                    rejected += 1;
                    self.sink_failure(ValidationFailure::new(
                        source,
                        raw.entity,
                        Normalizer::best_effort_key(&raw.payload),
                        reason.to_string(),
                        &raw.payload,
                    ))
                    .await;
                    continue;
                }
            };
            match self.gate.validate(&canonical, today) {
                Ok(()) => accepted.push(canonical),
                Err(reason) => {
                    rejected += 1;
                    self.sink_failure(ValidationFailure::new(
                        source,
                        canonical.entity,
                        canonical.natural_key.as_storage_key(),
                        reason.to_string(),
                        &canonical.attributes,
                    ))
                    .await;
                }
            }
        }

        match self.store.upsert_batch(&accepted).await {
            Ok(outcome) => {
                debug!(
                    window = number,
                    fetched,
                    saved = outcome.saved,
                    updated = outcome.updated,
                    rejected,
                    "window persisted"
                );
                WindowOutcome {
                    window: number,
                    start_date,
                    end_date,
                    success: true,
                    fetched,
                    saved: outcome.saved,
                    updated: outcome.updated,
                    rejected,
                    rate_limit_retries,
                    error: None,
                }
            }
            // A store error fails this window only; later windows still run.
            Err(e) => WindowOutcome::failed(
                number,
                start_date,
                end_date,
                format!("store_error: {e}"),
                rate_limit_retries,
            ),
        }
    }

    /// Rejected records must never abort the pipeline, even when the sink
    /// write itself fails.
    async fn sink_failure(&self, failure: ValidationFailure) {
        if let Err(e) = self.ledger.record_validation_failure(&failure).await {
            warn!(
                source = %failure.source,
                reason = %failure.reason,
                error = %e,
                "failed to record validation failure"
            );
        }
    }
}

/// Small additive jitter keeps many paced loops from aligning their bursts.
fn jittered(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let jitter_ms = fastrand::u64(0..=(base.as_millis() as u64 / 10).max(1));
    base + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::EntityKind;
    use crate::domain::source::{Source, SourceProfile, TraversalOrder};
    use crate::domain::window::WindowPlanner;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use crate::sync::summary::RunStatus;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Connector double whose behavior is scripted per call.
    struct ScriptedConnector {
        source: Source,
        script: Mutex<Vec<Result<Vec<RawRecord>, ConnectorError>>>,
    }

    impl ScriptedConnector {
        fn new(source: Source, script: Vec<Result<Vec<RawRecord>, ConnectorError>>) -> Self {
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

    async fn harness() -> (tempfile::TempDir, UpsertStore, RunLedger) {
        let dir = tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("sync.db").display());
        let db = DatabaseConnection::new(&url).await.unwrap();
        db.migrate().await.unwrap();
        let store = UpsertStore::new(db.pool().clone());
        let ledger = RunLedger::new(db.pool().clone());
        (dir, store, ledger)
    }

    fn fast_profile(source: Source) -> SourceProfile {
        let mut profile = SourceProfile::for_source(source);
        profile.pacing_delay_ms = 0;
        profile.request_timeout_seconds = 5;
        profile.max_requests_per_second = 1_000;
        profile
    }

    fn orders(ids: &[u64]) -> Vec<RawRecord> {
        ids.iter()
            .map(|id| {
                RawRecord::new(
                    EntityKind::Order,
                    json!({"id": id, "total_price": 10.0, "created_at": "2025-01-02T00:00:00Z"}),
                )
            })
            .collect()
    }

    fn plan_days(source: Source, days: i64, window_days: u32) -> Vec<SyncWindow> {
        let end: NaiveDate = "2025-02-10".parse().unwrap();
        let start = end - chrono::Duration::days(days);
        WindowPlanner::plan(
            source,
            start,
            end,
            window_days,
            None,
            TraversalOrder::OldestFirst,
            end,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn middle_window_failure_is_isolated() {
        let (_dir, store, ledger) = harness().await;
        let connector = Arc::new(ScriptedConnector::new(
            Source::Ecommerce,
            vec![
                Ok(orders(&[1, 2])),
                Err(ConnectorError::Transient(String::new())),
                Ok(orders(&[3])),
            ],
        ));
        let orch = SyncOrchestrator::new(
            connector,
            store.clone(),
            ledger.clone(),
            fast_profile(Source::Ecommerce),
        );

        let plan = plan_days(Source::Ecommerce, 40, 14);
        assert_eq!(plan.len(), 3);
        let report = orch
            .run(plan, SyncType::Backfill, Duration::ZERO)
            .await
            .unwrap();

        assert!(!report.success);
        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(report.windows_processed, 2);
        assert_eq!(report.windows_failed, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].window, 2);
        assert_eq!(report.errors[0].error, "transient_error");
        // Successful windows' records are durable despite the failure.
        assert_eq!(store.count_records(None).await.unwrap(), 3);

        let row = ledger.get_run(report.run_id).await.unwrap().unwrap();
        assert_eq!(row.status, "partial");
        assert_eq!(row.windows_failed, 1);
    }

    #[tokio::test]
    async fn rate_limit_retry_once_then_succeed() {
        let (_dir, store, ledger) = harness().await;
        let connector = Arc::new(ScriptedConnector::new(
            Source::Ecommerce,
            vec![
                Err(ConnectorError::RateLimited { retry_after: None }),
                Ok(orders(&[1])),
            ],
        ));
        let orch =
            SyncOrchestrator::new(connector, store, ledger, fast_profile(Source::Ecommerce));

        let plan = plan_days(Source::Ecommerce, 10, 30);
        let report = orch
            .run(plan, SyncType::Incremental, Duration::ZERO)
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.windows_processed, 1);
        assert!(report.errors.is_empty());
        assert_eq!(report.windows[0].rate_limit_retries, 1);
    }

    #[tokio::test]
    async fn second_rate_limit_fails_the_window() {
        let (_dir, store, ledger) = harness().await;
        let connector = Arc::new(ScriptedConnector::new(
            Source::Ecommerce,
            vec![
                Err(ConnectorError::RateLimited { retry_after: None }),
                Err(ConnectorError::RateLimited { retry_after: None }),
            ],
        ));
        let orch =
            SyncOrchestrator::new(connector, store, ledger, fast_profile(Source::Ecommerce));

        let plan = plan_days(Source::Ecommerce, 10, 30);
        let report = orch
            .run(plan, SyncType::Incremental, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].error, "rate_limited");
    }

    #[tokio::test]
    async fn validation_rejects_are_sunk_not_fatal() {
        let (_dir, store, ledger) = harness().await;
        let mut records = orders(&[1, 2]);
        // Missing id: rejected at normalization.
        records.push(RawRecord::new(EntityKind::Order, json!({"total_price": 4.0})));
        // Negative metric: rejected by the gate.
        records.push(RawRecord::new(
            EntityKind::Order,
            json!({"id": 99, "total_price": -4.0}),
        ));

        let connector = Arc::new(ScriptedConnector::new(Source::Ecommerce, vec![Ok(records)]));
        let orch = SyncOrchestrator::new(
            connector,
            store.clone(),
            ledger.clone(),
            fast_profile(Source::Ecommerce),
        );

        let plan = plan_days(Source::Ecommerce, 10, 30);
        let report = orch
            .run(plan, SyncType::Incremental, Duration::ZERO)
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.total_records, 4);
        assert_eq!(report.saved, 2);
        assert_eq!(report.rejected, 2);
        assert_eq!(store.count_records(None).await.unwrap(), 2);
        assert_eq!(ledger.validation_failure_count(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rerun_of_same_range_is_idempotent() {
        let (_dir, store, ledger) = harness().await;
        let make_connector = || {
            Arc::new(ScriptedConnector::new(
                Source::Ecommerce,
                vec![Ok(orders(&[1, 2, 3]))],
            ))
        };

        let orch = SyncOrchestrator::new(
            make_connector(),
            store.clone(),
            ledger.clone(),
            fast_profile(Source::Ecommerce),
        );
        let first = orch
            .run(plan_days(Source::Ecommerce, 10, 30), SyncType::Incremental, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(first.saved, 3);
        assert_eq!(first.updated, 0);

        let orch = SyncOrchestrator::new(
            make_connector(),
            store.clone(),
            ledger,
            fast_profile(Source::Ecommerce),
        );
        let second = orch
            .run(plan_days(Source::Ecommerce, 10, 30), SyncType::Incremental, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(second.saved, 0);
        assert_eq!(second.updated, 3);
        assert_eq!(store.count_records(None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn auth_error_fails_windows_without_aborting_run() {
        let (_dir, store, ledger) = harness().await;
        let connector = Arc::new(ScriptedConnector::new(
            Source::Ecommerce,
            vec![
                Err(ConnectorError::Auth("token expired".into())),
                Ok(orders(&[5])),
                Err(ConnectorError::Auth("token expired".into())),
            ],
        ));
        let orch = SyncOrchestrator::new(
            connector,
            store.clone(),
            ledger,
            fast_profile(Source::Ecommerce),
        );

        let report = orch
            .run(plan_days(Source::Ecommerce, 40, 14), SyncType::Backfill, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(report.windows_failed, 2);
        assert_eq!(report.windows_processed, 1);
        assert_eq!(store.count_records(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_between_windows_and_keeps_progress() {
        let (_dir, store, ledger) = harness().await;
        let token = CancellationToken::new();
        // Cancel before the run even starts: no window is attempted.
        token.cancel();

        let connector = Arc::new(ScriptedConnector::new(
            Source::Ecommerce,
            vec![Ok(orders(&[1]))],
        ));
        let orch = SyncOrchestrator::new(
            connector,
            store.clone(),
            ledger.clone(),
            fast_profile(Source::Ecommerce),
        )
        .with_cancellation(token);

        let report = orch
            .run(plan_days(Source::Ecommerce, 40, 14), SyncType::Backfill, Duration::ZERO)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(report.windows.is_empty());
        assert_eq!(store.count_records(None).await.unwrap(), 0);
        // The ledger row still exists and is finalized.
        let row = ledger.get_run(report.run_id).await.unwrap().unwrap();
        assert_ne!(row.status, "running");
        assert!(row.error_details.unwrap().contains("\"cancelled\":true"));
    }

    #[tokio::test]
    async fn snapshot_mode_accumulates_daily_rows() {
        let (_dir, store, ledger) = harness().await;
        let statuses = vec![
            RawRecord::new(
                EntityKind::ProductStatus,
                json!({"product_id": "sku-1", "status": "approved"}),
            ),
            RawRecord::new(
                EntityKind::ProductStatus,
                json!({"product_id": "sku-2", "status": "disapproved"}),
            ),
        ];
        let connector = Arc::new(ScriptedConnector::new(
            Source::ShoppingFeed,
            vec![Ok(statuses.clone()), Ok(statuses)],
        ));
        let orch = SyncOrchestrator::new(
            connector,
            store.clone(),
            ledger,
            fast_profile(Source::ShoppingFeed),
        );

        let first = orch.run_snapshot().await.unwrap();
        assert!(first.success);
        assert_eq!(first.saved, 2);

        // Same-day re-run replaces the same keys instead of duplicating.
        let second = orch.run_snapshot().await.unwrap();
        assert_eq!(second.saved, 0);
        assert_eq!(second.updated, 2);
        assert_eq!(store.count_records(None).await.unwrap(), 2);
    }
}

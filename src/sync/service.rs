//! Full-source-set orchestration
//!
//! Facade owning the connector registry and shared storage handles. Each
//! source runs as its own pipeline; one source's total failure never blocks
//! another, and the aggregate report carries `sources_synced` out of
//! `total_sources`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::connector::Connector;
use crate::domain::source::{Source, SourceProfile, SyncMode, TraversalOrder};
use crate::domain::window::WindowPlanner;
use crate::infrastructure::run_ledger::RunLedger;
use crate::infrastructure::upsert_store::UpsertStore;
use crate::sync::orchestrator::SyncOrchestrator;
use crate::sync::summary::{FanOutReport, SyncReport, SyncType};

/// Caller-overridable knobs for one backfill invocation. Anything left
/// `None` falls back to the source profile's safe default.
#[derive(Debug, Clone, Default)]
pub struct BackfillOptions {
    /// Range size in months (30-day months, the conventional API unit).
    pub months: Option<u32>,
    /// Range size in days; wins over `months` when both are set.
    pub days: Option<u32>,
    /// Per-call window size in days.
    pub window_days: Option<u32>,
    /// Delay between windows.
    pub delay: Option<Duration>,
}

/// Registry-driven sync facade over every configured source.
pub struct SyncService {
    connectors: BTreeMap<Source, Arc<dyn Connector>>,
    profiles: BTreeMap<Source, SourceProfile>,
    store: UpsertStore,
    ledger: RunLedger,
    cancel: CancellationToken,
}

impl SyncService {
    pub fn new(store: UpsertStore, ledger: RunLedger) -> Self {
        Self {
            connectors: BTreeMap::new(),
            profiles: BTreeMap::new(),
            store,
            ledger,
            cancel: CancellationToken::new(),
        }
    }

    /// Register a connector; replaces any previous connector for the source.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.source(), connector);
    }

    /// Override the built-in profile for one source.
    pub fn set_profile(&mut self, source: Source, profile: SourceProfile) {
        self.profiles.insert(source, profile);
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn registered_sources(&self) -> Vec<Source> {
        self.connectors.keys().copied().collect()
    }

    pub fn profile(&self, source: Source) -> SourceProfile {
        self.profiles
            .get(&source)
            .cloned()
            .unwrap_or_else(|| SourceProfile::for_source(source))
    }

    fn orchestrator(&self, source: Source) -> Result<SyncOrchestrator> {
        let connector = self
            .connectors
            .get(&source)
            .cloned()
            .ok_or_else(|| anyhow!("no connector registered for source {source}"))?;
        Ok(SyncOrchestrator::new(
            connector,
            self.store.clone(),
            self.ledger.clone(),
            self.profile(source),
        )
        .with_cancellation(self.cancel.child_token()))
    }

    /// Latest date worth requesting from a source, honoring its lag.
    fn range_end(&self, source: Source, today: NaiveDate) -> NaiveDate {
        let lag = self.profile(source).freshness_lag_days;
        let last_full_day = today - ChronoDuration::days(i64::from(lag));
        last_full_day.succ_opt().unwrap_or(last_full_day)
    }

    /// Ad-hoc sync of the most recent `days`, newest windows first so an
    /// interrupted run leaves the freshest data synced.
    pub async fn sync_source(&self, source: Source, days: u32) -> Result<SyncReport> {
        let profile = self.profile(source);
        if profile.mode == SyncMode::SnapshotAccumulate {
            return self.snapshot(source).await;
        }

        let today = Utc::now().date_naive();
        let end = self.range_end(source, today);
        let start = end - ChronoDuration::days(i64::from(days.max(1)));
        let plan = WindowPlanner::plan(
            source,
            start,
            end,
            profile.max_window_days,
            profile.max_history_days,
            TraversalOrder::NewestFirst,
            today,
        )?;

        self.orchestrator(source)?
            .run(plan, SyncType::Incremental, profile.pacing_delay())
            .await
    }

    /// Explicit historical backfill, oldest windows first so a partial run
    /// leaves a contiguous synced prefix to resume from.
    pub async fn backfill(&self, source: Source, opts: BackfillOptions) -> Result<SyncReport> {
        let profile = self.profile(source);
        if profile.mode == SyncMode::SnapshotAccumulate {
            // No historical API: the only backfill is today's snapshot.
            return self.snapshot(source).await;
        }

        let days = opts
            .days
            .or_else(|| opts.months.map(|m| m * 30))
            .unwrap_or(365);
        let window_days = opts.window_days.unwrap_or(profile.max_window_days);
        let delay = opts.delay.unwrap_or_else(|| profile.pacing_delay());

        let today = Utc::now().date_naive();
        let end = self.range_end(source, today);
        let start = end - ChronoDuration::days(i64::from(days.max(1)));
        let plan = WindowPlanner::plan(
            source,
            start,
            end,
            window_days.min(profile.max_window_days),
            profile.max_history_days,
            TraversalOrder::OldestFirst,
            today,
        )?;

        info!(
            source = %source,
            windows = plan.len(),
            window_days,
            delay_ms = delay.as_millis() as u64,
            "backfill planned"
        );
        self.orchestrator(source)?
            .run(plan, SyncType::Backfill, delay)
            .await
    }

    /// Daily snapshot accumulation for current-state-only sources.
    pub async fn snapshot(&self, source: Source) -> Result<SyncReport> {
        self.orchestrator(source)?.run_snapshot().await
    }

    /// Sync every registered source over the recent range. Sources run as
    /// independent pipelines; per-source failures land in the aggregate
    /// report instead of propagating.
    pub async fn sync_all(&self, days: u32) -> FanOutReport {
        let started = std::time::Instant::now();
        let sources = self.registered_sources();
        let total_sources = sources.len();
        info!(total_sources, days, "starting full-source sync");

        let runs = sources.iter().map(|&source| async move {
            let result = self.sync_source(source, days).await;
            (source, result)
        });
        let outcomes = futures::future::join_all(runs).await;

        let mut results = BTreeMap::new();
        let mut failures = BTreeMap::new();
        let mut sources_synced = 0usize;
        for (source, outcome) in outcomes {
            match outcome {
                Ok(report) => {
                    if report.success {
                        sources_synced += 1;
                    }
                    results.insert(source.as_str().to_string(), report);
                }
                Err(e) => {
                    warn!(source = %source, error = %e, "source sync could not run");
                    failures.insert(source.as_str().to_string(), e.to_string());
                }
            }
        }

        info!(
            sources_synced,
            total_sources,
            "full-source sync complete"
        );
        FanOutReport {
            success: sources_synced == total_sources,
            sources_synced,
            total_sources,
            total_duration_seconds: started.elapsed().as_secs_f64(),
            results,
            failures,
        }
    }
}

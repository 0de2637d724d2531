//! Operational entry point for the sync engine
//!
//! Wires replay connectors over local NDJSON exports into the engine and
//! exposes the day-to-day commands: recent-range sync, historical backfill,
//! daily snapshot, run status and retention pruning.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use storefront_sync::domain::source::Source;
use storefront_sync::infrastructure::config::{AppConfig, ConfigManager};
use storefront_sync::infrastructure::logging::init_logging_with_config;
use storefront_sync::sync::summary::RunStatus;
use storefront_sync::sync::BackfillOptions;
use storefront_sync::{
    DatabaseConnection, ReplayConnector, RunLedger, SyncReport, SyncService, UpsertStore,
};

const USAGE: &str = "\
storefront-sync <command> [options]

Commands:
  sync-all   [--days N] [--replay-dir DIR]
  backfill   <source> [--months N | --days N] [--window-days N] [--delay SECS] [--replay-dir DIR]
  snapshot   <source> [--replay-dir DIR]
  status     [--limit N]
  prune      --older-than-days N
  init-config

Common options:
  --config PATH     config file location
  --database URL    sqlite database URL override
";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().cloned() else {
        eprintln!("{USAGE}");
        return Ok(ExitCode::FAILURE);
    };
    let opts = CliOptions::parse(&args[1..])?;

    let manager = match &opts.config_path {
        Some(path) => ConfigManager::with_path(path.clone().into()),
        None => ConfigManager::new()?,
    };
    let config = manager
        .load_config()
        .context("failed to load configuration")?;
    // Double initialization only happens in tests; ignore it.
    let _ = init_logging_with_config(&config.logging);

    match command.as_str() {
        "sync-all" => {
            let service = build_service(&config, &opts, &Source::ALL).await?;
            let days = opts.days.unwrap_or(config.sync.default_range_days);
            let report = service.sync_all(days).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        "backfill" => {
            let source = opts.require_source()?;
            let service = build_service(&config, &opts, &[source]).await?;
            let days = opts
                .days
                .or_else(|| opts.months.map(|m| m * 30))
                .unwrap_or(config.sync.default_backfill_days);
            let report = service
                .backfill(
                    source,
                    BackfillOptions {
                        months: None,
                        days: Some(days),
                        window_days: opts.window_days,
                        delay: opts.delay_seconds.map(|s| Duration::from_secs_f64(s.max(0.0))),
                    },
                )
                .await?;
            finish_single(report)
        }
        "snapshot" => {
            let source = opts.require_source()?;
            let service = build_service(&config, &opts, &[source]).await?;
            let report = service.snapshot(source).await?;
            finish_single(report)
        }
        "status" => {
            let (_store, ledger) = open_storage(&config, &opts).await?;
            let limit = i64::from(opts.limit.unwrap_or(10));
            let statuses = ledger.sync_status().await?;
            for row in &statuses {
                println!(
                    "{:<16} {:<10} healthy={} score={} errors={} last_error={}",
                    row.source_name,
                    row.sync_status.as_deref().unwrap_or("never"),
                    row.is_healthy,
                    row.health_score,
                    row.error_count,
                    row.last_error.as_deref().unwrap_or("-"),
                );
            }
            println!();
            for run in ledger.recent_runs(limit).await? {
                println!(
                    "{} {:<16} {:<11} {:<8} windows={}/{} saved={} updated={} rejected={} {:.2}s",
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.source,
                    run.sync_type,
                    run.status,
                    run.windows_processed,
                    run.window_count,
                    run.records_saved,
                    run.records_updated,
                    run.records_rejected,
                    run.duration_seconds,
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        "prune" => {
            let days = opts
                .older_than_days
                .ok_or_else(|| anyhow!("prune requires --older-than-days"))?;
            let (store, ledger) = open_storage(&config, &opts).await?;
            let cutoff_date = Utc::now().date_naive() - chrono::Duration::days(i64::from(days));
            let cutoff_time = Utc::now() - chrono::Duration::days(i64::from(days));

            let snapshots = store.prune_snapshots_before(cutoff_date).await?;
            let failures = ledger.prune_validation_failures(cutoff_time).await?;
            info!(snapshots, failures, cutoff = %cutoff_date, "retention prune complete");
            println!("pruned {snapshots} snapshot rows and {failures} validation failures older than {cutoff_date}");
            Ok(ExitCode::SUCCESS)
        }
        "init-config" => {
            manager.ensure_config_exists().await?;
            println!("config at {}", manager.config_path().display());
            Ok(ExitCode::SUCCESS)
        }
        other => {
            eprintln!("unknown command: {other}\n\n{USAGE}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn finish_single(report: SyncReport) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(match report.status {
        RunStatus::Success => ExitCode::SUCCESS,
        RunStatus::Partial => ExitCode::from(2),
        RunStatus::Failed => ExitCode::FAILURE,
    })
}

async fn open_storage(config: &AppConfig, opts: &CliOptions) -> Result<(UpsertStore, RunLedger)> {
    let url = match &opts.database_url {
        Some(url) => url.clone(),
        None => config.database.resolve_url()?,
    };
    let db = DatabaseConnection::new(&url).await?;
    db.migrate().await?;
    Ok((
        UpsertStore::new(db.pool().clone()),
        RunLedger::new(db.pool().clone()),
    ))
}

async fn build_service(
    config: &AppConfig,
    opts: &CliOptions,
    sources: &[Source],
) -> Result<SyncService> {
    let (store, ledger) = open_storage(config, opts).await?;
    let replay_dir = opts
        .replay_dir
        .clone()
        .unwrap_or_else(|| "./exports".to_string());

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing the in-flight window before stopping");
            signal_token.cancel();
        }
    });

    let mut service = SyncService::new(store, ledger).with_cancellation(cancel);
    for &source in sources {
        service.set_profile(source, config.sync.profile_for(source));
        service.register(Arc::new(ReplayConnector::new(source, replay_dir.clone())));
    }
    Ok(service)
}

/// Hand-rolled option scanning; the command surface is small enough that a
/// parser dependency would outweigh it.
#[derive(Debug, Default)]
struct CliOptions {
    source: Option<Source>,
    days: Option<u32>,
    months: Option<u32>,
    window_days: Option<u32>,
    delay_seconds: Option<f64>,
    limit: Option<u32>,
    older_than_days: Option<u32>,
    replay_dir: Option<String>,
    config_path: Option<String>,
    database_url: Option<String>,
}

impl CliOptions {
    fn parse(args: &[String]) -> Result<Self> {
        let mut opts = Self::default();
        let mut iter = args.iter().peekable();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--days" => opts.days = Some(parse_value(&mut iter, "--days")?),
                "--months" => opts.months = Some(parse_value(&mut iter, "--months")?),
                "--window-days" => {
                    opts.window_days = Some(parse_value(&mut iter, "--window-days")?);
                }
                "--delay" => opts.delay_seconds = Some(parse_value(&mut iter, "--delay")?),
                "--limit" => opts.limit = Some(parse_value(&mut iter, "--limit")?),
                "--older-than-days" => {
                    opts.older_than_days = Some(parse_value(&mut iter, "--older-than-days")?);
                }
                "--replay-dir" => opts.replay_dir = Some(parse_value(&mut iter, "--replay-dir")?),
                "--config" => opts.config_path = Some(parse_value(&mut iter, "--config")?),
                "--database" => opts.database_url = Some(parse_value(&mut iter, "--database")?),
                flag if flag.starts_with("--") => bail!("unknown option: {flag}"),
                positional => {
                    let source: Source = positional
                        .parse()
                        .map_err(|e: String| anyhow!("{e} (expected a source name)"))?;
                    opts.source = Some(source);
                }
            }
        }
        Ok(opts)
    }

    fn require_source(&self) -> Result<Source> {
        self.source
            .ok_or_else(|| anyhow!("this command requires a source argument"))
    }
}

fn parse_value<'a, T, I>(iter: &mut std::iter::Peekable<I>, flag: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    I: Iterator<Item = &'a String>,
{
    let raw = iter
        .next()
        .ok_or_else(|| anyhow!("{flag} requires a value"))?;
    raw.parse::<T>()
        .map_err(|e| anyhow!("invalid value for {flag}: {e}"))
}

//! Idempotent re-runs and retention, end to end over NDJSON exports

mod common;

use std::time::Duration;

use chrono::Utc;
use common::{fast_profile, storage};
use storefront_sync::domain::source::Source;
use storefront_sync::sync::BackfillOptions;
use storefront_sync::{ReplayConnector, SyncService};

async fn write_exports(dir: &std::path::Path) {
    let today = Utc::now().date_naive();
    let recent = |days: i64| today - chrono::Duration::days(days);

    let orders_dir = dir.join("ecommerce");
    tokio::fs::create_dir_all(&orders_dir).await.unwrap();
    let orders = [
        format!(r#"{{"id": 1001, "total_price": 219.0, "created_at": "{}"}}"#, recent(30)),
        format!(r#"{{"id": 1002, "total_price": 54.5, "created_at": "{}"}}"#, recent(12)),
        format!(r#"{{"id": 1003, "total_price": 12.0, "created_at": "{}"}}"#, recent(2)),
    ];
    tokio::fs::write(orders_dir.join("order.ndjson"), orders.join("\n"))
        .await
        .unwrap();

    let gsc_dir = dir.join("search_console");
    tokio::fs::create_dir_all(&gsc_dir).await.unwrap();
    let queries = [
        format!(
            r#"{{"date": "{}", "query": "basin mixer", "clicks": 7, "impressions": 120}}"#,
            recent(500)
        ),
        format!(
            r#"{{"date": "{}", "query": "basin mixer", "clicks": 9, "impressions": 140}}"#,
            recent(20)
        ),
        format!(
            r#"{{"date": "{}", "query": "shower rail", "clicks": 2, "impressions": 33}}"#,
            recent(10)
        ),
    ];
    tokio::fs::write(gsc_dir.join("search_query.ndjson"), queries.join("\n"))
        .await
        .unwrap();
}

fn backfill_opts(days: u32, window_days: u32) -> BackfillOptions {
    BackfillOptions {
        days: Some(days),
        window_days: Some(window_days),
        delay: Some(Duration::ZERO),
        ..Default::default()
    }
}

#[tokio::test]
async fn rerunning_an_identical_backfill_updates_instead_of_duplicating() {
    let (_db_dir, store, ledger) = storage().await;
    let export_dir = tempfile::tempdir().unwrap();
    write_exports(export_dir.path()).await;

    let mut service = SyncService::new(store.clone(), ledger.clone());
    service.register(std::sync::Arc::new(ReplayConnector::new(
        Source::Ecommerce,
        export_dir.path(),
    )));
    service.set_profile(Source::Ecommerce, fast_profile(Source::Ecommerce));

    let first = service
        .backfill(Source::Ecommerce, backfill_opts(40, 14))
        .await
        .unwrap();
    assert!(first.success);
    assert_eq!(first.saved, 3);
    assert_eq!(first.updated, 0);

    let second = service
        .backfill(Source::Ecommerce, backfill_opts(40, 14))
        .await
        .unwrap();
    assert!(second.success);
    assert_eq!(second.saved, 0);
    assert_eq!(second.updated, second.total_records);
    assert_eq!(store.count_records(Some(Source::Ecommerce)).await.unwrap(), 3);

    // Two runs, two ledger rows.
    let runs = ledger.recent_runs(10).await.unwrap();
    assert_eq!(runs.len(), 2);
}

#[tokio::test]
async fn overlapping_ranges_converge_on_the_same_state() {
    let (_db_dir, store, ledger) = storage().await;
    let export_dir = tempfile::tempdir().unwrap();
    write_exports(export_dir.path()).await;

    let mut service = SyncService::new(store.clone(), ledger);
    service.register(std::sync::Arc::new(ReplayConnector::new(
        Source::Ecommerce,
        export_dir.path(),
    )));
    service.set_profile(Source::Ecommerce, fast_profile(Source::Ecommerce));

    // A wide backfill followed by a narrow recent sync over a subrange.
    service
        .backfill(Source::Ecommerce, backfill_opts(40, 14))
        .await
        .unwrap();
    let recent = service.sync_source(Source::Ecommerce, 5).await.unwrap();

    assert!(recent.success);
    assert_eq!(recent.saved, 0);
    assert_eq!(recent.updated, 1); // only the 2-day-old order falls in range
    assert_eq!(store.count_records(None).await.unwrap(), 3);
}

#[tokio::test]
async fn history_clamp_keeps_deep_backfills_inside_the_api_horizon() {
    let (_db_dir, store, ledger) = storage().await;
    let export_dir = tempfile::tempdir().unwrap();
    write_exports(export_dir.path()).await;

    let mut service = SyncService::new(store.clone(), ledger);
    service.register(std::sync::Arc::new(ReplayConnector::new(
        Source::SearchConsole,
        export_dir.path(),
    )));
    service.set_profile(Source::SearchConsole, fast_profile(Source::SearchConsole));

    // 24 requested months clamp to the documented 16-month depth, so the
    // 500-day-old row stays out while both recent rows land.
    let report = service
        .backfill(
            Source::SearchConsole,
            BackfillOptions {
                months: Some(24),
                window_days: Some(30),
                delay: Some(Duration::ZERO),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.saved, 2);
    assert_eq!(store.count_records(Some(Source::SearchConsole)).await.unwrap(), 2);
}

#[tokio::test]
async fn retention_prunes_old_snapshots_but_keeps_entities() {
    let (_db_dir, store, ledger) = storage().await;
    let export_dir = tempfile::tempdir().unwrap();
    write_exports(export_dir.path()).await;

    let mut service = SyncService::new(store.clone(), ledger.clone());
    for source in [Source::Ecommerce, Source::SearchConsole] {
        service.register(std::sync::Arc::new(ReplayConnector::new(
            source,
            export_dir.path(),
        )));
        service.set_profile(source, fast_profile(source));
    }
    service
        .backfill(Source::Ecommerce, backfill_opts(40, 14))
        .await
        .unwrap();
    service
        .backfill(Source::SearchConsole, backfill_opts(40, 14))
        .await
        .unwrap();
    assert_eq!(store.count_records(None).await.unwrap(), 5);

    // Only dated search rows fall to retention; orders have no snapshot date.
    let cutoff = Utc::now().date_naive() - chrono::Duration::days(15);
    let removed = store.prune_snapshots_before(cutoff).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.count_records(Some(Source::Ecommerce)).await.unwrap(), 3);
    assert_eq!(store.count_records(Some(Source::SearchConsole)).await.unwrap(), 1);
}

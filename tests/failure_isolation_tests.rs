//! Window-level failure isolation through the public service surface

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_profile, order, service_with, storage, ScriptedConnector};
use serde_json::json;
use storefront_sync::domain::connector::ConnectorError;
use storefront_sync::domain::record::{EntityKind, RawRecord};
use storefront_sync::domain::source::Source;
use storefront_sync::sync::summary::RunStatus;
use storefront_sync::sync::BackfillOptions;

fn backfill_40_days_in_14s() -> BackfillOptions {
    BackfillOptions {
        days: Some(40),
        window_days: Some(14),
        delay: Some(Duration::ZERO),
        ..Default::default()
    }
}

#[tokio::test]
async fn one_bad_window_never_aborts_the_backfill() {
    let (_dir, store, ledger) = storage().await;
    let connector = Arc::new(ScriptedConnector::new(
        Source::Ecommerce,
        vec![
            Ok(vec![order(1, 10.0), order(2, 20.0)]),
            Err(ConnectorError::Transient(String::new())),
            Ok(vec![order(3, 30.0)]),
        ],
    ));
    let service = service_with(store.clone(), ledger.clone(), connector);

    let report = service
        .backfill(Source::Ecommerce, backfill_40_days_in_14s())
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.windows_processed, 2);
    assert_eq!(report.windows_failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].window, 2);
    assert_eq!(report.errors[0].error, "transient_error");

    // Records on either side of the failed window survived it.
    assert_eq!(store.count_records(Some(Source::Ecommerce)).await.unwrap(), 3);

    // Exactly one ledger row exists for the run and it is finalized.
    let row = ledger.get_run(report.run_id).await.unwrap().unwrap();
    assert_eq!(row.status, "partial");
    assert_eq!(row.window_count, 3);
    assert_eq!(row.windows_failed, 1);
}

#[tokio::test]
async fn rate_limited_window_retries_once_then_counts_as_failure() {
    let (_dir, store, ledger) = storage().await;

    // First window: limited then fine (no error entry). Second window:
    // limited twice (exactly one error entry).
    let connector = Arc::new(ScriptedConnector::new(
        Source::Ecommerce,
        vec![
            Err(ConnectorError::RateLimited { retry_after: None }),
            Ok(vec![order(1, 5.0)]),
            Err(ConnectorError::RateLimited { retry_after: None }),
            Err(ConnectorError::RateLimited {
                retry_after: Some(Duration::from_millis(1)),
            }),
            Ok(vec![order(2, 6.0)]),
        ],
    ));
    let service = service_with(store, ledger, connector);

    let report = service
        .backfill(Source::Ecommerce, backfill_40_days_in_14s())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.windows_processed, 2);
    assert_eq!(report.windows_failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].error, "rate_limited");
    // The recovered window recorded its retry without an error entry.
    assert_eq!(report.windows[0].rate_limit_retries, 1);
    assert!(report.windows[0].success);
}

#[tokio::test]
async fn validation_rejects_are_recorded_and_do_not_fail_the_run() {
    let (_dir, store, ledger) = storage().await;
    let batch = vec![
        order(1, 10.0),
        order(2, 20.0),
        // Negative revenue metric is rejected by the gate.
        RawRecord::new(EntityKind::Order, json!({"id": 3, "total_price": -1.0})),
        // Missing id never even normalizes.
        RawRecord::new(EntityKind::Order, json!({"total_price": 7.0})),
    ];
    let connector = Arc::new(ScriptedConnector::new(Source::Ecommerce, vec![Ok(batch)]));
    let service = service_with(store.clone(), ledger.clone(), connector);

    let report = service
        .backfill(
            Source::Ecommerce,
            BackfillOptions {
                days: Some(10),
                window_days: Some(30),
                delay: Some(Duration::ZERO),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.total_records, 4);
    assert_eq!(report.saved, 2);
    assert_eq!(report.rejected, 2);
    assert_eq!(store.count_records(None).await.unwrap(), 2);
    assert_eq!(ledger.validation_failure_count(Some(Source::Ecommerce)).await.unwrap(), 2);
}

#[tokio::test]
async fn sources_fail_independently_in_fan_out() {
    let (_dir, store, ledger) = storage().await;
    let mut service = service_with(
        store.clone(),
        ledger.clone(),
        Arc::new(ScriptedConnector::new(
            Source::Ecommerce,
            vec![Ok(vec![order(1, 10.0)])],
        )),
    );
    service.register(Arc::new(ScriptedConnector::new(
        Source::AdPlatform,
        vec![Err(ConnectorError::Auth("credentials revoked".into()))],
    )));
    service.set_profile(Source::AdPlatform, fast_profile(Source::AdPlatform));

    let report = service.sync_all(7).await;

    assert_eq!(report.total_sources, 2);
    assert_eq!(report.sources_synced, 1);
    assert!(!report.success);

    // The healthy source's data landed even though the other failed.
    assert_eq!(store.count_records(Some(Source::Ecommerce)).await.unwrap(), 1);
    let ads = &report.results["ad_platform"];
    assert_eq!(ads.status, RunStatus::Failed);
    assert!(ads.errors[0].error.starts_with("auth_error"));
}

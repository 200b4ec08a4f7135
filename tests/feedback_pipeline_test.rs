//! End-to-end tests for the feedback pipeline
//!
//! Ingest → accumulate → flush → merge, over both libSQL and failure-injecting
//! storage.

mod common;

use common::{acme_batch, create_test_storage, noon, FlakyStorage};
use flagfeed_core::{
    flush_all, flush_once, EntityKey, EntityResolver, FeedbackIngestor, FeedbackStorage, FlagId,
    FlagUsage, FlagfeedError, FlushReport, FlushSchedulerConfig, FlushSchedulerHandle,
    IdentifierCache, StatisticsAccumulator, StatisticsMerger, MAX_COUNT,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn pipeline(
    storage: Arc<dyn FeedbackStorage>,
) -> (FeedbackIngestor, Arc<StatisticsAccumulator>, Arc<StatisticsMerger>) {
    let resolver = Arc::new(EntityResolver::new(
        Arc::new(IdentifierCache::new()),
        storage.clone(),
    ));
    let accumulator = Arc::new(StatisticsAccumulator::new(Duration::from_secs(60)));
    let merger = Arc::new(StatisticsMerger::new(storage));
    (
        FeedbackIngestor::new(resolver, accumulator.clone()),
        accumulator,
        merger,
    )
}

async fn flag_id(storage: &dyn FeedbackStorage, project: &str, flag: &str) -> FlagId {
    let project = storage
        .select_id(&EntityKey::project(project))
        .await
        .unwrap()
        .expect("project row");
    let flag = storage
        .select_id(&EntityKey::flag(project.into(), flag))
        .await
        .unwrap()
        .expect("flag row");
    FlagId(flag)
}

#[tokio::test]
async fn test_acme_batch_end_to_end() {
    let (storage, _dir) = create_test_storage().await;
    let storage = Arc::new(storage);
    let (ingestor, accumulator, merger) = pipeline(storage.clone());

    let summary = ingestor.ingest(&acme_batch()).await.unwrap();
    assert_eq!(summary.variables, 1);
    assert_eq!(summary.flag_updates, 1);

    // Identifiers are durable before any flush
    let flag = flag_id(storage.as_ref(), "acme", "checkout_v2").await;
    assert!(storage
        .select_id(&EntityKey::variable(summary.project_id, "beta_flag_var"))
        .await
        .unwrap()
        .is_some());
    assert!(storage.list_statistics(flag).await.unwrap().is_empty());

    // The bucket is long past the cutoff age
    let report = flush_once(&accumulator, &merger, Duration::from_secs(120)).await;
    assert_eq!(
        report,
        FlushReport {
            drained: 1,
            merged: 1,
            failed: 0
        }
    );
    assert!(accumulator.is_empty());

    let row = storage.get_statistics(flag, noon()).await.unwrap().unwrap();
    assert_eq!((row.positive_count, row.negative_count), (3, 1));

    // A second flush with nothing pending writes nothing
    let report = flush_once(&accumulator, &merger, Duration::from_secs(120)).await;
    assert_eq!(report, FlushReport::default());
    let row = storage.get_statistics(flag, noon()).await.unwrap().unwrap();
    assert_eq!((row.positive_count, row.negative_count), (3, 1));
}

#[tokio::test]
async fn test_counts_within_one_bucket_sum_before_flush() {
    let (storage, _dir) = create_test_storage().await;
    let storage = Arc::new(storage);
    let (ingestor, accumulator, merger) = pipeline(storage.clone());

    let mut batch = acme_batch();
    batch.flags_usage = vec![
        FlagUsage {
            name: "checkout_v2".into(),
            interval: noon() + chrono::Duration::seconds(5),
            positive_count: 1,
            negative_count: 2,
        },
        FlagUsage {
            name: "checkout_v2".into(),
            interval: noon() + chrono::Duration::seconds(40),
            positive_count: 2,
            negative_count: 2,
        },
    ];
    ingestor.ingest(&batch).await.unwrap();
    ingestor.ingest(&acme_batch()).await.unwrap();

    let report = flush_all(&accumulator, &merger).await;
    assert_eq!(report.drained, 1);

    let flag = flag_id(storage.as_ref(), "acme", "checkout_v2").await;
    let rows = storage.list_statistics(flag).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].interval, noon());
    assert_eq!((rows[0].positive_count, rows[0].negative_count), (6, 5));
}

#[tokio::test]
async fn test_fresh_buckets_wait_for_cutoff() {
    let (storage, _dir) = create_test_storage().await;
    let storage = Arc::new(storage);
    let (ingestor, accumulator, merger) = pipeline(storage.clone());

    let mut batch = acme_batch();
    batch.flags_usage[0].interval = chrono::Utc::now();
    ingestor.ingest(&batch).await.unwrap();

    let report = flush_once(&accumulator, &merger, Duration::from_secs(120)).await;
    assert_eq!(report.drained, 0);
    assert_eq!(accumulator.pending_buckets(), 1);
}

#[tokio::test]
async fn test_failed_lookup_rejects_whole_batch() {
    let storage = Arc::new(FlakyStorage::new());
    storage.fail_flag_lookups.store(true, Ordering::SeqCst);
    let (ingestor, accumulator, _merger) = pipeline(storage.clone());

    let err = ingestor.ingest(&acme_batch()).await.unwrap_err();
    assert!(matches!(err, FlagfeedError::Database(_)));
    assert!(err.is_transient());
    assert!(accumulator.is_empty());

    // Retrying after recovery counts the batch exactly once
    storage.fail_flag_lookups.store(false, Ordering::SeqCst);
    ingestor.ingest(&acme_batch()).await.unwrap();
    let flag = flag_id(storage.inner(), "acme", "checkout_v2").await;
    assert_eq!(
        accumulator.get(flag, noon()).map(|c| (c.positive, c.negative)),
        Some((3, 1))
    );
}

#[tokio::test]
async fn test_failed_merge_drops_task() {
    let storage = Arc::new(FlakyStorage::new());
    let (ingestor, accumulator, merger) = pipeline(storage.clone());
    ingestor.ingest(&acme_batch()).await.unwrap();

    storage.fail_upserts.store(true, Ordering::SeqCst);
    let report = flush_all(&accumulator, &merger).await;
    assert_eq!(
        report,
        FlushReport {
            drained: 1,
            merged: 0,
            failed: 1
        }
    );
    assert!(accumulator.is_empty(), "failed tasks are not re-buffered");

    storage.fail_upserts.store(false, Ordering::SeqCst);
    let flag = flag_id(storage.inner(), "acme", "checkout_v2").await;
    assert!(storage.list_statistics(flag).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scheduler_flushes_into_libsql() {
    let (storage, _dir) = create_test_storage().await;
    let storage = Arc::new(storage);
    let (ingestor, accumulator, merger) = pipeline(storage.clone());
    ingestor.ingest(&acme_batch()).await.unwrap();

    let mut scheduler = FlushSchedulerHandle::spawn(
        accumulator.clone(),
        merger,
        FlushSchedulerConfig {
            period: Duration::from_millis(20),
            cutoff_age: Duration::from_secs(120),
            flush_on_shutdown: true,
        },
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    let report = scheduler.stop().await.unwrap();
    assert_eq!(report.merged, 1);
    assert!(!scheduler.is_running());

    let flag = flag_id(storage.as_ref(), "acme", "checkout_v2").await;
    let row = storage.get_statistics(flag, noon()).await.unwrap().unwrap();
    assert_eq!((row.positive_count, row.negative_count), (3, 1));
}

#[tokio::test]
async fn test_huge_bucket_saturates_instead_of_failing_merge() {
    let (storage, _dir) = create_test_storage().await;
    let storage = Arc::new(storage);
    let (_ingestor, accumulator, merger) = pipeline(storage.clone());
    let flag = FlagId::new();

    accumulator.increment(flag, noon(), 1 << 63, 0);
    accumulator.increment(flag, noon(), 1, 2);

    let report = flush_all(&accumulator, &merger).await;
    assert_eq!(
        report,
        FlushReport {
            drained: 1,
            merged: 1,
            failed: 0
        }
    );

    let row = storage.get_statistics(flag, noon()).await.unwrap().unwrap();
    assert_eq!((row.positive_count, row.negative_count), (MAX_COUNT, 2));
}

//! End-to-end tests for the ingest pipeline against the in-memory store.
//!
//! Cover request coalescing, table-resolution failure recovery, series
//! resolution, copy failure fan-out, and shutdown draining.

use fluxgate::ingest::{IngestConfig, Ingestor};
use fluxgate::model::{Label, Sample, SeriesDescriptor};
use fluxgate::store::{
    schema, BatchResults, Connection, CopyRow, MemStore, SqlBatch, SqlRow, SqlValue,
};
use fluxgate::{Error, Result};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Helper: a request with `n` samples on one series.
fn samples_for(series_ref: u64, start_ts: i64, values: &[f64]) -> Vec<Sample> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| Sample {
            series_ref,
            timestamp: start_ts + (i as i64) * 1000,
            value: *v,
        })
        .collect()
}

fn series_for(series_ref: u64, host: &str) -> Vec<SeriesDescriptor> {
    vec![SeriesDescriptor::new(
        series_ref,
        vec![Label::new("host", host.to_string())],
    )]
}

/// Wraps the in-memory store, holding metric table resolution until the
/// test releases it. Lets tests line up requests inside the batcher's
/// non-blocking window deterministically.
struct GatedStore {
    inner: MemStore,
    table_gate: Semaphore,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            inner: MemStore::new(),
            table_gate: Semaphore::new(0),
        }
    }

    fn release_table_resolution(&self) {
        self.table_gate.add_permits(1);
    }
}

#[async_trait]
impl Connection for GatedStore {
    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>> {
        if sql.contains("get_or_create_metric_table_name") {
            self.table_gate
                .acquire()
                .await
                .map_err(|_| Error::Store("gate closed".to_string()))?
                .forget();
        }
        self.inner.query(sql, args).await
    }

    async fn send_batch(&self, batch: SqlBatch) -> Result<BatchResults> {
        self.inner.send_batch(batch).await
    }

    async fn copy_samples(&self, table: &str, rows: &[CopyRow]) -> Result<u64> {
        self.inner.copy_samples(table, rows).await
    }
}

// =========================================================================
// Coalescing
// =========================================================================

#[tokio::test]
async fn test_requests_in_hot_window_coalesce_into_one_copy() {
    let store = Arc::new(GatedStore::new());
    let ingestor = Ingestor::new(store.clone(), IngestConfig::default());

    // Both requests land in the worker's channel while the worker is
    // still resolving the metric table, so the hot-receive loop drains
    // them into a single flush.
    let rx1 = ingestor
        .insert("m1", samples_for(1, 1000, &[1.0, 2.0]), series_for(1, "a"))
        .await
        .unwrap();
    let rx2 = ingestor
        .insert("m1", samples_for(1, 3000, &[3.0]), series_for(1, "a"))
        .await
        .unwrap();
    store.release_table_resolution();

    timeout(WAIT, rx1).await.unwrap().unwrap().unwrap();
    timeout(WAIT, rx2).await.unwrap().unwrap().unwrap();

    let rows = store.inner.copied_rows("m1");
    assert_eq!(rows.len(), 3);
    assert_eq!(
        rows.iter().map(|r| r.value).collect::<Vec<_>>(),
        vec![1.0, 2.0, 3.0]
    );
    assert_eq!(store.inner.stats().copies, 1, "one copy request expected");

    ingestor.shutdown().await;
}

// =========================================================================
// Table resolution
// =========================================================================

#[tokio::test]
async fn test_empty_table_name_error_reported_then_worker_recovers() {
    let store = Arc::new(MemStore::new());
    let ingestor = Ingestor::new(store.clone(), IngestConfig::default());

    store.return_empty_table_for("gauge");
    let rx = ingestor
        .insert("gauge", samples_for(1, 1000, &[1.0]), series_for(1, "a"))
        .await
        .unwrap();
    let err = timeout(WAIT, rx).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, Error::MissingTableName { .. }), "got {err:?}");

    // The worker stays alive and serves the next request once the
    // catalog behaves again.
    store.clear_empty_table_for("gauge");
    let rx = ingestor
        .insert("gauge", samples_for(1, 2000, &[2.0]), series_for(1, "a"))
        .await
        .unwrap();
    timeout(WAIT, rx).await.unwrap().unwrap().unwrap();
    assert_eq!(store.copied_rows("gauge").len(), 1);

    ingestor.shutdown().await;
}

#[tokio::test]
async fn test_table_resolution_is_cached_and_stable() {
    let store = Arc::new(MemStore::new());
    let ingestor = Ingestor::new(store.clone(), IngestConfig::default());

    for ts in [1000_i64, 2000] {
        let rx = ingestor
            .insert("cpu", samples_for(1, ts, &[1.0]), series_for(1, "a"))
            .await
            .unwrap();
        timeout(WAIT, rx).await.unwrap().unwrap().unwrap();
    }

    let resolutions = store
        .statement_log()
        .iter()
        .filter(|s| s.starts_with("get_or_create_metric_table_name"))
        .count();
    assert_eq!(resolutions, 1, "second insert must hit the metric cache");

    let info = ingestor.metric_cache().get(schema::DATA, "cpu").unwrap();
    assert_eq!(info.table_name, "cpu");
    assert_eq!(store.metric_table("cpu").unwrap(), "cpu");

    ingestor.shutdown().await;
}

#[tokio::test]
async fn test_completer_finalizes_new_metric_tables() {
    let store = Arc::new(MemStore::new());
    let ingestor = Ingestor::new(store.clone(), IngestConfig::default());

    let rx = ingestor
        .insert("fresh", samples_for(1, 1000, &[1.0]), series_for(1, "a"))
        .await
        .unwrap();
    timeout(WAIT, rx).await.unwrap().unwrap().unwrap();

    // The creation signal (or the periodic re-scan) drives finalize.
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if store.stats().finalize_calls > 0 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "finalize_metric_creation never ran"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    ingestor.shutdown().await;
}

// =========================================================================
// Series resolution
// =========================================================================

#[tokio::test]
async fn test_series_resolution_assigns_ids_and_caches() {
    let store = Arc::new(MemStore::new());
    let ingestor = Ingestor::new(store.clone(), IngestConfig::default());

    let series = vec![
        SeriesDescriptor::new(1, vec![Label::new("host", "a")]),
        SeriesDescriptor::new(2, vec![Label::new("host", "b")]),
    ];
    let samples = vec![
        Sample {
            series_ref: 1,
            timestamp: 1000,
            value: 0.5,
        },
        Sample {
            series_ref: 2,
            timestamp: 1000,
            value: 0.7,
        },
    ];
    let rx = ingestor.insert("cpu", samples, series).await.unwrap();
    timeout(WAIT, rx).await.unwrap().unwrap().unwrap();

    let rows = store.copied_rows("cpu");
    assert_eq!(rows.len(), 2);
    let mut ids: Vec<i64> = rows.iter().map(|r| r.series_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);

    // Same series again: resolution comes from the shared cache.
    let rx = ingestor
        .insert(
            "cpu",
            samples_for(1, 5000, &[0.9]),
            vec![SeriesDescriptor::new(1, vec![Label::new("host", "a")])],
        )
        .await
        .unwrap();
    timeout(WAIT, rx).await.unwrap().unwrap().unwrap();

    let resolutions = store
        .statement_log()
        .iter()
        .filter(|s| s.starts_with("get_or_create_series_id"))
        .count();
    assert_eq!(resolutions, 2, "cached series must not hit the store again");

    ingestor.shutdown().await;
}

// =========================================================================
// Failure fan-out
// =========================================================================

#[tokio::test]
async fn test_copy_failure_fans_out_to_all_requests_in_buffer() {
    let store = Arc::new(GatedStore::new());
    let ingestor = Ingestor::new(store.clone(), IngestConfig::default());
    store.inner.fail_next_copies(1);

    let rx1 = ingestor
        .insert("m1", samples_for(1, 1000, &[1.0]), series_for(1, "a"))
        .await
        .unwrap();
    let rx2 = ingestor
        .insert("m1", samples_for(1, 2000, &[2.0]), series_for(1, "a"))
        .await
        .unwrap();
    store.release_table_resolution();

    let err1 = timeout(WAIT, rx1).await.unwrap().unwrap().unwrap_err();
    let err2 = timeout(WAIT, rx2).await.unwrap().unwrap().unwrap_err();
    assert_eq!(err1, err2, "every handle in the buffer sees the failure");
    assert!(matches!(err1, Error::Store(_)));

    // The buffer is not retried internally; a fresh request succeeds.
    let rx = ingestor
        .insert("m1", samples_for(1, 3000, &[3.0]), series_for(1, "a"))
        .await
        .unwrap();
    timeout(WAIT, rx).await.unwrap().unwrap().unwrap();
    assert_eq!(store.inner.copied_rows("m1").len(), 1);

    ingestor.shutdown().await;
}

// =========================================================================
// Shutdown
// =========================================================================

#[tokio::test]
async fn test_shutdown_reports_every_inflight_request() {
    let store = Arc::new(MemStore::new());
    let ingestor = Ingestor::new(store.clone(), IngestConfig::default());

    let metrics = ["m1", "m2", "m3", "m4"];
    let mut receivers = Vec::new();
    for i in 0..20u64 {
        let metric = metrics[(i % 4) as usize];
        let rx = ingestor
            .insert(
                metric,
                samples_for(i, 1000 + i as i64, &[i as f64]),
                series_for(i, "h"),
            )
            .await
            .unwrap();
        receivers.push(rx);
    }

    timeout(WAIT, ingestor.shutdown()).await.unwrap();

    for rx in receivers {
        // Exactly one notification per request, all delivered by now.
        rx.await.unwrap().unwrap();
    }
    let copied: usize = metrics.iter().map(|m| store.copied_rows(m).len()).sum();
    assert_eq!(copied, 20);
}

#[tokio::test]
async fn test_dispatch_after_shutdown_reports_pipeline_closed() {
    let store = Arc::new(MemStore::new());
    let ingestor = Ingestor::new(store.clone(), IngestConfig::default());
    ingestor.shutdown().await;

    let (req, rx) = fluxgate::model::InsertRequest::new(
        "late",
        samples_for(1, 1000, &[1.0]),
        series_for(1, "a"),
    );
    assert!(matches!(
        ingestor.dispatch(req).await,
        Err(Error::PipelineClosed)
    ));
    let err = timeout(WAIT, rx).await.unwrap().unwrap().unwrap_err();
    assert_eq!(err, Error::PipelineClosed);
}

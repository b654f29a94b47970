//! Ingest pipeline
//!
//! The ingest core is a staged pipeline: the dispatcher routes requests
//! to per-metric batcher workers, which coalesce them into pending
//! buffers and hand full buffers to a fixed copier pool writing to the
//! backing store. Catalog resolution (metric tables, series ids) rides
//! along, backed by internally-synchronized caches.

mod copier;
mod dispatcher;
mod metric_batcher;
mod pending;
mod telemetry;

pub use copier::CopyRequest;
pub use dispatcher::Dispatcher;
pub use pending::{PendingBuffer, MAX_BATCH_REQUESTS, MAX_BATCH_SAMPLES};

use crate::cache::{MetricCache, DEFAULT_METRIC_CACHE_SIZE};
use crate::catalog::{new_series_cache, SeriesCache, DEFAULT_SERIES_CACHE_SIZE};
use crate::model::{CompletionReceiver, InsertRequest, Sample, SeriesDescriptor};
use crate::store::{schema, ConnectionRef};
use crate::Result;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Configuration for the ingest pipeline.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Number of copier workers writing to the backing store.
    pub copier_count: usize,
    /// Capacity of each per-metric input channel.
    pub metric_channel_capacity: usize,
    /// Capacity of the shared metric-batcher → copier channel.
    pub copier_channel_capacity: usize,
    /// Entry capacity of the shared metric table-name cache.
    pub metric_cache_size: usize,
    /// Entry capacity of the shared series cache.
    pub series_cache_size: usize,
    /// How often the completer re-scans for unfinished metric tables.
    pub completer_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            copier_count: 4,
            metric_channel_capacity: 1000,
            copier_channel_capacity: 1000,
            metric_cache_size: DEFAULT_METRIC_CACHE_SIZE,
            series_cache_size: DEFAULT_SERIES_CACHE_SIZE,
            completer_interval: Duration::from_secs(60),
        }
    }
}

/// The ingest coordinator: owns the channel topology and the worker
/// pools, and is the producer-facing entry point.
pub struct Ingestor {
    dispatcher: Arc<Dispatcher>,
    copiers: TaskTracker,
    completer: TaskTracker,
    cancel: CancellationToken,
    metric_cache: Arc<MetricCache>,
    series_cache: Arc<SeriesCache>,
}

impl Ingestor {
    pub fn new(conn: ConnectionRef, config: IngestConfig) -> Self {
        let (to_copiers_tx, to_copiers_rx) = mpsc::channel(config.copier_channel_capacity);
        // Single-slot lossy mailbox: batchers signal with try_send and
        // drop the signal when the slot is taken.
        let (creation_tx, creation_rx) = mpsc::channel(1);

        let metric_cache = Arc::new(MetricCache::new(config.metric_cache_size));
        let series_cache = new_series_cache(config.series_cache_size);
        let cancel = CancellationToken::new();

        let copiers = TaskTracker::new();
        let shared_rx = Arc::new(Mutex::new(to_copiers_rx));
        for _ in 0..config.copier_count.max(1) {
            copiers.spawn(copier::run_copier(
                conn.clone(),
                shared_rx.clone(),
                series_cache.clone(),
                cancel.child_token(),
            ));
        }
        copiers.close();

        let completer = TaskTracker::new();
        completer.spawn(run_completer(
            conn.clone(),
            creation_rx,
            config.completer_interval,
            cancel.clone(),
        ));
        completer.close();

        let dispatcher = Arc::new(Dispatcher::new(
            conn,
            to_copiers_tx,
            creation_tx,
            metric_cache.clone(),
            config.metric_channel_capacity,
        ));

        Self {
            dispatcher,
            copiers,
            completer,
            cancel,
            metric_cache,
            series_cache,
        }
    }

    /// Route a prepared request into the pipeline.
    pub async fn dispatch(&self, req: InsertRequest) -> Result<()> {
        self.dispatcher.dispatch(req).await
    }

    /// Convenience producer entry point: build and dispatch a request,
    /// returning the receiver its completion is reported on.
    pub async fn insert(
        &self,
        metric_name: &str,
        samples: Vec<Sample>,
        series: Vec<SeriesDescriptor>,
    ) -> Result<CompletionReceiver> {
        let (req, rx) = InsertRequest::new(metric_name, samples, series);
        self.dispatch(req).await?;
        Ok(rx)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn metric_cache(&self) -> Arc<MetricCache> {
        self.metric_cache.clone()
    }

    pub fn series_cache(&self) -> Arc<SeriesCache> {
        self.series_cache.clone()
    }

    /// Ordered shutdown: close per-metric channels and drain the
    /// batcher workers, then the copier channel and pool, then the
    /// completer. Every in-flight request is reported before this
    /// returns.
    pub async fn shutdown(&self) {
        info!("shutting down ingest pipeline");
        self.dispatcher.shutdown().await;
        self.dispatcher.close_copier_channel();
        self.copiers.wait().await;
        self.cancel.cancel();
        self.completer.wait().await;
        info!("ingest pipeline shut down");
    }
}

/// Drains the lossy creation channel and periodically re-scans, running
/// the remainder of metric table creation (index, policy, retention) on
/// the database side.
async fn run_completer(
    conn: ConnectionRef,
    mut signals: mpsc::Receiver<()>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            signal = signals.recv() => match signal {
                Some(()) => complete_metric_creation(&conn).await,
                None => return,
            },
            _ = ticker.tick() => complete_metric_creation(&conn).await,
        }
    }
}

async fn complete_metric_creation(conn: &ConnectionRef) {
    let sql = format!("SELECT {}.finalize_metric_creation()", schema::CATALOG);
    if let Err(err) = conn.query(&sql, &[]).await {
        warn!(error = %err, "finalize metric creation failed");
    }
}

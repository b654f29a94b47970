//! Dispatcher: routes insert requests to per-metric batcher workers.

use super::copier::CopyRequest;
use super::metric_batcher::run_metric_batcher;
use super::telemetry;
use crate::cache::MetricCache;
use crate::model::InsertRequest;
use crate::store::ConnectionRef;
use crate::{Error, Result};

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Owns the metric-name → input-channel map. A request for a metric not
/// seen before lazily spawns a batcher worker bound to that name and the
/// shared copier channel. The dispatcher never blocks on worker input
/// except for back-pressure.
pub struct Dispatcher {
    conn: ConnectionRef,
    channels: DashMap<String, mpsc::Sender<InsertRequest>>,
    to_copiers: parking_lot::Mutex<Option<mpsc::Sender<CopyRequest>>>,
    complete_metric_creation: mpsc::Sender<()>,
    metric_cache: Arc<MetricCache>,
    workers: TaskTracker,
    channel_capacity: usize,
    closed: AtomicBool,
}

impl Dispatcher {
    pub(crate) fn new(
        conn: ConnectionRef,
        to_copiers: mpsc::Sender<CopyRequest>,
        complete_metric_creation: mpsc::Sender<()>,
        metric_cache: Arc<MetricCache>,
        channel_capacity: usize,
    ) -> Self {
        Self {
            conn,
            channels: DashMap::new(),
            to_copiers: parking_lot::Mutex::new(Some(to_copiers)),
            complete_metric_creation,
            metric_cache,
            workers: TaskTracker::new(),
            channel_capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// Route a request to its metric's worker, spawning the worker on
    /// first contact. The send blocks only under worker back-pressure.
    ///
    /// The request's completion handle is reported here if the pipeline
    /// is already shut down, so the one-report invariant holds on every
    /// path.
    pub async fn dispatch(&self, req: InsertRequest) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            req.report_result(Err(Error::PipelineClosed));
            return Err(Error::PipelineClosed);
        }
        telemetry::record_samples_received(req.samples.len() as u64);

        let Some(sender) = self.sender_for(&req.metric_name) else {
            req.report_result(Err(Error::PipelineClosed));
            return Err(Error::PipelineClosed);
        };
        match sender.send(req).await {
            Ok(()) => Ok(()),
            Err(failed) => {
                failed.0.report_result(Err(Error::PipelineClosed));
                Err(Error::PipelineClosed)
            }
        }
    }

    /// Number of live per-metric workers spawned so far.
    pub fn worker_count(&self) -> usize {
        self.channels.len()
    }

    fn sender_for(&self, metric: &str) -> Option<mpsc::Sender<InsertRequest>> {
        if let Some(sender) = self.channels.get(metric) {
            return Some(sender.clone());
        }

        let to_copiers = self.to_copiers.lock().clone()?;
        // entry() holds the map shard lock, so concurrent first contacts
        // for one metric spawn exactly one worker.
        let sender = self
            .channels
            .entry(metric.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.channel_capacity);
                debug!(metric, "spawning metric batcher");
                self.workers.spawn(run_metric_batcher(
                    self.conn.clone(),
                    rx,
                    metric.to_string(),
                    self.complete_metric_creation.clone(),
                    self.metric_cache.clone(),
                    to_copiers,
                ));
                tx
            })
            .clone();
        Some(sender)
    }

    /// Close every per-metric input channel and wait for the workers to
    /// drain and exit. After this returns no worker holds a copier
    /// sender any more.
    pub(crate) async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.channels.clear();
        self.workers.close();
        self.workers.wait().await;
    }

    /// Drop the dispatcher's own copier sender; once the workers are
    /// gone this closes the copier channel.
    pub(crate) fn close_copier_channel(&self) {
        self.to_copiers.lock().take();
    }
}

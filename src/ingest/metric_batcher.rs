//! Per-metric batcher worker.
//!
//! One long-lived task per metric. The worker first resolves the
//! metric's table (reporting resolution failures to the requests that
//! hit them), then enters a hot-receive loop: keep pulling requests off
//! the channel while that is possible without blocking, and flush to
//! the copier pool when the channel runs dry or the pending buffer
//! fills. Wakeup plus a database round-trip is expensive and easily
//! amortized when samples for a metric arrive clustered; when they
//! arrive sparsely, blocking on the channel avoids spinning.

use super::copier::CopyRequest;
use super::pending::PendingBuffer;
use super::telemetry;
use crate::cache::MetricCache;
use crate::model::{report_all, InsertRequest, MetricInfo};
use crate::store::{schema, Connection, ConnectionRef, SqlValue};
use crate::{Error, Result};

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error};

/// Resolve the metric's table name, returning whether the table may
/// have just been created.
async fn metric_table_name(conn: &dyn Connection, metric: &str) -> Result<(String, bool)> {
    let sql = format!(
        "SELECT table_name, possibly_new FROM {}.get_or_create_metric_table_name($1)",
        schema::CATALOG
    );
    let rows = conn
        .query(&sql, &[SqlValue::Text(metric.to_string())])
        .await
        .map_err(|e| Error::TableResolution {
            metric: metric.to_string(),
            reason: e.to_string(),
        })?;

    let row = rows.first().ok_or_else(|| Error::TableResolution {
        metric: metric.to_string(),
        reason: "no rows returned".to_string(),
    })?;
    let table_name = row.get_text(0).map_err(|e| Error::TableResolution {
        metric: metric.to_string(),
        reason: e.to_string(),
    })?;
    let possibly_new = row.get_bool(1).map_err(|e| Error::TableResolution {
        metric: metric.to_string(),
        reason: e.to_string(),
    })?;

    if table_name.is_empty() {
        return Err(Error::MissingTableName {
            metric: metric.to_string(),
        });
    }
    Ok((table_name.to_string(), possibly_new))
}

/// Create the metric table for the metric we handle, if it does not
/// already exist. Only the critical part happens here; the rest (index,
/// compression policy, retention) is driven by the completer draining
/// the creation signal.
async fn initialize_metric_batcher(
    conn: &dyn Connection,
    metric: &str,
    complete_metric_creation: &mpsc::Sender<()>,
    metric_cache: &MetricCache,
) -> Result<String> {
    if let Some(info) = metric_cache.get(schema::DATA, metric) {
        if !info.table_name.is_empty() {
            return Ok(info.table_name);
        }
    }

    let (table_name, possibly_new) = metric_table_name(conn, metric).await?;

    // Cache population is an optimization; a full cache dropping the
    // entry is fine.
    metric_cache.set(
        schema::DATA,
        metric,
        MetricInfo {
            table_schema: schema::DATA.to_string(),
            table_name: table_name.clone(),
            series_table: String::new(),
        },
    );

    if possibly_new {
        // Lossy signal: the completer periodically re-scans anyway.
        let _ = complete_metric_creation.try_send(());
    }
    Ok(table_name)
}

struct MetricBatcher {
    input: mpsc::Receiver<InsertRequest>,
    pending: PendingBuffer,
    metric_table_name: String,
    to_copiers: mpsc::Sender<CopyRequest>,
}

impl MetricBatcher {
    async fn handle_req(&mut self, req: InsertRequest) {
        self.pending.add_req(req);
        if self.pending.is_full() {
            self.flush_pending().await;
        }
    }

    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.flush_pending().await;
    }

    /// Hand ownership of the pending buffer to the copier pool. The
    /// blocking send propagates copier back-pressure upstream.
    async fn flush_pending(&mut self) {
        telemetry::record_flush_series(self.pending.count_series() as u64);
        let buffer = std::mem::take(&mut self.pending);
        let request = CopyRequest {
            buffer,
            table_name: self.metric_table_name.clone(),
        };
        if let Err(failed) = self.to_copiers.send(request).await {
            // Copier pool is gone; every retained handle still gets an
            // answer.
            report_all(failed.0.buffer.into_requests(), &Error::PipelineClosed);
        }
    }
}

/// Worker entry point, spawned by the dispatcher per metric name.
pub(crate) async fn run_metric_batcher(
    conn: ConnectionRef,
    mut input: mpsc::Receiver<InsertRequest>,
    metric_name: String,
    complete_metric_creation: mpsc::Sender<()>,
    metric_cache: Arc<MetricCache>,
    to_copiers: mpsc::Sender<CopyRequest>,
) {
    // Startup phase: consume requests until the metric table resolves.
    // Resolution errors go to the request that hit them; the worker
    // tries again with the next request.
    let mut startup: Option<(String, InsertRequest)> = None;
    while let Some(req) = input.recv().await {
        match initialize_metric_batcher(
            conn.as_ref(),
            &metric_name,
            &complete_metric_creation,
            &metric_cache,
        )
        .await
        {
            Ok(table_name) => {
                startup = Some((table_name, req));
                break;
            }
            Err(err) => {
                error!(metric = %metric_name, error = %err, "initializing the insert routine failed");
                req.report_result(Err(err));
            }
        }
    }

    // Input channel closed before any resolution succeeded.
    let Some((metric_table_name, first_req)) = startup else {
        debug!(metric = %metric_name, "metric batcher exiting before table resolution");
        return;
    };

    let mut handler = MetricBatcher {
        input,
        pending: PendingBuffer::new(),
        metric_table_name,
        to_copiers,
    };
    handler.handle_req(first_req).await;

    loop {
        if handler.pending.is_empty() {
            match handler.input.recv().await {
                Some(req) => {
                    handler.handle_req(req).await;
                    continue;
                }
                None => return,
            }
        }

        // Hot receive: drain without blocking until dry or full.
        loop {
            match handler.input.try_recv() {
                Ok(req) => {
                    handler.handle_req(req).await;
                    if handler.pending.is_full() {
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    handler.flush().await;
                    return;
                }
            }
        }

        handler.flush().await;
    }
}

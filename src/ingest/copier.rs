//! Copier pool: writes pending buffers to the backing store.

use super::pending::PendingBuffer;
use super::telemetry;
use crate::catalog::{SeriesBatch, SeriesCache, SeriesKey};
use crate::model::{report_all, InsertRequest};
use crate::store::{Connection, ConnectionRef, CopyRow};
use crate::{Error, Result};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A pending buffer crossing from a metric batcher to the copier pool.
#[derive(Debug)]
pub struct CopyRequest {
    pub buffer: PendingBuffer,
    pub table_name: String,
}

/// Copier worker loop. The pool shares one receiver; workers take turns
/// pulling requests and exit when the channel closes.
pub(crate) async fn run_copier(
    conn: ConnectionRef,
    input: Arc<Mutex<mpsc::Receiver<CopyRequest>>>,
    series_cache: Arc<SeriesCache>,
    cancel: CancellationToken,
) {
    loop {
        let request = { input.lock().await.recv().await };
        let Some(request) = request else {
            debug!("copier exiting, channel closed");
            return;
        };
        process_copy_request(conn.as_ref(), request, &series_cache, &cancel).await;
    }
}

/// Resolve series, bulk-insert, and report every retained handle
/// exactly once. A failed copy is reported to all handles in the
/// buffer; retry is the producer's responsibility.
async fn process_copy_request(
    conn: &dyn Connection,
    request: CopyRequest,
    series_cache: &Arc<SeriesCache>,
    cancel: &CancellationToken,
) {
    let CopyRequest { buffer, table_name } = request;
    let requests = buffer.into_requests();

    match copy_buffer(conn, &table_name, &requests, series_cache, cancel).await {
        Ok(copied) => {
            telemetry::record_copied_samples(copied);
            for req in requests {
                req.report_result(Ok(()));
            }
        }
        Err(err) => {
            telemetry::record_copy_failure();
            warn!(table = %table_name, error = %err, "copy attempt failed");
            report_all(requests, &err);
        }
    }
}

async fn copy_buffer(
    conn: &dyn Connection,
    table_name: &str,
    requests: &[InsertRequest],
    series_cache: &Arc<SeriesCache>,
    cancel: &CancellationToken,
) -> Result<u64> {
    // Resolve any unresolved series references against the shared cache
    // and the catalog, as one sorted pipelined batch.
    let mut batch = SeriesBatch::new(series_cache.clone());
    for req in requests {
        for series in &req.series {
            if series.resolved_id.is_none() {
                batch.queue(SeriesKey::new(&req.metric_name, &series.labels));
            }
        }
    }
    if !batch.is_empty() {
        batch.send_batch(cancel, conn).await?;
    }

    let total_samples: usize = requests.iter().map(|r| r.samples.len()).sum();
    let mut rows = Vec::with_capacity(total_samples);
    for req in requests {
        let mut by_ref: HashMap<u64, i64> = HashMap::with_capacity(req.series.len());
        for series in &req.series {
            let id = match series.resolved_id {
                Some(id) => id,
                None => batch.get_id(&SeriesKey::new(&req.metric_name, &series.labels))?,
            };
            by_ref.insert(series.ref_id, id);
        }
        for sample in &req.samples {
            let series_id = by_ref.get(&sample.series_ref).ok_or_else(|| {
                Error::Store(format!(
                    "sample references unknown series {} in request for {}",
                    sample.series_ref, req.metric_name
                ))
            })?;
            rows.push(CopyRow {
                series_id: *series_id,
                timestamp: sample.timestamp,
                value: sample.value,
            });
        }
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Canceled),
        res = conn.copy_samples(table_name, &rows) => res,
    }
}

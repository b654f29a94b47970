//! Core data model for the ingest pipeline
//!
//! Requests move through the pipeline by ownership transfer: the
//! dispatcher owns a request until it is handed to a metric batcher, the
//! batcher until it lands in a pending buffer, and the copier from flush
//! until the completion handle fires.

use crate::{Error, Result};

use serde::Serialize;
use tokio::sync::oneshot;

/// One `(timestamp, value)` observation on a series.
///
/// `series_ref` ties the sample to a [`SeriesDescriptor`] carried on the
/// same request. Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub series_ref: u64,
    pub timestamp: i64,
    pub value: f64,
}

/// A single `name=value` label pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A metric instantiated with a specific label set.
///
/// `resolved_id` is populated by the copier when the series has been
/// resolved against the catalog; requests may arrive with it already set.
#[derive(Debug, Clone)]
pub struct SeriesDescriptor {
    /// Reference id used by [`Sample::series_ref`] within one request.
    pub ref_id: u64,
    /// Label pairs in producer order. Empty-valued labels are dropped
    /// before the set is hashed or sent to the catalog.
    pub labels: Vec<Label>,
    /// Catalog series id, once known.
    pub resolved_id: Option<i64>,
}

impl SeriesDescriptor {
    pub fn new(ref_id: u64, labels: Vec<Label>) -> Self {
        Self {
            ref_id,
            labels,
            resolved_id: None,
        }
    }
}

/// A catalog id as returned by the backing store: `None` is SQL null.
///
/// Zero is never a valid present id; catalog ids begin at 1.
pub type CatalogId = Option<i64>;

/// Metric identity resolved against the catalog.
///
/// The pair `(table_schema, metric name)` resolves to exactly one
/// `MetricInfo`; once resolved non-empty it never changes for the
/// lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricInfo {
    pub table_schema: String,
    pub table_name: String,
    pub series_table: String,
}

/// Receiving side of a request's completion handle.
pub type CompletionReceiver = oneshot::Receiver<Result<()>>;

/// One-shot success/error sink attached to an insert request.
///
/// `report` consumes the handle, so reporting twice is a compile error
/// rather than a runtime race.
#[derive(Debug)]
pub struct CompletionHandle {
    tx: oneshot::Sender<Result<()>>,
}

impl CompletionHandle {
    pub fn new() -> (Self, CompletionReceiver) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Report the request outcome. A dropped receiver is not an error;
    /// producers are free to fire and forget.
    pub fn report(self, result: Result<()>) {
        let _ = self.tx.send(result);
    }
}

/// An insert request carrying samples, their series descriptors, and the
/// completion handle that must fire exactly once.
#[derive(Debug)]
pub struct InsertRequest {
    pub metric_name: String,
    pub samples: Vec<Sample>,
    pub series: Vec<SeriesDescriptor>,
    handle: CompletionHandle,
}

impl InsertRequest {
    /// Build a request, returning the receiver the producer awaits.
    pub fn new(
        metric_name: impl Into<String>,
        samples: Vec<Sample>,
        series: Vec<SeriesDescriptor>,
    ) -> (Self, CompletionReceiver) {
        let (handle, rx) = CompletionHandle::new();
        (
            Self {
                metric_name: metric_name.into(),
                samples,
                series,
                handle,
            },
            rx,
        )
    }

    /// Report the request outcome, consuming the request.
    pub fn report_result(self, result: Result<()>) {
        self.handle.report(result);
    }

    /// Split the request into its data and its completion handle.
    pub fn into_parts(self) -> (String, Vec<Sample>, Vec<SeriesDescriptor>, CompletionHandle) {
        (self.metric_name, self.samples, self.series, self.handle)
    }
}

/// Report the same error to every request in a batch.
pub fn report_all(requests: Vec<InsertRequest>, err: &Error) {
    for req in requests {
        req.report_result(Err(err.clone()));
    }
}

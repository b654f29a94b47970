//! # fluxgate
//!
//! An ingest adapter that sits between a metrics/tracing producer and a
//! relational columnar store. fluxgate receives streams of samples and
//! span-related records, resolves them to stable integer identifiers
//! against a catalog of metrics, series, schema URLs, operations, and
//! instrumentation libraries, batches writes by target table, and
//! dispatches them through a fixed pool of database workers.
//!
//! ## Architecture
//!
//! - **Dispatcher**: routes requests to per-metric batcher workers,
//!   spawning them lazily
//! - **Metric batchers**: one worker per metric, coalescing requests
//!   into pending buffers with a hot-receive loop
//! - **Copier pool**: fixed worker set resolving series ids and
//!   bulk-writing buffers to the store
//! - **Catalog batchers**: deduplicate, sort, and pipeline catalog
//!   upserts behind clock-sweep caches
//! - **Replay driver**: replays on-disk blocks through the ingest path
//!   at a configurable rate, simulating a write-ahead-log producer

pub mod cache;
pub mod catalog;
pub mod config;
pub mod ingest;
pub mod model;
pub mod replay;
pub mod store;
pub mod telemetry;

mod error;

pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::cache::{ClockCache, MetricCache};
    pub use crate::catalog::TraceCatalog;
    pub use crate::ingest::{IngestConfig, Ingestor};
    pub use crate::model::{InsertRequest, Label, Sample, SeriesDescriptor};
    pub use crate::replay::{ReplayConfig, ReplayStats, WalSimulator};
    pub use crate::store::{Connection, ConnectionRef, MemStore, PgStore};
    pub use crate::{Error, Result};
}

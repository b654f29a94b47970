//! Catalog entity resolution
//!
//! Each entity kind gets a typed batch façade over the generic
//! [`Batcher`], plus one shared clock cache per kind owned by the
//! [`TraceCatalog`] and handed to every batch it mints.

mod batch;
mod instrumentation;
mod operation;
mod schema_url;
mod series;
mod tag;

pub use batch::{Batcher, Queueable};
pub use instrumentation::{InstrumentationLibrary, InstrumentationLibraryBatch};
pub use operation::{Operation, OperationBatch};
pub use schema_url::{SchemaUrl, SchemaUrlBatch};
pub use series::{SeriesBatch, SeriesKey};
pub use tag::{Tag, TagBatch, TAG_TYPE_EVENT, TAG_TYPE_LINK, TAG_TYPE_RESOURCE, TAG_TYPE_SPAN};

use crate::cache::ClockCache;
use crate::model::CatalogId;
use std::sync::Arc;

const SCHEMA_URL_CACHE_SIZE: usize = 1000;
const OPERATION_CACHE_SIZE: usize = 1000;
const INSTRUMENTATION_LIB_CACHE_SIZE: usize = 1000;
const TAG_CACHE_SIZE: usize = 1000;

/// Default entry capacity for the shared series cache.
pub const DEFAULT_SERIES_CACHE_SIZE: usize = 100_000;

/// Shared cache for series resolution, used by all copiers.
pub type SeriesCache = ClockCache<SeriesKey, CatalogId>;

pub fn new_series_cache(max_entries: usize) -> Arc<SeriesCache> {
    Arc::new(ClockCache::with_max(max_entries))
}

/// Owns the per-kind caches shared across concurrent trace-ingest
/// batches.
pub struct TraceCatalog {
    schema_urls: Arc<ClockCache<SchemaUrl, CatalogId>>,
    operations: Arc<ClockCache<Operation, CatalogId>>,
    instrumentation_libs: Arc<ClockCache<InstrumentationLibrary, CatalogId>>,
    tags: Arc<ClockCache<Tag, CatalogId>>,
}

impl TraceCatalog {
    pub fn new() -> Self {
        Self {
            schema_urls: Arc::new(ClockCache::with_max(SCHEMA_URL_CACHE_SIZE)),
            operations: Arc::new(ClockCache::with_max(OPERATION_CACHE_SIZE)),
            instrumentation_libs: Arc::new(ClockCache::with_max(INSTRUMENTATION_LIB_CACHE_SIZE)),
            tags: Arc::new(ClockCache::with_max(TAG_CACHE_SIZE)),
        }
    }

    pub fn schema_url_batch(&self) -> SchemaUrlBatch {
        SchemaUrlBatch::new(self.schema_urls.clone())
    }

    pub fn operation_batch(&self) -> OperationBatch {
        OperationBatch::new(self.operations.clone())
    }

    pub fn instrumentation_library_batch(&self) -> InstrumentationLibraryBatch {
        InstrumentationLibraryBatch::new(self.instrumentation_libs.clone())
    }

    pub fn tag_batch(&self) -> TagBatch {
        TagBatch::new(self.tags.clone())
    }
}

impl Default for TraceCatalog {
    fn default() -> Self {
        Self::new()
    }
}

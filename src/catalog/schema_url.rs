//! Schema URL catalog batch.

use super::batch::{Batcher, Queueable};
use crate::cache::ClockCache;
use crate::model::CatalogId;
use crate::store::{schema, BatchResults, Connection, SqlValue};
use crate::Result;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A non-empty schema URL. Submission order is lexicographic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaUrl(String);

impl Queueable for SchemaUrl {
    fn queries(&self) -> Vec<(String, Vec<SqlValue>)> {
        vec![(
            format!("SELECT {}.put_schema_url($1)", schema::TRACE),
            vec![SqlValue::Text(self.0.clone())],
        )]
    }

    fn result(&self, results: &mut BatchResults) -> Result<CatalogId> {
        results.query_row()?.get_int8(0)
    }

    fn size_in_cache(&self) -> u64 {
        self.0.len() as u64 + 9
    }
}

/// Typed façade: empty URLs short-circuit to a null id and are never
/// sent to the store.
pub struct SchemaUrlBatch {
    b: Batcher<SchemaUrl>,
}

impl SchemaUrlBatch {
    pub fn new(cache: Arc<ClockCache<SchemaUrl, CatalogId>>) -> Self {
        Self {
            b: Batcher::new(cache),
        }
    }

    pub fn queue(&mut self, url: &str) {
        if url.is_empty() {
            return;
        }
        self.b.queue(SchemaUrl(url.to_string()));
    }

    pub async fn send_batch(
        &mut self,
        cancel: &CancellationToken,
        conn: &dyn Connection,
    ) -> Result<()> {
        self.b.send_batch(cancel, conn).await
    }

    pub fn get_id(&self, url: &str) -> Result<CatalogId> {
        if url.is_empty() {
            return Ok(None);
        }
        self.b.get_id(&SchemaUrl(url.to_string())).map(Some)
    }
}

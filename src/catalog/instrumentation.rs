//! Instrumentation library catalog batch.

use super::batch::{Batcher, Queueable};
use crate::cache::ClockCache;
use crate::model::CatalogId;
use crate::store::{schema, BatchResults, Connection, SqlValue};
use crate::Result;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// An instrumentation library. Submission order is lexicographic on
/// `(name, version, schema_url_id)` with null ids ordered before
/// present ones, which derived `Ord` on `Option<i64>` gives us.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrumentationLibrary {
    name: String,
    version: String,
    schema_url_id: CatalogId,
}

impl Queueable for InstrumentationLibrary {
    fn queries(&self) -> Vec<(String, Vec<SqlValue>)> {
        vec![(
            format!("SELECT {}.put_instrumentation_lib($1, $2, $3)", schema::TRACE),
            vec![
                SqlValue::Text(self.name.clone()),
                SqlValue::Text(self.version.clone()),
                SqlValue::Int8(self.schema_url_id),
            ],
        )]
    }

    fn result(&self, results: &mut BatchResults) -> Result<CatalogId> {
        results.query_row()?.get_int8(0)
    }

    fn size_in_cache(&self) -> u64 {
        // two bigint-sized cells: the schema url id and the resolved id
        (self.name.len() + self.version.len()) as u64 + 18
    }
}

/// Typed façade: empty-name libraries short-circuit to a null id and
/// are never sent to the store.
pub struct InstrumentationLibraryBatch {
    b: Batcher<InstrumentationLibrary>,
}

impl InstrumentationLibraryBatch {
    pub fn new(cache: Arc<ClockCache<InstrumentationLibrary, CatalogId>>) -> Self {
        Self {
            b: Batcher::new(cache),
        }
    }

    pub fn queue(&mut self, name: &str, version: &str, schema_url_id: CatalogId) {
        if name.is_empty() {
            return;
        }
        self.b.queue(InstrumentationLibrary {
            name: name.to_string(),
            version: version.to_string(),
            schema_url_id,
        });
    }

    pub async fn send_batch(
        &mut self,
        cancel: &CancellationToken,
        conn: &dyn Connection,
    ) -> Result<()> {
        self.b.send_batch(cancel, conn).await
    }

    pub fn get_id(&self, name: &str, version: &str, schema_url_id: CatalogId) -> Result<CatalogId> {
        if name.is_empty() {
            return Ok(None);
        }
        self.b
            .get_id(&InstrumentationLibrary {
                name: name.to_string(),
                version: version.to_string(),
                schema_url_id,
            })
            .map(Some)
    }
}

//! Tag catalog batch.

use super::batch::{Batcher, Queueable};
use crate::cache::ClockCache;
use crate::model::CatalogId;
use crate::store::{schema, BatchResults, Connection, SqlValue};
use crate::Result;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Bitmask marking which span positions a tag appears in.
pub const TAG_TYPE_SPAN: i64 = 1;
pub const TAG_TYPE_RESOURCE: i64 = 2;
pub const TAG_TYPE_EVENT: i64 = 4;
pub const TAG_TYPE_LINK: i64 = 8;

/// A tag key/value pair. The value is canonical JSON text (serde_json
/// sorts object keys), so equal values always hash and compare equal.
/// Submission order is `(key, value, typ)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    key: String,
    value: String,
    typ: i64,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: &serde_json::Value, typ: i64) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
            typ,
        }
    }
}

impl Queueable for Tag {
    fn queries(&self) -> Vec<(String, Vec<SqlValue>)> {
        vec![(
            format!("SELECT {}.put_tag($1, $2::jsonb, $3)", schema::TRACE),
            vec![
                SqlValue::Text(self.key.clone()),
                SqlValue::Json(self.value.clone()),
                SqlValue::Int8(Some(self.typ)),
            ],
        )]
    }

    fn result(&self, results: &mut BatchResults) -> Result<CatalogId> {
        results.query_row()?.get_int8(0)
    }

    fn size_in_cache(&self) -> u64 {
        (self.key.len() + self.value.len()) as u64 + 17
    }
}

/// Typed façade: empty-key tags short-circuit to a null id and are
/// never sent to the store.
pub struct TagBatch {
    b: Batcher<Tag>,
}

impl TagBatch {
    pub fn new(cache: Arc<ClockCache<Tag, CatalogId>>) -> Self {
        Self {
            b: Batcher::new(cache),
        }
    }

    pub fn queue(&mut self, key: &str, value: &serde_json::Value, typ: i64) {
        if key.is_empty() {
            return;
        }
        self.b.queue(Tag::new(key, value, typ));
    }

    pub async fn send_batch(
        &mut self,
        cancel: &CancellationToken,
        conn: &dyn Connection,
    ) -> Result<()> {
        self.b.send_batch(cancel, conn).await
    }

    pub fn get_id(&self, key: &str, value: &serde_json::Value, typ: i64) -> Result<CatalogId> {
        if key.is_empty() {
            return Ok(None);
        }
        self.b.get_id(&Tag::new(key, value, typ)).map(Some)
    }
}

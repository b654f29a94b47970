//! Operation catalog batch.

use super::batch::{Batcher, Queueable};
use crate::cache::ClockCache;
use crate::model::CatalogId;
use crate::store::{schema, BatchResults, Connection, SqlValue};
use crate::Result;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A span operation. Field order gives the submission order:
/// lexicographic on `(service_name, span_name, span_kind)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Operation {
    service_name: String,
    span_name: String,
    span_kind: String,
}

impl Queueable for Operation {
    fn queries(&self) -> Vec<(String, Vec<SqlValue>)> {
        vec![(
            format!("SELECT {}.put_operation($1, $2, $3)", schema::TRACE),
            vec![
                SqlValue::Text(self.service_name.clone()),
                SqlValue::Text(self.span_name.clone()),
                SqlValue::Text(self.span_kind.clone()),
            ],
        )]
    }

    fn result(&self, results: &mut BatchResults) -> Result<CatalogId> {
        results.query_row()?.get_int8(0)
    }

    fn size_in_cache(&self) -> u64 {
        (self.service_name.len() + self.span_name.len() + self.span_kind.len()) as u64 + 9
    }
}

pub struct OperationBatch {
    b: Batcher<Operation>,
}

impl OperationBatch {
    pub fn new(cache: Arc<ClockCache<Operation, CatalogId>>) -> Self {
        Self {
            b: Batcher::new(cache),
        }
    }

    pub fn queue(&mut self, service_name: &str, span_name: &str, span_kind: &str) {
        self.b.queue(Operation {
            service_name: service_name.to_string(),
            span_name: span_name.to_string(),
            span_kind: span_kind.to_string(),
        });
    }

    pub async fn send_batch(
        &mut self,
        cancel: &CancellationToken,
        conn: &dyn Connection,
    ) -> Result<()> {
        self.b.send_batch(cancel, conn).await
    }

    pub fn get_id(&self, service_name: &str, span_name: &str, span_kind: &str) -> Result<i64> {
        self.b.get_id(&Operation {
            service_name: service_name.to_string(),
            span_name: span_name.to_string(),
            span_kind: span_kind.to_string(),
        })
    }
}

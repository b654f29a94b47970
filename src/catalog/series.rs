//! Series resolution through the catalog batcher.
//!
//! The copier resolves unresolved series references with the same
//! batch-sort-pipeline pattern as the trace entities, keyed by the
//! metric name and the normalized label set.

use super::batch::{Batcher, Queueable};
use crate::cache::ClockCache;
use crate::model::{CatalogId, Label};
use crate::store::{schema, BatchResults, Connection, SqlValue};
use crate::Result;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Catalog identity of a series: metric name plus normalized labels.
///
/// Normalization drops empty-valued labels and orders pairs by name, so
/// producer label ordering never splits one series into two.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    metric: String,
    labels: Vec<Label>,
}

impl SeriesKey {
    pub fn new(metric: impl Into<String>, labels: &[Label]) -> Self {
        let mut labels: Vec<Label> = labels
            .iter()
            .filter(|l| !l.value.is_empty())
            .cloned()
            .collect();
        labels.sort();
        Self {
            metric: metric.into(),
            labels,
        }
    }

    fn labels_json(&self) -> String {
        let mut map = serde_json::Map::new();
        for label in &self.labels {
            map.insert(
                label.name.clone(),
                serde_json::Value::String(label.value.clone()),
            );
        }
        serde_json::Value::Object(map).to_string()
    }
}

impl Queueable for SeriesKey {
    fn queries(&self) -> Vec<(String, Vec<SqlValue>)> {
        vec![(
            format!(
                "SELECT {}.get_or_create_series_id($1, $2::jsonb)",
                schema::CATALOG
            ),
            vec![
                SqlValue::Text(self.metric.clone()),
                SqlValue::Json(self.labels_json()),
            ],
        )]
    }

    fn result(&self, results: &mut BatchResults) -> Result<CatalogId> {
        results.query_row()?.get_int8(0)
    }

    fn size_in_cache(&self) -> u64 {
        let label_bytes: usize = self
            .labels
            .iter()
            .map(|l| l.name.len() + l.value.len())
            .sum();
        (self.metric.len() + label_bytes) as u64 + 9
    }
}

pub struct SeriesBatch {
    b: Batcher<SeriesKey>,
}

impl SeriesBatch {
    pub fn new(cache: Arc<ClockCache<SeriesKey, CatalogId>>) -> Self {
        Self {
            b: Batcher::new(cache),
        }
    }

    pub fn queue(&mut self, key: SeriesKey) {
        self.b.queue(key);
    }

    pub async fn send_batch(
        &mut self,
        cancel: &CancellationToken,
        conn: &dyn Connection,
    ) -> Result<()> {
        self.b.send_batch(cancel, conn).await
    }

    pub fn get_id(&self, key: &SeriesKey) -> Result<i64> {
        self.b.get_id(key)
    }

    pub fn is_empty(&self) -> bool {
        self.b.is_empty()
    }
}

//! Metric table-name cache shared by all metric batchers.

use super::ClockCache;
use crate::model::MetricInfo;

/// Default entry capacity for the shared metric cache.
pub const DEFAULT_METRIC_CACHE_SIZE: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetricKey {
    schema: String,
    metric: String,
}

/// Cache of `(table schema, metric name) -> MetricInfo`.
///
/// Resolved table names are stable for the lifetime of the process, so a
/// `set` never replaces an entry that already carries a non-empty table
/// name.
pub struct MetricCache {
    cache: ClockCache<MetricKey, MetricInfo>,
}

impl MetricCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: ClockCache::with_max(max_entries),
        }
    }

    pub fn get(&self, schema: &str, metric: &str) -> Option<MetricInfo> {
        self.cache.get(&MetricKey {
            schema: schema.to_string(),
            metric: metric.to_string(),
        })
    }

    pub fn set(&self, schema: &str, metric: &str, info: MetricInfo) {
        let key = MetricKey {
            schema: schema.to_string(),
            metric: metric.to_string(),
        };
        if let Some(existing) = self.cache.get(&key) {
            if !existing.table_name.is_empty() {
                return;
            }
        }
        let size = (key.schema.len()
            + key.metric.len()
            + info.table_schema.len()
            + info.table_name.len()
            + info.series_table.len()) as u64;
        self.cache.insert(key, info, size);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for MetricCache {
    fn default() -> Self {
        Self::new(DEFAULT_METRIC_CACHE_SIZE)
    }
}

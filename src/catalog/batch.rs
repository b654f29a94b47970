//! Deduplicating write-batcher for catalog entities.
//!
//! A batcher accumulates candidate items, resolves them against the
//! shared cache, and sends the remainder to the store as one pipelined
//! round-trip. Items are sorted before sending: the database-side upsert
//! routines take row locks in natural-key order, and concurrent batchers
//! submitting in that same order is the sole mechanism preventing
//! database deadlocks. Do not remove the sort.

use crate::cache::ClockCache;
use crate::model::CatalogId;
use crate::store::{BatchResults, Connection, SqlBatch, SqlValue};
use crate::{Error, Result};

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Capability set for entities resolvable through a [`Batcher`].
///
/// The `Ord` bound is the total order items are submitted in; it must
/// match the natural-key order the database routines lock by. One
/// batcher holds one entity type, so cross-variant comparison does not
/// arise.
pub trait Queueable: Clone + Eq + Ord + Hash + Debug + Send + Sync {
    /// SQL statements and bound arguments, usually one statement
    /// returning one row.
    fn queries(&self) -> Vec<(String, Vec<SqlValue>)>;

    /// Consume this item's result row(s) from the pipelined response.
    fn result(&self, results: &mut BatchResults) -> Result<CatalogId>;

    /// Bytes this entry accounts for in the cache.
    fn size_in_cache(&self) -> u64;
}

/// Short-lived batch of one catalog entity type.
///
/// Duplicates queued into the same batch are folded; items whose id is
/// already cached are resolved without touching the store.
pub struct Batcher<Q: Queueable> {
    batch: HashMap<Q, Option<CatalogId>>,
    cache: Arc<ClockCache<Q, CatalogId>>,
}

impl<Q: Queueable> Batcher<Q> {
    pub fn new(cache: Arc<ClockCache<Q, CatalogId>>) -> Self {
        Self {
            batch: HashMap::new(),
            cache,
        }
    }

    /// Add `item` to the pending set. Set semantics: queueing the same
    /// item twice issues one SQL invocation.
    pub fn queue(&mut self, item: Q) {
        self.batch.entry(item).or_insert(None);
    }

    /// Resolve all pending items in one pipelined round-trip.
    ///
    /// Returns the first error observed; on error the local map and the
    /// cache are left without results for this batch.
    pub async fn send_batch(
        &mut self,
        cancel: &CancellationToken,
        conn: &dyn Connection,
    ) -> Result<()> {
        let cache = &self.cache;
        let mut to_resolve: Vec<Q> = Vec::new();
        for (item, slot) in self.batch.iter_mut() {
            if slot.is_some() {
                continue;
            }
            match cache.get(item) {
                Some(id) => *slot = Some(id),
                None => to_resolve.push(item.clone()),
            }
        }

        if to_resolve.is_empty() {
            return Ok(());
        }

        // Mandatory: impose the global lock-acquisition order shared by
        // every concurrent batcher of this entity type.
        to_resolve.sort();

        let mut db_batch = SqlBatch::new();
        for item in &to_resolve {
            for (sql, args) in item.queries() {
                db_batch.queue(sql, args);
            }
        }

        let mut results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Canceled),
            res = conn.send_batch(db_batch) => res?,
        };

        let mut resolved = Vec::with_capacity(to_resolve.len());
        let mut first_err = None;
        for item in &to_resolve {
            match item.result(&mut results) {
                Ok(id) => resolved.push((item.clone(), id)),
                Err(e) => {
                    first_err = Some(e);
                    break;
                }
            }
        }

        // The close error counts only when no prior error was seen.
        let close_result = results.close();
        if let Some(err) = first_err {
            return Err(err);
        }
        close_result?;

        for (item, id) in resolved {
            let size = item.size_in_cache();
            self.cache.insert(item.clone(), id, size);
            self.batch.insert(item, Some(id));
        }
        Ok(())
    }

    /// Retrieve a previously resolved result.
    pub fn get(&self, item: &Q) -> Result<CatalogId> {
        match self.batch.get(item) {
            Some(Some(id)) => Ok(*id),
            _ => Err(Error::BatchLookup(format!("{item:?}"))),
        }
    }

    /// Typed accessor: errors on missing, null, or zero-valued ids.
    pub fn get_id(&self, item: &Q) -> Result<i64> {
        match self.get(item)? {
            Some(0) => Err(Error::ZeroCatalogId(format!("{item:?}"))),
            Some(id) => Ok(id),
            None => Err(Error::NullCatalogId(format!("{item:?}"))),
        }
    }

    /// Number of distinct items queued.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

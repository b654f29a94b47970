//! In-memory store for development and tests.
//!
//! Implements the stored-routine surface of the real catalog with dense
//! ids starting at 1, captures bulk-copied rows for inspection, and
//! offers failure injection for exercising the pipeline's error paths.

use super::{BatchResults, Connection, CopyRow, SqlBatch, SqlRow, SqlValue};
use crate::model::CatalogId;
use crate::{Error, Result};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Default)]
struct Tables {
    schema_urls: HashMap<String, i64>,
    operations: HashMap<(String, String, String), i64>,
    instrumentation_libs: HashMap<(String, String, CatalogId), i64>,
    tags: HashMap<(String, String, i64), i64>,
    series: HashMap<(String, String), i64>,
    metric_tables: HashMap<String, String>,
    copied: HashMap<String, Vec<CopyRow>>,
    statement_log: Vec<String>,
    empty_table_metrics: HashSet<String>,
    next_schema_url_id: i64,
    next_operation_id: i64,
    next_instrumentation_lib_id: i64,
    next_tag_id: i64,
    next_series_id: i64,
}

/// Counters sampled from a [`MemStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemStoreStats {
    pub queries: u64,
    pub batches_sent: u64,
    pub statements_executed: u64,
    pub copies: u64,
    pub rows_copied: u64,
    pub finalize_calls: u64,
}

/// In-memory [`Connection`] implementation.
#[derive(Default)]
pub struct MemStore {
    tables: Mutex<Tables>,
    queries: AtomicU64,
    batches_sent: AtomicU64,
    statements_executed: AtomicU64,
    copies: AtomicU64,
    rows_copied: AtomicU64,
    finalize_calls: AtomicU64,
    copy_failures: AtomicU32,
    batch_failures: AtomicU32,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `get_or_create_metric_table_name` return an empty table name
    /// for `metric`, which the batcher must treat as an error.
    pub fn return_empty_table_for(&self, metric: &str) {
        self.tables
            .lock()
            .empty_table_metrics
            .insert(metric.to_string());
    }

    /// Stop returning an empty table name for `metric`.
    pub fn clear_empty_table_for(&self, metric: &str) {
        self.tables.lock().empty_table_metrics.remove(metric);
    }

    /// Fail the next `n` copy attempts with a transient store error.
    pub fn fail_next_copies(&self, n: u32) {
        self.copy_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` batch sends with a transient store error.
    pub fn fail_next_batches(&self, n: u32) {
        self.batch_failures.store(n, Ordering::SeqCst);
    }

    pub fn stats(&self) -> MemStoreStats {
        MemStoreStats {
            queries: self.queries.load(Ordering::SeqCst),
            batches_sent: self.batches_sent.load(Ordering::SeqCst),
            statements_executed: self.statements_executed.load(Ordering::SeqCst),
            copies: self.copies.load(Ordering::SeqCst),
            rows_copied: self.rows_copied.load(Ordering::SeqCst),
            finalize_calls: self.finalize_calls.load(Ordering::SeqCst),
        }
    }

    /// Executed routine invocations, rendered in execution order.
    pub fn statement_log(&self) -> Vec<String> {
        self.tables.lock().statement_log.clone()
    }

    /// Rows bulk-copied into `table`, in copy order.
    pub fn copied_rows(&self, table: &str) -> Vec<CopyRow> {
        self.tables
            .lock()
            .copied
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// The table name registered for `metric`, if any.
    pub fn metric_table(&self, metric: &str) -> Option<String> {
        self.tables.lock().metric_tables.get(metric).cloned()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn log_statement(tables: &mut Tables, name: &str, args: &[SqlValue]) {
        let rendered = args
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        tables.statement_log.push(format!("{name}({rendered})"));
    }

    fn execute(&self, tables: &mut Tables, sql: &str, args: &[SqlValue]) -> Result<SqlRow> {
        self.statements_executed.fetch_add(1, Ordering::SeqCst);
        if sql.contains("put_schema_url") {
            Self::log_statement(tables, "put_schema_url", args);
            let url = text_arg(args, 0)?.to_string();
            let next = &mut tables.next_schema_url_id;
            let id = *tables.schema_urls.entry(url).or_insert_with(|| {
                *next += 1;
                *next
            });
            Ok(SqlRow::new(vec![SqlValue::Int8(Some(id))]))
        } else if sql.contains("put_operation") {
            Self::log_statement(tables, "put_operation", args);
            let key = (
                text_arg(args, 0)?.to_string(),
                text_arg(args, 1)?.to_string(),
                text_arg(args, 2)?.to_string(),
            );
            let next = &mut tables.next_operation_id;
            let id = *tables.operations.entry(key).or_insert_with(|| {
                *next += 1;
                *next
            });
            Ok(SqlRow::new(vec![SqlValue::Int8(Some(id))]))
        } else if sql.contains("put_instrumentation_lib") {
            Self::log_statement(tables, "put_instrumentation_lib", args);
            let key = (
                text_arg(args, 0)?.to_string(),
                text_arg(args, 1)?.to_string(),
                int8_arg(args, 2)?,
            );
            let next = &mut tables.next_instrumentation_lib_id;
            let id = *tables.instrumentation_libs.entry(key).or_insert_with(|| {
                *next += 1;
                *next
            });
            Ok(SqlRow::new(vec![SqlValue::Int8(Some(id))]))
        } else if sql.contains("put_tag") {
            Self::log_statement(tables, "put_tag", args);
            let typ = int8_arg(args, 2)?
                .ok_or_else(|| Error::Store("put_tag: null tag type".to_string()))?;
            let key = (
                text_arg(args, 0)?.to_string(),
                json_arg(args, 1)?.to_string(),
                typ,
            );
            let next = &mut tables.next_tag_id;
            let id = *tables.tags.entry(key).or_insert_with(|| {
                *next += 1;
                *next
            });
            Ok(SqlRow::new(vec![SqlValue::Int8(Some(id))]))
        } else if sql.contains("get_or_create_series_id") {
            Self::log_statement(tables, "get_or_create_series_id", args);
            let key = (
                text_arg(args, 0)?.to_string(),
                json_arg(args, 1)?.to_string(),
            );
            let next = &mut tables.next_series_id;
            let id = *tables.series.entry(key).or_insert_with(|| {
                *next += 1;
                *next
            });
            Ok(SqlRow::new(vec![SqlValue::Int8(Some(id))]))
        } else if sql.contains("get_or_create_metric_table_name") {
            Self::log_statement(tables, "get_or_create_metric_table_name", args);
            let metric = text_arg(args, 0)?.to_string();
            if tables.empty_table_metrics.contains(&metric) {
                return Ok(SqlRow::new(vec![
                    SqlValue::Text(String::new()),
                    SqlValue::Bool(true),
                ]));
            }
            let created = !tables.metric_tables.contains_key(&metric);
            let table = tables
                .metric_tables
                .entry(metric.clone())
                .or_insert(metric)
                .clone();
            Ok(SqlRow::new(vec![
                SqlValue::Text(table),
                SqlValue::Bool(created),
            ]))
        } else if sql.contains("finalize_metric_creation") {
            Self::log_statement(tables, "finalize_metric_creation", args);
            self.finalize_calls.fetch_add(1, Ordering::SeqCst);
            Ok(SqlRow::default())
        } else {
            Err(Error::Store(format!("unknown statement: {sql}")))
        }
    }
}

#[async_trait]
impl Connection for MemStore {
    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.tables.lock();
        let row = self.execute(&mut tables, sql, args)?;
        Ok(vec![row])
    }

    async fn send_batch(&self, batch: SqlBatch) -> Result<BatchResults> {
        if Self::take_failure(&self.batch_failures) {
            return Err(Error::Store("injected batch failure".to_string()));
        }
        self.batches_sent.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.tables.lock();
        let mut rows = Vec::with_capacity(batch.len());
        for (sql, args) in batch.statements() {
            rows.push(self.execute(&mut tables, sql, args));
        }
        Ok(BatchResults::new(rows))
    }

    async fn copy_samples(&self, table: &str, rows: &[CopyRow]) -> Result<u64> {
        if Self::take_failure(&self.copy_failures) {
            return Err(Error::Store("injected copy failure".to_string()));
        }
        self.copies.fetch_add(1, Ordering::SeqCst);
        self.rows_copied.fetch_add(rows.len() as u64, Ordering::SeqCst);
        let mut tables = self.tables.lock();
        tables
            .copied
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(rows);
        Ok(rows.len() as u64)
    }
}

fn text_arg(args: &[SqlValue], idx: usize) -> Result<&str> {
    match args.get(idx) {
        Some(SqlValue::Text(s)) => Ok(s),
        other => Err(Error::Store(format!("argument {idx} is not text: {other:?}"))),
    }
}

fn int8_arg(args: &[SqlValue], idx: usize) -> Result<CatalogId> {
    match args.get(idx) {
        Some(SqlValue::Int8(id)) => Ok(*id),
        other => Err(Error::Store(format!("argument {idx} is not int8: {other:?}"))),
    }
}

fn json_arg(args: &[SqlValue], idx: usize) -> Result<&str> {
    match args.get(idx) {
        Some(SqlValue::Json(s)) => Ok(s),
        other => Err(Error::Store(format!("argument {idx} is not json: {other:?}"))),
    }
}

//! Backing store contract
//!
//! The relational store is an external collaborator: this module defines
//! the connection trait the pipeline is written against, with an
//! in-memory implementation for development and tests and a Postgres
//! implementation for production. Catalog upserts live in stored
//! routines on the database side; their SQL bodies are not part of this
//! crate.

mod mem;
mod postgres;

pub use mem::{MemStore, MemStoreStats};
pub use postgres::PgStore;

use crate::model::CatalogId;
use crate::{Error, Result};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Schema names the stored routines live under.
pub mod schema {
    /// Metric catalog schema (`get_or_create_metric_table_name`, ...).
    pub const CATALOG: &str = "_fluxgate_catalog";
    /// Trace catalog schema (`put_schema_url`, `put_operation`, ...).
    pub const TRACE: &str = "_fluxgate_trace";
    /// Schema holding the per-metric data tables.
    pub const DATA: &str = "fluxgate_data";
}

/// A bound SQL argument.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    /// Nullable bigint; `None` is SQL null.
    Int8(CatalogId),
    Bool(bool),
    Float8(f64),
    /// jsonb payload carried as canonical text.
    Json(String),
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Text(s) => write!(f, "'{s}'"),
            SqlValue::Int8(Some(v)) => write!(f, "{v}"),
            SqlValue::Int8(None) => write!(f, "NULL"),
            SqlValue::Bool(b) => write!(f, "{b}"),
            SqlValue::Float8(v) => write!(f, "{v}"),
            SqlValue::Json(s) => write!(f, "'{s}'"),
        }
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlRow {
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    pub fn get_text(&self, idx: usize) -> Result<&str> {
        match self.values.get(idx) {
            Some(SqlValue::Text(s)) => Ok(s),
            _ => Err(Error::Store(format!("column {idx} is not text"))),
        }
    }

    pub fn get_bool(&self, idx: usize) -> Result<bool> {
        match self.values.get(idx) {
            Some(SqlValue::Bool(b)) => Ok(*b),
            _ => Err(Error::Store(format!("column {idx} is not bool"))),
        }
    }

    /// Nullable bigint column; `Ok(None)` is SQL null.
    pub fn get_int8(&self, idx: usize) -> Result<CatalogId> {
        match self.values.get(idx) {
            Some(SqlValue::Int8(id)) => Ok(*id),
            _ => Err(Error::Store(format!("column {idx} is not int8"))),
        }
    }
}

/// An ordered set of statements submitted as one pipelined round-trip.
#[derive(Debug, Default)]
pub struct SqlBatch {
    statements: Vec<(String, Vec<SqlValue>)>,
}

impl SqlBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, sql: impl Into<String>, args: Vec<SqlValue>) {
        self.statements.push((sql.into(), args));
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[(String, Vec<SqlValue>)] {
        &self.statements
    }
}

/// Results of a pipelined batch, consumed one row per statement in
/// submission order.
#[derive(Debug)]
pub struct BatchResults {
    rows: VecDeque<Result<SqlRow>>,
    close_err: Option<Error>,
}

impl BatchResults {
    pub fn new(rows: Vec<Result<SqlRow>>) -> Self {
        Self {
            rows: rows.into(),
            close_err: None,
        }
    }

    pub fn with_close_err(mut self, err: Error) -> Self {
        self.close_err = Some(err);
        self
    }

    /// Consume the next pipelined result row.
    pub fn query_row(&mut self) -> Result<SqlRow> {
        match self.rows.pop_front() {
            Some(row) => row,
            None => Err(Error::Store("batch results exhausted".to_string())),
        }
    }

    /// Release the pipeline. The close error is reported here so callers
    /// can fold it in only when no prior error was seen.
    pub fn close(self) -> Result<()> {
        match self.close_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// One row of a bulk sample copy into a metric table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CopyRow {
    pub series_id: i64,
    pub timestamp: i64,
    pub value: f64,
}

/// Backing store connection.
///
/// Implementations are internally pooled; each `send_batch` executes on a
/// single connection in submission order, which is what the catalog
/// batcher's deadlock-avoidance sort relies on.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run one statement and collect its rows.
    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>>;

    /// Submit a pipelined batch.
    async fn send_batch(&self, batch: SqlBatch) -> Result<BatchResults>;

    /// Bulk copy samples into a metric table, returning rows written.
    async fn copy_samples(&self, table: &str, rows: &[CopyRow]) -> Result<u64>;
}

/// Shared handle to a store connection.
pub type ConnectionRef = Arc<dyn Connection>;

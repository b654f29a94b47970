//! Postgres-backed store over a sqlx connection pool.

use super::{schema, BatchResults, Connection, CopyRow, SqlBatch, SqlRow, SqlValue};
use crate::{Error, Result};

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Pool, Postgres, Row, TypeInfo};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// [`Connection`] implementation over a Postgres pool.
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    /// Connect to the given DSN with the default pool sizing.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn bind_args<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &[SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for arg in args {
        query = match arg {
            SqlValue::Text(s) => query.bind(s.clone()),
            SqlValue::Int8(id) => query.bind(*id),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Float8(v) => query.bind(*v),
            // jsonb parameters are cast in the statement text ($n::jsonb)
            SqlValue::Json(s) => query.bind(s.clone()),
        };
    }
    query
}

fn convert_row(row: &PgRow) -> Result<SqlRow> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "TEXT" | "VARCHAR" | "NAME" | "CHAR" => {
                SqlValue::Text(row.try_get::<Option<String>, _>(idx)?.unwrap_or_default())
            }
            "INT8" | "BIGINT" => SqlValue::Int8(row.try_get::<Option<i64>, _>(idx)?),
            "BOOL" => SqlValue::Bool(row.try_get::<Option<bool>, _>(idx)?.unwrap_or(false)),
            "FLOAT8" | "DOUBLE PRECISION" => {
                SqlValue::Float8(row.try_get::<Option<f64>, _>(idx)?.unwrap_or(0.0))
            }
            other => {
                return Err(Error::Store(format!(
                    "unsupported column type {other} at index {idx}"
                )))
            }
        };
        values.push(value);
    }
    Ok(SqlRow::new(values))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl Connection for PgStore {
    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let rows = bind_args(sqlx::query(sql), args)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(convert_row).collect()
    }

    async fn send_batch(&self, batch: SqlBatch) -> Result<BatchResults> {
        // All statements of a batch run on one connection in submission
        // order; the catalog batcher's sort assumes exactly this.
        let mut conn = self.pool.acquire().await?;
        let mut rows = Vec::with_capacity(batch.len());
        for (sql, args) in batch.statements() {
            let result = bind_args(sqlx::query(sql.as_str()), args)
                .fetch_optional(&mut *conn)
                .await;
            rows.push(match result {
                Ok(Some(row)) => convert_row(&row),
                Ok(None) => Err(Error::Store(format!("no row returned for: {sql}"))),
                Err(e) => Err(Error::from(e)),
            });
        }
        Ok(BatchResults::new(rows))
    }

    async fn copy_samples(&self, table: &str, rows: &[CopyRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut series_ids = Vec::with_capacity(rows.len());
        let mut timestamps = Vec::with_capacity(rows.len());
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            series_ids.push(row.series_id);
            timestamps.push(row.timestamp);
            values.push(row.value);
        }

        let sql = format!(
            "INSERT INTO {}.{} (series_id, ts, value) \
             SELECT * FROM unnest($1::int8[], $2::int8[], $3::float8[])",
            quote_ident(schema::DATA),
            quote_ident(table),
        );
        let result = sqlx::query(&sql)
            .bind(series_ids)
            .bind(timestamps)
            .bind(values)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

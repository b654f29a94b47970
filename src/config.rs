//! Component factory for environment-based configuration
//!
//! Selects the backing store from environment variables, so development
//! runs against the in-memory store and production against Postgres
//! without code changes.

use crate::store::{ConnectionRef, MemStore, PgStore};
use crate::{Error, Result};

use std::sync::Arc;
use tracing::info;

pub struct ComponentFactory;

impl ComponentFactory {
    /// Create a store connection from the environment.
    ///
    /// Environment variables:
    /// - FLUXGATE_STORE: "memory" (default) or "postgres"
    /// - FLUXGATE_DATABASE_URL: Postgres DSN (required for postgres)
    pub async fn create_store() -> Result<ConnectionRef> {
        let backend = std::env::var("FLUXGATE_STORE").unwrap_or_else(|_| "memory".to_string());

        match backend.as_str() {
            "memory" => {
                info!("using in-memory store (development mode)");
                Ok(Arc::new(MemStore::new()))
            }
            "postgres" => {
                let dsn = std::env::var("FLUXGATE_DATABASE_URL").map_err(|_| {
                    Error::Config(
                        "FLUXGATE_DATABASE_URL required when FLUXGATE_STORE=postgres".to_string(),
                    )
                })?;
                info!("using postgres store");
                Ok(Arc::new(PgStore::connect(&dsn).await?))
            }
            other => Err(Error::Config(format!(
                "unknown FLUXGATE_STORE: {other}. Use 'memory' or 'postgres'"
            ))),
        }
    }
}

//! Error types for fluxgate

/// Result type alias for fluxgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for fluxgate
///
/// The enum is `Clone` because a single copy failure fans out to every
/// completion handle retained in a pending buffer; backend errors are
/// stringified at the store boundary instead of carried as sources.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Backing store errors (connection, pipeline send, row decode)
    #[error("store error: {0}")]
    Store(String),
    /// The catalog returned an empty table name for a metric
    #[error("missing table name for metric {metric}")]
    MissingTableName { metric: String },
    /// Metric table resolution failed
    #[error("failed to get the table name for metric {metric}: {reason}")]
    TableResolution { metric: String, reason: String },
    /// A cache or batch entry did not have the expected type
    #[error("invalid cache entry type")]
    InvalidCacheEntryType,
    /// An item was not found in a catalog batch result map
    #[error("error getting {0} from batch")]
    BatchLookup(String),
    /// A catalog ID resolved to SQL null
    #[error("ID for {0} is null")]
    NullCatalogId(String),
    /// A catalog ID resolved to zero; catalog IDs begin at 1
    #[error("ID for {0} is 0")]
    ZeroCatalogId(String),
    /// Configuration errors, detected at startup only
    #[error("configuration error: {0}")]
    Config(String),
    /// A channel closed while a send or receive was in flight
    #[error("ingest pipeline is shut down")]
    PipelineClosed,
    /// The operation's cancellation token fired mid-flight
    #[error("operation canceled")]
    Canceled,
    /// Replay driver errors
    #[error("replay error: {0}")]
    Replay(String),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Store(format!("json encoding: {e}"))
    }
}

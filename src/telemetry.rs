//! Shared tracing bootstrap for fluxgate binaries.

use crate::{Error, Result};

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize the structured-log subscriber for a binary.
pub fn init(log_level: &str) -> Result<()> {
    let level = parse_log_level(log_level)?;
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .try_init()
        .map_err(|e| Error::Config(format!("failed to initialize tracing subscriber: {e}")))
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(Error::Config(format!("unknown log level: {other}"))),
    }
}

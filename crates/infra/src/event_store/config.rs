//! Backend configuration and connection.
//!
//! The DSN is taken from the host environment as a URL and otherwise treated
//! opaquely; only the scheme is inspected to pick a backend.

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use calista_events::{EventStore, EventStoreError};

use super::postgres::PostgresEventStore;
use super::sqlite::SqliteEventStore;

/// Recognized options for opening an event-store backend.
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// Driver URL: a PostgreSQL DSN (`postgres://…`) or a SQLite location
    /// (`sqlite:…`).
    pub dsn: String,
    /// Per-statement timeout; PostgreSQL enforces it server-side, SQLite uses
    /// it as the busy timeout.
    pub statement_timeout: Option<Duration>,
    /// Maximum pooled connections.
    pub pool_size: u32,
}

impl EventStoreConfig {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            statement_timeout: None,
            pool_size: 5,
        }
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }
}

/// Open the backend matching the DSN scheme.
///
/// Connecting does not create the schema; run the matching
/// [`schema`](super::schema) setup against a fresh database first.
pub async fn connect(config: &EventStoreConfig) -> Result<Box<dyn EventStore>, EventStoreError> {
    if config.dsn.starts_with("postgres://") || config.dsn.starts_with("postgresql://") {
        let mut options = PgConnectOptions::from_str(&config.dsn)
            .map_err(|e| EventStoreError::unavailable(format!("invalid postgres dsn: {e}")))?;
        if let Some(timeout) = config.statement_timeout {
            options = options.options([(
                "statement_timeout",
                timeout.as_millis().to_string(),
            )]);
        }
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect_with(options)
            .await
            .map_err(|e| EventStoreError::unavailable(format!("postgres connect: {e}")))?;
        info!(pool_size = config.pool_size, "connected postgres event store");
        return Ok(Box::new(PostgresEventStore::new(pool)));
    }

    if config.dsn.starts_with("sqlite:") {
        let mut options = SqliteConnectOptions::from_str(&config.dsn)
            .map_err(|e| EventStoreError::unavailable(format!("invalid sqlite dsn: {e}")))?
            .create_if_missing(true);
        if let Some(timeout) = config.statement_timeout {
            options = options.busy_timeout(timeout);
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .connect_with(options)
            .await
            .map_err(|e| EventStoreError::unavailable(format!("sqlite connect: {e}")))?;
        info!(pool_size = config.pool_size, "connected sqlite event store");
        return Ok(Box::new(SqliteEventStore::new(pool)));
    }

    Err(EventStoreError::unavailable(format!(
        "unsupported dsn scheme: '{}'",
        config.dsn
    )))
}

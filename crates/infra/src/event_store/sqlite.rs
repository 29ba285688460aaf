//! SQLite-backed event store.
//!
//! Dialect differences from the PostgreSQL backend, all hidden behind the
//! shared contract:
//!
//! - Transactions open with `BEGIN IMMEDIATE` so the write lock is taken up
//!   front instead of on first write (the engine's deferred default can
//!   abort a later statement with `SQLITE_BUSY`).
//! - The insert does not use `RETURNING`; committed rows are re-read by
//!   `(stream_id, version)` inside the same transaction.
//! - JSON is stored as text and re-parsed on read; timestamps are stored as
//!   RFC 3339 text with a `Z` suffix and read back as tz-aware UTC.
//! - The engine reports unique violations by column list, not constraint
//!   name, so error mapping matches on the violated columns.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{Span, instrument};

use calista_core::StreamId;
use calista_events::{
    EventBatch, EventEnvelope, EventStore, EventStoreError, ReadSince, StreamRange,
};

use super::row::envelope_from_columns;

const SELECT_COLUMNS: &str = "global_seq, event_id, stream_type, stream_id, \
     version, event_type, recorded_at, payload, metadata";

/// Append-only event store over SQLite.
#[derive(Debug, Clone)]
pub struct SqliteEventStore {
    pool: Arc<SqlitePool>,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn decode(row: &SqliteRow) -> Result<EventEnvelope, EventStoreError> {
        let global_seq: i64 = get(row, "global_seq")?;
        let event_id: String = get(row, "event_id")?;
        let stream_type: String = get(row, "stream_type")?;
        let stream_id: String = get(row, "stream_id")?;
        let version: i64 = get(row, "version")?;
        let event_type: String = get(row, "event_type")?;
        let recorded_at: String = get(row, "recorded_at")?;
        let payload: String = get(row, "payload")?;
        let metadata: String = get(row, "metadata")?;

        let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                EventStoreError::unavailable(format!(
                    "corrupt event_store row: recorded_at '{recorded_at}': {e}"
                ))
            })?;

        envelope_from_columns(
            global_seq,
            &event_id,
            &stream_type,
            &stream_id,
            version,
            &event_type,
            recorded_at,
            parse_json("payload", &payload)?,
            parse_json("metadata", &metadata)?,
        )
    }

    async fn append_in_tx(
        &self,
        conn: &mut PoolConnection<Sqlite>,
        batch: &EventBatch,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let tip: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM event_store \
             WHERE stream_type = ?1 AND stream_id = ?2",
        )
        .bind(batch.stream_type().as_str())
        .bind(batch.stream_id().as_str())
        .fetch_one(&mut **conn)
        .await
        .map_err(|e| map_sqlx_error("check_stream_tip", e))?;

        if batch.first_version() != tip as u64 + 1 {
            return Err(EventStoreError::conflict(format!(
                "stream '{}' is at version {tip}, batch starts at {}",
                batch.stream_id(),
                batch.first_version()
            )));
        }

        let mut insert = QueryBuilder::new(
            "INSERT INTO event_store \
             (event_id, stream_type, stream_id, version, event_type, payload, metadata) ",
        );
        insert.push_values(batch.events(), |mut b, event| {
            b.push_bind(event.event_id.to_string())
                .push_bind(event.stream_type.as_str())
                .push_bind(event.stream_id.as_str())
                .push_bind(event.version as i64)
                .push_bind(event.event_type.as_str())
                .push_bind(event.payload.to_string())
                .push_bind(event.metadata.to_string());
        });
        insert
            .build()
            .execute(&mut **conn)
            .await
            .map_err(|e| map_sqlx_error("insert_events", e))?;

        // No RETURNING on this engine: re-read what was just written to pick
        // up the assigned global_seq and server-default recorded_at.
        let last_version = batch.first_version() + batch.len() as u64 - 1;
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM event_store \
             WHERE stream_id = ?1 AND version >= ?2 AND version <= ?3 \
             ORDER BY version ASC"
        ))
        .bind(batch.stream_id().as_str())
        .bind(batch.first_version() as i64)
        .bind(last_version as i64)
        .fetch_all(&mut **conn)
        .await
        .map_err(|e| map_sqlx_error("reread_events", e))?;

        if rows.len() != batch.len() {
            return Err(EventStoreError::unavailable(format!(
                "re-read returned {} rows for a batch of {}",
                rows.len(),
                batch.len()
            )));
        }

        rows.iter().map(Self::decode).collect()
    }
}

fn get<'r, T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>>(
    row: &'r SqliteRow,
    column: &str,
) -> Result<T, EventStoreError> {
    row.try_get(column)
        .map_err(|e| EventStoreError::unavailable(format!("failed to decode '{column}': {e}")))
}

fn parse_json(column: &str, raw: &str) -> Result<JsonValue, EventStoreError> {
    serde_json::from_str(raw).map_err(|e| {
        EventStoreError::unavailable(format!("corrupt event_store row: {column}: {e}"))
    })
}

#[async_trait]
impl EventStore for SqliteEventStore {
    #[instrument(
        skip(self, batch),
        fields(
            stream_type = %batch.stream_type(),
            stream_id = %batch.stream_id(),
            event_count = batch.len(),
            first_version = batch.first_version(),
        ),
        err
    )]
    async fn append(&self, batch: EventBatch) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire_connection", e))?;

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let result = self.append_in_tx(&mut conn, &batch).await;

        match result {
            Ok(committed) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| map_sqlx_error("commit_transaction", e))?;
                Span::current().record("committed_events", committed.len());
                Ok(committed)
            }
            Err(err) => {
                // Best effort; the connection rolls back on drop regardless.
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(err)
            }
        }
    }

    #[instrument(skip(self), fields(stream_id = %stream_id), err)]
    async fn read_stream(
        &self,
        stream_id: &StreamId,
        range: StreamRange,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM event_store \
             WHERE stream_id = ?1 \
               AND version >= ?2 \
               AND (?3 IS NULL OR version <= ?3) \
             ORDER BY version ASC \
             LIMIT COALESCE(?4, -1)"
        ))
        .bind(stream_id.as_str())
        .bind(range.from_version() as i64)
        .bind(range.to_version().map(|v| v as i64))
        .bind(range.limit().map(|l| l as i64))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("read_stream", e))?;

        rows.iter().map(Self::decode).collect()
    }

    #[instrument(skip(self), fields(after = filter.after_seq()), err)]
    async fn read_since(
        &self,
        filter: ReadSince,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM event_store \
             WHERE global_seq > ?1 \
               AND (?2 IS NULL OR stream_type = ?2) \
               AND (?3 IS NULL OR event_type = ?3) \
             ORDER BY global_seq ASC \
             LIMIT COALESCE(?4, -1)"
        ))
        .bind(filter.after_seq() as i64)
        .bind(filter.stream_type().map(|t| t.as_str().to_string()))
        .bind(filter.event_type().map(|t| t.as_str().to_string()))
        .bind(filter.limit().map(|l| l as i64))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("read_since", e))?;

        rows.iter().map(Self::decode).collect()
    }
}

/// Map SQLx errors to the closed taxonomy.
///
/// SQLite reports unique violations as `UNIQUE constraint failed:
/// <table>.<column>, ...`; the violated columns identify which of the two
/// named constraints fired.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            if message.contains("UNIQUE constraint failed") {
                if message.contains("event_store.event_id") {
                    return EventStoreError::DuplicateEventId(message);
                }
                return EventStoreError::VersionConflict(message);
            }
            EventStoreError::unavailable(format!("database error in {operation}: {message}"))
        }
        other => EventStoreError::unavailable(format!("{operation}: {other}")),
    }
}

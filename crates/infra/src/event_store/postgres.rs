//! PostgreSQL-backed event store.
//!
//! ## Error mapping
//!
//! SQLx errors are mapped to the closed `EventStoreError` taxonomy:
//!
//! | SQLx error | Detail | `EventStoreError` |
//! |---|---|---|
//! | Database, SQLSTATE `23505` | constraint `uq_event_store_event_id` | `DuplicateEventId` |
//! | Database, SQLSTATE `23505` | constraint `uq_event_store_stream_id_version` | `VersionConflict` |
//! | Database, other | trigger abort, check violation, etc. | `Unavailable` |
//! | Pool / io / protocol / timeout | any | `Unavailable` |
//!
//! ## Thread safety
//!
//! `PostgresEventStore` is `Send + Sync`; the SQLx pool hands out one
//! connection per operation. Each append runs in one transaction — the
//! default `READ COMMITTED` isolation is sufficient because the unique
//! constraints serialize conflicting writers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, QueryBuilder, Row};
use tracing::{Span, instrument};

use calista_core::StreamId;
use calista_events::{
    EventBatch, EventEnvelope, EventStore, EventStoreError, ReadSince, StreamRange,
};

use super::row::envelope_from_columns;
use super::schema::{UQ_EVENT_ID, UQ_STREAM_ID_VERSION};

const SELECT_COLUMNS: &str = "global_seq, event_id, stream_type, stream_id, \
     version, event_type, recorded_at, payload, metadata";

/// Append-only event store over PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn decode(row: &PgRow) -> Result<EventEnvelope, EventStoreError> {
        let global_seq: i64 = get(row, "global_seq")?;
        let event_id: String = get(row, "event_id")?;
        let stream_type: String = get(row, "stream_type")?;
        let stream_id: String = get(row, "stream_id")?;
        let version: i64 = get(row, "version")?;
        let event_type: String = get(row, "event_type")?;
        let recorded_at: DateTime<Utc> = get(row, "recorded_at")?;
        let payload: JsonValue = get(row, "payload")?;
        let metadata: JsonValue = get(row, "metadata")?;
        envelope_from_columns(
            global_seq,
            &event_id,
            &stream_type,
            &stream_id,
            version,
            &event_type,
            recorded_at,
            payload,
            metadata,
        )
    }
}

fn get<'r, T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>>(
    row: &'r PgRow,
    column: &str,
) -> Result<T, EventStoreError> {
    row.try_get(column)
        .map_err(|e| EventStoreError::unavailable(format!("failed to decode '{column}': {e}")))
}

#[async_trait]
impl EventStore for PostgresEventStore {
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
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let tip: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM event_store \
             WHERE stream_type = $1 AND stream_id = $2",
        )
        .bind(batch.stream_type().as_str())
        .bind(batch.stream_id().as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("check_stream_tip", e))?;

        if batch.first_version() != tip as u64 + 1 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
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
                .push_bind(&event.payload)
                .push_bind(&event.metadata);
        });
        insert.push(" RETURNING global_seq, recorded_at");

        let rows = insert
            .build()
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_events", e))?;
        // Release the builder's borrow of the batch before consuming it.
        drop(insert);

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let mut committed = Vec::with_capacity(batch.len());
        for (row, event) in rows.iter().zip(batch.into_events()) {
            let global_seq: i64 = get(row, "global_seq")?;
            let recorded_at: DateTime<Utc> = get(row, "recorded_at")?;
            committed.push(EventEnvelope::from_committed(
                global_seq as u64,
                recorded_at,
                event,
            ));
        }

        Span::current().record("committed_events", committed.len());
        Ok(committed)
    }

    #[instrument(skip(self), fields(stream_id = %stream_id), err)]
    async fn read_stream(
        &self,
        stream_id: &StreamId,
        range: StreamRange,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM event_store \
             WHERE stream_id = $1 \
               AND version >= $2 \
               AND ($3::BIGINT IS NULL OR version <= $3) \
             ORDER BY version ASC \
             LIMIT $4"
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
             WHERE global_seq > $1 \
               AND ($2::TEXT IS NULL OR stream_type = $2) \
               AND ($3::TEXT IS NULL OR event_type = $3) \
             ORDER BY global_seq ASC \
             LIMIT $4"
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
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                let msg = db_err.message().to_string();
                return match db_err.constraint() {
                    Some(UQ_EVENT_ID) => EventStoreError::DuplicateEventId(msg),
                    Some(UQ_STREAM_ID_VERSION) => EventStoreError::VersionConflict(msg),
                    // Unique violation on an unknown constraint still means a
                    // concurrent writer got there first.
                    _ => EventStoreError::VersionConflict(msg),
                };
            }
            EventStoreError::unavailable(format!(
                "database error in {operation}: {}",
                db_err.message()
            ))
        }
        other => EventStoreError::unavailable(format!("{operation}: {other}")),
    }
}

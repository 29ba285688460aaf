//! `event_store` schema for both dialects.
//!
//! Constraint, index, and trigger names are stable: tests and migrations
//! reference them, and the backends disambiguate unique-constraint errors by
//! name. Setup is idempotent and must run before a store is opened against a
//! persisted database.

use sqlx::{PgPool, SqlitePool};

use calista_events::EventStoreError;

/// Unique constraint on `event_id`.
pub const UQ_EVENT_ID: &str = "uq_event_store_event_id";
/// Unique constraint on `(stream_id, version)`.
pub const UQ_STREAM_ID_VERSION: &str = "uq_event_store_stream_id_version";

const POSTGRES_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS event_store (
        global_seq  BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        event_id    VARCHAR(26) NOT NULL,
        stream_type VARCHAR(64) NOT NULL,
        stream_id   VARCHAR(128) NOT NULL,
        version     BIGINT NOT NULL,
        event_type  VARCHAR(128) NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        payload     JSONB NOT NULL,
        metadata    JSONB NOT NULL,
        CONSTRAINT uq_event_store_event_id UNIQUE (event_id),
        CONSTRAINT uq_event_store_stream_id_version UNIQUE (stream_id, version),
        CONSTRAINT ck_event_store_version CHECK (version >= 1),
        CONSTRAINT ck_event_store_event_id_len CHECK (char_length(event_id) = 26)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_event_store_stream_type ON event_store (stream_type)",
    "CREATE INDEX IF NOT EXISTS ix_event_store_event_type ON event_store (event_type)",
    "CREATE INDEX IF NOT EXISTS ix_event_store_payload ON event_store USING GIN (payload)",
    "CREATE INDEX IF NOT EXISTS ix_event_store_metadata ON event_store USING GIN (metadata)",
    r#"
    CREATE OR REPLACE FUNCTION event_store_forbid_mod() RETURNS trigger AS $$
    BEGIN
        RAISE EXCEPTION 'event_store is append-only: % rejected', TG_OP;
    END;
    $$ LANGUAGE plpgsql
    "#,
    "DROP TRIGGER IF EXISTS event_store_forbid_mod ON event_store",
    r#"
    CREATE TRIGGER event_store_forbid_mod
        BEFORE UPDATE OR DELETE ON event_store
        FOR EACH ROW EXECUTE FUNCTION event_store_forbid_mod()
    "#,
];

// SQLite triggers fire on one statement kind each, so the append-only guard
// is a pair sharing the event_store_forbid_mod prefix.
const SQLITE_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS event_store (
        global_seq  INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id    TEXT NOT NULL,
        stream_type TEXT NOT NULL,
        stream_id   TEXT NOT NULL,
        version     INTEGER NOT NULL,
        event_type  TEXT NOT NULL,
        recorded_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        payload     TEXT NOT NULL,
        metadata    TEXT NOT NULL,
        CONSTRAINT uq_event_store_event_id UNIQUE (event_id),
        CONSTRAINT uq_event_store_stream_id_version UNIQUE (stream_id, version),
        CONSTRAINT ck_event_store_version CHECK (version >= 1),
        CONSTRAINT ck_event_store_event_id_len CHECK (length(event_id) = 26)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_event_store_stream_type ON event_store (stream_type)",
    "CREATE INDEX IF NOT EXISTS ix_event_store_event_type ON event_store (event_type)",
    r#"
    CREATE TRIGGER IF NOT EXISTS event_store_forbid_mod_update
        BEFORE UPDATE ON event_store
    BEGIN
        SELECT RAISE(ABORT, 'event_store is append-only');
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS event_store_forbid_mod_delete
        BEFORE DELETE ON event_store
    BEGIN
        SELECT RAISE(ABORT, 'event_store is append-only');
    END
    "#,
];

/// Create the `event_store` table, constraints, indexes, and append-only
/// triggers on a PostgreSQL database.
pub async fn setup_postgres_schema(pool: &PgPool) -> Result<(), EventStoreError> {
    for statement in POSTGRES_DDL {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| EventStoreError::unavailable(format!("schema setup failed: {e}")))?;
    }
    Ok(())
}

/// Create the `event_store` table, constraints, indexes, and append-only
/// triggers on a SQLite database.
pub async fn setup_sqlite_schema(pool: &SqlitePool) -> Result<(), EventStoreError> {
    for statement in SQLITE_DDL {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| EventStoreError::unavailable(format!("schema setup failed: {e}")))?;
    }
    Ok(())
}

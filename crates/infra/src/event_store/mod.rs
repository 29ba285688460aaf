//! Relational event-store backends.
//!
//! Two concrete adapters implement the `calista-events` contract: PostgreSQL
//! (the server engine) and SQLite (the embedded engine). Both enforce the
//! same envelope semantics; dialect differences — JSON storage class,
//! timestamp representation, `RETURNING` support, transaction locking — are
//! hidden behind the shared contract.

pub mod config;
pub mod postgres;
mod row;
pub mod schema;
pub mod sqlite;

pub use config::{EventStoreConfig, connect};
pub use postgres::PostgresEventStore;
pub use sqlite::SqliteEventStore;

//! Infrastructure layer: relational event-store backends and schema setup.

pub mod event_store;


pub use event_store::{
    EventStoreConfig, PostgresEventStore, SqliteEventStore, connect, schema,
};

//! Event envelope model and the append-only event-store contract.
//!
//! This crate defines the unit of persistence (the envelope), the batch shape
//! accepted by `append`, the closed error taxonomy every backend maps into,
//! and an in-memory reference backend for tests and dev mode.

pub mod batch;
pub mod envelope;
pub mod error;
pub mod in_memory;
pub mod store;


pub use batch::EventBatch;
pub use envelope::{EventEnvelope, UncommittedEvent};
pub use error::{EnvelopeViolation, EventStoreError};
pub use in_memory::InMemoryEventStore;
pub use store::{EventStore, RangeError, ReadSince, StreamRange};

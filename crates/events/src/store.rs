//! Append-only event store boundary.
//!
//! The contract is a small capability set — `append`, `read_stream`,
//! `read_since` — implemented by the relational backends and the in-memory
//! fake. Implementations make no claim of non-blocking behavior beyond what
//! their driver provides; callers needing cooperative scheduling bring their
//! own executor.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use calista_core::{EventType, StreamId, StreamType};

use crate::batch::EventBatch;
use crate::envelope::{EventEnvelope, UncommittedEvent};
use crate::error::EventStoreError;

/// Invalid read range. Deliberately not part of [`EventStoreError`]: a bad
/// range is an ordinary argument error, not a store condition.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    #[error("from_version must be >= 1")]
    ZeroFrom,

    #[error("to_version {to} precedes from_version {from}")]
    Inverted { from: u64, to: u64 },
}

/// Version window for `read_stream`, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRange {
    from_version: u64,
    to_version: Option<u64>,
    limit: Option<u64>,
}

impl Default for StreamRange {
    /// The whole stream, from version 1.
    fn default() -> Self {
        Self {
            from_version: 1,
            to_version: None,
            limit: None,
        }
    }
}

impl StreamRange {
    pub fn new(from_version: u64, to_version: Option<u64>) -> Result<Self, RangeError> {
        if from_version == 0 {
            return Err(RangeError::ZeroFrom);
        }
        if let Some(to) = to_version {
            if to < from_version {
                return Err(RangeError::Inverted {
                    from: from_version,
                    to,
                });
            }
        }
        Ok(Self {
            from_version,
            to_version,
            limit: None,
        })
    }

    /// From the given version to the end of the stream.
    pub fn starting_at(from_version: u64) -> Result<Self, RangeError> {
        Self::new(from_version, None)
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn from_version(&self) -> u64 {
        self.from_version
    }

    pub fn to_version(&self) -> Option<u64> {
        self.to_version
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }
}

/// Filter for `read_since`: everything after a global sequence position,
/// optionally narrowed by coarse stream-type / event-type filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSince {
    after: u64,
    stream_type: Option<StreamType>,
    event_type: Option<EventType>,
    limit: Option<u64>,
}

impl ReadSince {
    /// Envelopes with `global_seq > after`.
    pub fn after(after: u64) -> Self {
        Self {
            after,
            ..Self::default()
        }
    }

    pub fn with_stream_type(mut self, stream_type: StreamType) -> Self {
        self.stream_type = Some(stream_type);
        self
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after_seq(&self) -> u64 {
        self.after
    }

    pub fn stream_type(&self) -> Option<&StreamType> {
        self.stream_type.as_ref()
    }

    pub fn event_type(&self) -> Option<&EventType> {
        self.event_type.as_ref()
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }
}

/// Append-only event store.
///
/// Implementations must:
/// - commit a batch atomically (all envelopes or none);
/// - enforce optimistic concurrency against the current stream tip;
/// - assign a strictly monotonic `global_seq` in commit order;
/// - stamp `recorded_at` with tz-aware UTC server time;
/// - map every backend failure into [`EventStoreError`].
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a validated batch, returning fresh persisted envelopes in
    /// input order. Input instances are never mutated.
    async fn append(&self, batch: EventBatch) -> Result<Vec<EventEnvelope>, EventStoreError>;

    /// Convenience: validate a plain sequence into a batch, then append.
    async fn append_events(
        &self,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        self.append(EventBatch::new(events)?).await
    }

    /// Envelopes of one stream in ascending `version`. Empty result is an
    /// empty vector, never an error.
    async fn read_stream(
        &self,
        stream_id: &StreamId,
        range: StreamRange,
    ) -> Result<Vec<EventEnvelope>, EventStoreError>;

    /// Envelopes with `global_seq` past the filter position, ascending by
    /// `global_seq`.
    async fn read_since(&self, filter: ReadSince)
        -> Result<Vec<EventEnvelope>, EventStoreError>;
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn append(&self, batch: EventBatch) -> Result<Vec<EventEnvelope>, EventStoreError> {
        (**self).append(batch).await
    }

    async fn read_stream(
        &self,
        stream_id: &StreamId,
        range: StreamRange,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        (**self).read_stream(stream_id, range).await
    }

    async fn read_since(
        &self,
        filter: ReadSince,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        (**self).read_since(filter).await
    }
}

//! In-memory event store.
//!
//! Full-fidelity fake used by tests and dev mode: global sequencing,
//! duplicate event-id detection, and version conflicts behave exactly as the
//! relational backends. Not optimized for volume.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use calista_core::{Clock, StreamId, SystemClock};

use crate::batch::EventBatch;
use crate::envelope::EventEnvelope;
use crate::error::EventStoreError;
use crate::store::{EventStore, ReadSince, StreamRange};

#[derive(Debug, Default)]
struct Log {
    events: Vec<EventEnvelope>,
}

impl Log {
    fn tip(&self, batch: &EventBatch) -> u64 {
        self.events
            .iter()
            .filter(|e| {
                e.stream_type() == batch.stream_type() && e.stream_id() == batch.stream_id()
            })
            .map(EventEnvelope::version)
            .max()
            .unwrap_or(0)
    }
}

/// Append-only event store held entirely in process memory.
pub struct InMemoryEventStore {
    clock: Arc<dyn Clock>,
    log: RwLock<Log>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Use an explicit clock so tests can pin `recorded_at`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            log: RwLock::new(Log::default()),
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, batch: EventBatch) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let mut log = self
            .log
            .write()
            .map_err(|_| EventStoreError::unavailable("log lock poisoned"))?;

        let tip = log.tip(&batch);
        if batch.first_version() != tip + 1 {
            return Err(EventStoreError::conflict(format!(
                "stream '{}' is at version {tip}, batch starts at {}",
                batch.stream_id(),
                batch.first_version()
            )));
        }

        for event in &batch {
            if log.events.iter().any(|e| e.event_id() == event.event_id) {
                return Err(EventStoreError::DuplicateEventId(event.event_id.to_string()));
            }
            // Same (stream_id, version) under a different stream_type hits the
            // unique constraint on the relational backends; mirror that here.
            if log
                .events
                .iter()
                .any(|e| e.stream_id() == &event.stream_id && e.version() == event.version)
            {
                return Err(EventStoreError::conflict(format!(
                    "({}, {}) already exists",
                    event.stream_id, event.version
                )));
            }
        }

        let recorded_at = self.clock.now();
        let mut next_seq = log.events.len() as u64 + 1;
        let mut committed = Vec::with_capacity(batch.len());
        for event in batch.into_events() {
            let envelope = EventEnvelope::from_committed(next_seq, recorded_at, event);
            log.events.push(envelope.clone());
            committed.push(envelope);
            next_seq += 1;
        }

        Ok(committed)
    }

    async fn read_stream(
        &self,
        stream_id: &StreamId,
        range: StreamRange,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let log = self
            .log
            .read()
            .map_err(|_| EventStoreError::unavailable("log lock poisoned"))?;

        let mut events: Vec<EventEnvelope> = log
            .events
            .iter()
            .filter(|e| {
                e.stream_id() == stream_id
                    && e.version() >= range.from_version()
                    && range.to_version().is_none_or(|to| e.version() <= to)
            })
            .cloned()
            .collect();
        events.sort_by_key(EventEnvelope::version);
        if let Some(limit) = range.limit() {
            events.truncate(limit as usize);
        }
        Ok(events)
    }

    async fn read_since(
        &self,
        filter: ReadSince,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let log = self
            .log
            .read()
            .map_err(|_| EventStoreError::unavailable("log lock poisoned"))?;

        let mut events: Vec<EventEnvelope> = log
            .events
            .iter()
            .filter(|e| {
                e.global_seq() > filter.after_seq()
                    && filter.stream_type().is_none_or(|t| e.stream_type() == t)
                    && filter.event_type().is_none_or(|t| e.event_type() == t)
            })
            .cloned()
            .collect();
        events.sort_by_key(EventEnvelope::global_seq);
        if let Some(limit) = filter.limit() {
            events.truncate(limit as usize);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use calista_core::{EventType, ManualClock, StreamType};
    use serde_json::json;

    use crate::envelope::UncommittedEvent;

    fn event(stream_type: &str, stream_id: &str, version: u64) -> UncommittedEvent {
        UncommittedEvent::parse_parts(
            &calista_core::EventId::new().to_string(),
            stream_type,
            stream_id,
            version,
            "SessionStarted",
            json!({"name": "n1"}),
            json!({}),
        )
        .unwrap()
    }

    fn batch(events: Vec<UncommittedEvent>) -> EventBatch {
        EventBatch::new(events).unwrap()
    }

    #[tokio::test]
    async fn fresh_append_assigns_sequence_and_record_time() {
        let start = "2024-03-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let store = InMemoryEventStore::with_clock(Arc::new(ManualClock::new(start)));

        let committed = store
            .append(batch(vec![event("Session", "S1", 1)]))
            .await
            .unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].global_seq(), 1);
        assert_eq!(committed[0].version(), 1);
        assert_eq!(committed[0].recorded_at(), start);
    }

    #[tokio::test]
    async fn append_then_read_stream_round_trips_by_value() {
        let store = InMemoryEventStore::new();
        let committed = store
            .append(batch(vec![
                event("Session", "S1", 1),
                event("Session", "S1", 2),
            ]))
            .await
            .unwrap();

        let read = store
            .read_stream(&StreamId::new("S1").unwrap(), StreamRange::default())
            .await
            .unwrap();
        assert_eq!(read, committed);
    }

    #[tokio::test]
    async fn stale_version_conflicts_and_leaves_the_stream_intact() {
        let store = InMemoryEventStore::new();
        store
            .append(batch(vec![event("Session", "S1", 1)]))
            .await
            .unwrap();
        store
            .append(batch(vec![event("Session", "S1", 2)]))
            .await
            .unwrap();

        let err = store
            .append(batch(vec![event("Session", "S1", 2)]))
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::VersionConflict(_)));

        let read = store
            .read_stream(&StreamId::new("S1").unwrap(), StreamRange::default())
            .await
            .unwrap();
        assert_eq!(read.len(), 2);
    }

    #[tokio::test]
    async fn reused_event_id_is_rejected_without_partial_commit() {
        let store = InMemoryEventStore::new();
        let first = event("Session", "S1", 1);
        let reused_id = first.event_id;
        store.append(batch(vec![first])).await.unwrap();

        let mut second = event("Session", "S2", 1);
        second.event_id = reused_id;
        let err = store.append(batch(vec![second])).await.unwrap_err();
        assert!(matches!(err, EventStoreError::DuplicateEventId(_)));

        let all = store.read_since(ReadSince::after(0)).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn batches_commit_atomically_on_conflict() {
        let store = InMemoryEventStore::new();
        store
            .append(batch(vec![event("Session", "S1", 1)]))
            .await
            .unwrap();

        // Fresh (stream_type, stream_id) stream whose first version collides
        // with an existing (stream_id, version) row; nothing may land.
        let err = store
            .append(batch(vec![event("Run", "S1", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::VersionConflict(_)));

        let all = store.read_since(ReadSince::after(0)).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn read_stream_honors_range_and_limit() {
        let store = InMemoryEventStore::new();
        store
            .append(batch(vec![
                event("Session", "S1", 1),
                event("Session", "S1", 2),
                event("Session", "S1", 3),
                event("Session", "S1", 4),
            ]))
            .await
            .unwrap();

        let stream_id = StreamId::new("S1").unwrap();
        let window = store
            .read_stream(&stream_id, StreamRange::new(2, Some(3)).unwrap())
            .await
            .unwrap();
        assert_eq!(
            window.iter().map(EventEnvelope::version).collect::<Vec<_>>(),
            [2, 3]
        );

        let limited = store
            .read_stream(&stream_id, StreamRange::default().with_limit(2))
            .await
            .unwrap();
        assert_eq!(
            limited.iter().map(EventEnvelope::version).collect::<Vec<_>>(),
            [1, 2]
        );

        let empty = store
            .read_stream(&StreamId::new("missing").unwrap(), StreamRange::default())
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn read_since_filters_by_position_and_kind() {
        let store = InMemoryEventStore::new();
        store
            .append(batch(vec![event("Session", "S1", 1)]))
            .await
            .unwrap();
        store
            .append(batch(vec![event("Frame", "F1", 1)]))
            .await
            .unwrap();
        store
            .append(batch(vec![event("Session", "S2", 1)]))
            .await
            .unwrap();

        let after_first = store.read_since(ReadSince::after(1)).await.unwrap();
        assert_eq!(
            after_first
                .iter()
                .map(EventEnvelope::global_seq)
                .collect::<Vec<_>>(),
            [2, 3]
        );

        let sessions = store
            .read_since(ReadSince::after(0).with_stream_type(StreamType::new("Session").unwrap()))
            .await
            .unwrap();
        assert_eq!(sessions.len(), 2);

        let none = store
            .read_since(
                ReadSince::after(0).with_event_type(EventType::new("FrameIngested").unwrap()),
            )
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn append_events_accepts_a_plain_sequence() {
        let store = InMemoryEventStore::new();
        let committed = store
            .append_events(vec![event("Session", "S1", 1)])
            .await
            .unwrap();
        assert_eq!(committed[0].global_seq(), 1);

        let err = store
            .append_events(vec![event("Session", "S1", 2), event("Session", "S2", 3)])
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidEnvelope { .. }));
    }
}

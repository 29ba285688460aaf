//! Envelope batch: the unit of atomic append.

use calista_core::{StreamId, StreamType};

use crate::envelope::UncommittedEvent;
use crate::error::{EnvelopeViolation, EventStoreError};

/// An ordered, non-empty sequence of uncommitted events that all target one
/// `(stream_type, stream_id)` with contiguous versions.
///
/// Construction performs the pure preflight validation of an append, so a
/// backend holding an `EventBatch` only has to check the batch against the
/// current stream tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch {
    events: Vec<UncommittedEvent>,
}

impl EventBatch {
    pub fn new(events: Vec<UncommittedEvent>) -> Result<Self, EventStoreError> {
        let first = events.first().ok_or_else(|| {
            EventStoreError::invalid(EnvelopeViolation::EmptyBatch, "batch contains no events")
        })?;

        let stream_type = first.stream_type.clone();
        let stream_id = first.stream_id.clone();
        let first_version = first.version;

        for (idx, event) in events.iter().enumerate() {
            event.validate()?;
            if event.stream_type != stream_type || event.stream_id != stream_id {
                return Err(EventStoreError::invalid(
                    EnvelopeViolation::MixedStreams,
                    format!(
                        "batch targets ({}, {}) but event at index {idx} targets ({}, {})",
                        stream_type, stream_id, event.stream_type, event.stream_id
                    ),
                ));
            }
            let expected = first_version + idx as u64;
            if event.version != expected {
                return Err(EventStoreError::invalid(
                    EnvelopeViolation::NonContiguous,
                    format!(
                        "event at index {idx} has version {}, expected {expected}",
                        event.version
                    ),
                ));
            }
        }

        Ok(Self { events })
    }

    /// Batch of one.
    pub fn single(event: UncommittedEvent) -> Result<Self, EventStoreError> {
        Self::new(vec![event])
    }

    pub fn stream_type(&self) -> &StreamType {
        &self.events[0].stream_type
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.events[0].stream_id
    }

    /// Version the first event claims; must equal stream tip + 1 at commit.
    pub fn first_version(&self) -> u64 {
        self.events[0].version
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        // Construction guarantees non-empty; kept for the conventional pair.
        self.events.is_empty()
    }

    pub fn events(&self) -> &[UncommittedEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<UncommittedEvent> {
        self.events
    }
}

impl TryFrom<Vec<UncommittedEvent>> for EventBatch {
    type Error = EventStoreError;

    fn try_from(events: Vec<UncommittedEvent>) -> Result<Self, Self::Error> {
        Self::new(events)
    }
}

impl<'a> IntoIterator for &'a EventBatch {
    type Item = &'a UncommittedEvent;
    type IntoIter = core::slice::Iter<'a, UncommittedEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(stream_id: &str, version: u64) -> UncommittedEvent {
        UncommittedEvent::parse_parts(
            &calista_core::EventId::new().to_string(),
            "Session",
            stream_id,
            version,
            "SessionStarted",
            json!({}),
            json!({}),
        )
        .unwrap()
    }

    #[test]
    fn accepts_contiguous_single_stream_batches() {
        let batch = EventBatch::new(vec![event("S1", 4), event("S1", 5), event("S1", 6)]).unwrap();
        assert_eq!(batch.first_version(), 4);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.stream_id().as_str(), "S1");
    }

    #[test]
    fn rejects_empty_batches() {
        let err = EventBatch::new(vec![]).unwrap_err();
        assert!(matches!(
            err,
            EventStoreError::InvalidEnvelope {
                reason: EnvelopeViolation::EmptyBatch,
                ..
            }
        ));
    }

    #[test]
    fn rejects_mixed_streams() {
        let err = EventBatch::new(vec![event("S1", 1), event("S2", 2)]).unwrap_err();
        assert!(matches!(
            err,
            EventStoreError::InvalidEnvelope {
                reason: EnvelopeViolation::MixedStreams,
                ..
            }
        ));
    }

    #[test]
    fn rejects_version_gaps_and_reversals() {
        let gap = EventBatch::new(vec![event("S1", 1), event("S1", 3)]).unwrap_err();
        assert!(matches!(
            gap,
            EventStoreError::InvalidEnvelope {
                reason: EnvelopeViolation::NonContiguous,
                ..
            }
        ));

        let reversal = EventBatch::new(vec![event("S1", 2), event("S1", 1)]).unwrap_err();
        assert!(matches!(
            reversal,
            EventStoreError::InvalidEnvelope {
                reason: EnvelopeViolation::NonContiguous,
                ..
            }
        ));
    }
}

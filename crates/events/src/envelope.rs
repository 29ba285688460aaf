//! Event envelope: the unit of persistence.
//!
//! An envelope wraps domain data (`payload`) with the infrastructure metadata
//! needed for event sourcing: stream identity, per-stream version, global
//! ordering, and record time. Two shapes mirror the envelope lifecycle:
//!
//! - [`UncommittedEvent`] is built by a caller and handed to `append`. It has
//!   no `global_seq` or `recorded_at`; both are authoritative store output,
//!   so the caller has nothing to supply (and nothing to be ignored).
//! - [`EventEnvelope`] is what the store returns after a successful commit
//!   and what reads produce. It is immutable and compared by value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use calista_core::{EventId, EventType, StreamId, StreamType};

use crate::error::{EnvelopeViolation, EventStoreError};

/// Reserved metadata key: correlates envelopes across one logical operation.
pub const METADATA_CORRELATION_ID: &str = "correlation_id";
/// Reserved metadata key: the `event_id` of the event that caused this one.
pub const METADATA_CAUSATION_ID: &str = "causation_id";
/// Reserved metadata key: the acting principal.
pub const METADATA_ACTOR: &str = "actor";

/// An event ready to be appended to a stream (no authoritative fields yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: EventId,
    pub stream_type: StreamType,
    pub stream_id: StreamId,

    /// Per-stream ordinal, starting at 1.
    pub version: u64,

    pub event_type: EventType,
    pub payload: JsonValue,
    pub metadata: JsonValue,
}

impl UncommittedEvent {
    /// Build an uncommitted event from typed parts, enforcing the locally
    /// checkable invariants (`version >= 1`, object-shaped payload/metadata).
    pub fn new(
        event_id: EventId,
        stream_type: StreamType,
        stream_id: StreamId,
        version: u64,
        event_type: EventType,
        payload: JsonValue,
        metadata: JsonValue,
    ) -> Result<Self, EventStoreError> {
        let event = Self {
            event_id,
            stream_type,
            stream_id,
            version,
            event_type,
            payload,
            metadata,
        };
        event.validate()?;
        Ok(event)
    }

    /// Build an uncommitted event from raw string identifiers.
    ///
    /// Classifies each identifier failure with the matching violation code
    /// (`bad_ulid`, `empty_field`, `field_too_long`) instead of a generic
    /// parse error.
    pub fn parse_parts(
        event_id: &str,
        stream_type: &str,
        stream_id: &str,
        version: u64,
        event_type: &str,
        payload: JsonValue,
        metadata: JsonValue,
    ) -> Result<Self, EventStoreError> {
        let event_id: EventId = event_id.parse().map_err(|_| {
            EventStoreError::invalid(
                EnvelopeViolation::BadUlid,
                format!("event_id '{event_id}' is not a valid ULID"),
            )
        })?;

        Self::new(
            event_id,
            parse_ident::<StreamType>("stream_type", stream_type, StreamType::MAX_LEN)?,
            parse_ident::<StreamId>("stream_id", stream_id, StreamId::MAX_LEN)?,
            version,
            parse_ident::<EventType>("event_type", event_type, EventType::MAX_LEN)?,
            payload,
            metadata,
        )
    }

    pub(crate) fn validate(&self) -> Result<(), EventStoreError> {
        if self.version == 0 {
            return Err(EventStoreError::invalid(
                EnvelopeViolation::ZeroVersion,
                format!("event {} claims version 0", self.event_id),
            ));
        }
        if !self.payload.is_object() {
            return Err(EventStoreError::invalid(
                EnvelopeViolation::NonObjectPayload,
                format!("payload of event {} is not a JSON object", self.event_id),
            ));
        }
        if !self.metadata.is_object() {
            return Err(EventStoreError::invalid(
                EnvelopeViolation::NonObjectPayload,
                format!("metadata of event {} is not a JSON object", self.event_id),
            ));
        }
        Ok(())
    }
}

fn parse_ident<T: core::str::FromStr>(
    field: &str,
    value: &str,
    max_len: usize,
) -> Result<T, EventStoreError> {
    if value.is_empty() {
        return Err(EventStoreError::invalid(
            EnvelopeViolation::EmptyField,
            format!("{field} is empty"),
        ));
    }
    if value.len() > max_len {
        return Err(EventStoreError::invalid(
            EnvelopeViolation::FieldTooLong,
            format!("{field} is {} bytes, maximum is {max_len}", value.len()),
        ));
    }
    value.parse().map_err(|_| {
        EventStoreError::invalid(
            EnvelopeViolation::EmptyField,
            format!("{field} is not a valid identifier"),
        )
    })
}

/// A persisted event envelope.
///
/// Produced by the store on commit (carrying the authoritative `global_seq`
/// and `recorded_at`) and by reads. Never mutated after construction; the
/// store returns fresh instances rather than touching caller input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    global_seq: u64,
    event_id: EventId,
    stream_type: StreamType,
    stream_id: StreamId,
    version: u64,
    event_type: EventType,
    #[serde(with = "rfc3339_utc")]
    recorded_at: DateTime<Utc>,
    payload: JsonValue,
    metadata: JsonValue,
}

impl EventEnvelope {
    /// Assemble a persisted envelope from a committed row.
    ///
    /// `global_seq` and `recorded_at` come from the store; everything else is
    /// carried over from the uncommitted event.
    pub fn from_committed(
        global_seq: u64,
        recorded_at: DateTime<Utc>,
        event: UncommittedEvent,
    ) -> Self {
        Self {
            global_seq,
            event_id: event.event_id,
            stream_type: event.stream_type,
            stream_id: event.stream_id,
            version: event.version,
            event_type: event.event_type,
            recorded_at,
            payload: event.payload,
            metadata: event.metadata,
        }
    }

    /// Strictly monotonic position across the entire store.
    pub fn global_seq(&self) -> u64 {
        self.global_seq
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn stream_type(&self) -> &StreamType {
        &self.stream_type
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Per-stream ordinal, contiguous from 1.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// Authoritative server commit time, always tz-aware UTC.
    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn metadata(&self) -> &JsonValue {
        &self.metadata
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata_str(METADATA_CORRELATION_ID)
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.metadata_str(METADATA_CAUSATION_ID)
    }

    pub fn actor(&self) -> Option<&str> {
        self.metadata_str(METADATA_ACTOR)
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(JsonValue::as_str)
    }
}

/// RFC 3339 with a literal `Z` suffix.
///
/// chrono's derived form renders UTC as `+00:00`; the wire format requires
/// `Z`. Microsecond precision keeps encode → decode → encode a fixed point.
mod rfc3339_utc {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

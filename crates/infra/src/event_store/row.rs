//! Row-to-envelope conversion shared by the relational backends.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use calista_events::{EventEnvelope, EventStoreError, UncommittedEvent};

/// Rebuild a persisted envelope from primitive column values.
///
/// Identifier columns are re-parsed through the typed constructors; a row
/// that fails them indicates the database was written outside this store and
/// surfaces as `Unavailable` rather than a caller error.
#[allow(clippy::too_many_arguments)]
pub(crate) fn envelope_from_columns(
    global_seq: i64,
    event_id: &str,
    stream_type: &str,
    stream_id: &str,
    version: i64,
    event_type: &str,
    recorded_at: DateTime<Utc>,
    payload: JsonValue,
    metadata: JsonValue,
) -> Result<EventEnvelope, EventStoreError> {
    if global_seq < 1 || version < 1 {
        return Err(corrupt(format!(
            "row has global_seq {global_seq}, version {version}"
        )));
    }

    let event = UncommittedEvent {
        event_id: event_id
            .parse()
            .map_err(|_| corrupt(format!("event_id '{event_id}' is not a ULID")))?,
        stream_type: stream_type
            .parse()
            .map_err(|_| corrupt(format!("stream_type '{stream_type}'")))?,
        stream_id: stream_id
            .parse()
            .map_err(|_| corrupt(format!("stream_id '{stream_id}'")))?,
        version: version as u64,
        event_type: event_type
            .parse()
            .map_err(|_| corrupt(format!("event_type '{event_type}'")))?,
        payload,
        metadata,
    };

    Ok(EventEnvelope::from_committed(
        global_seq as u64,
        recorded_at,
        event,
    ))
}

fn corrupt(detail: String) -> EventStoreError {
    EventStoreError::unavailable(format!("corrupt event_store row: {detail}"))
}

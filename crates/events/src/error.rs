//! Typed error taxonomy for the event store.
//!
//! The taxonomy is small and closed. Backends must map every driver-level
//! failure into one of these kinds; callers never see a raw `sqlx` error.

use thiserror::Error;

/// Machine-readable reason for rejecting an envelope or batch before any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeViolation {
    /// The batch contains no envelopes.
    EmptyBatch,
    /// Envelopes in one batch target more than one `(stream_type, stream_id)`.
    MixedStreams,
    /// Versions within the batch do not increase by exactly one.
    NonContiguous,
    /// An envelope claims `version` 0; stream versions start at 1.
    ZeroVersion,
    /// `payload` or `metadata` is not a JSON object.
    NonObjectPayload,
    /// `event_id` is not a 26-character Crockford-Base32 ULID.
    BadUlid,
    /// A required identifier field is empty.
    EmptyField,
    /// An identifier field exceeds its length bound.
    FieldTooLong,
}

impl EnvelopeViolation {
    /// Stable snake_case code, suitable for logs and assertions.
    pub fn code(self) -> &'static str {
        match self {
            Self::EmptyBatch => "empty_batch",
            Self::MixedStreams => "mixed_streams",
            Self::NonContiguous => "non_contiguous",
            Self::ZeroVersion => "zero_version",
            Self::NonObjectPayload => "non_object_payload",
            Self::BadUlid => "bad_ulid",
            Self::EmptyField => "empty_field",
            Self::FieldTooLong => "field_too_long",
        }
    }
}

impl core::fmt::Display for EnvelopeViolation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

/// Error contract shared by every event-store backend.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Pre-commit validation failure attributable to the caller.
    #[error("invalid envelope ({reason}): {detail}")]
    InvalidEnvelope {
        reason: EnvelopeViolation,
        detail: String,
    },

    /// Optimistic concurrency check failed: the batch's starting version does
    /// not extend the current stream tip, or `(stream_id, version)` already
    /// exists.
    #[error("version conflict: {0}")]
    VersionConflict(String),

    /// An `event_id` already exists somewhere in the store.
    #[error("duplicate event id: {0}")]
    DuplicateEventId(String),

    /// Connectivity, timeout, or transaction abort not attributable to caller
    /// preconditions. Callers may retry with backoff; the store never retries
    /// internally.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl EventStoreError {
    pub fn invalid(reason: EnvelopeViolation, detail: impl Into<String>) -> Self {
        Self::InvalidEnvelope {
            reason,
            detail: detail.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::VersionConflict(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

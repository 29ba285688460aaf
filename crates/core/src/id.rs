//! Strongly-typed identifiers used across the persistence core.

use core::str::FromStr;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::error::DomainError;

/// Identifier of a single event, globally unique.
///
/// Rendered as a 26-character Crockford-Base32 ULID. ULIDs sort by their
/// millisecond timestamp component, so ids produced by [`UlidGenerator`]
/// compare in generation order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Ulid);

impl EventId {
    /// Create a fresh id from the system clock.
    ///
    /// Ids from this constructor are unique but not guaranteed monotonic
    /// within a millisecond; production writers should draw ids from a
    /// shared [`UlidGenerator`] instead.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> &Ulid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for EventId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for EventId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = Ulid::from_string(s)
            .map_err(|e| DomainError::invalid_id(format!("EventId: {}", e)))?;
        Ok(Self(ulid))
    }
}

macro_rules! impl_ident_newtype {
    ($t:ident, $name:literal, $max_len:expr) => {
        /// Bounded, non-empty string identifier.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $t(String);

        impl $t {
            /// Maximum length in bytes.
            pub const MAX_LEN: usize = $max_len;

            pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                if value.is_empty() {
                    return Err(DomainError::invalid_id(concat!($name, ": empty")));
                }
                if value.len() > Self::MAX_LEN {
                    return Err(DomainError::invalid_id(format!(
                        "{}: {} bytes exceeds maximum of {}",
                        $name,
                        value.len(),
                        Self::MAX_LEN
                    )));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_ident_newtype!(StreamType, "StreamType", 64);
impl_ident_newtype!(StreamId, "StreamId", 128);
impl_ident_newtype!(EventType, "EventType", 128);

/// The random component of a ULID saturated within a single millisecond.
///
/// Practically unreachable (it requires 2^80 ids in one millisecond), but the
/// generator surfaces it rather than silently reusing or wrapping an id.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("ulid random component overflowed within one millisecond")]
pub struct UlidOverflow;

/// Monotonic ULID source.
///
/// Two ids drawn from the same generator within one millisecond still compare
/// strictly in generation order: the random component is incremented instead
/// of re-randomized. Share one generator per process.
pub struct UlidGenerator {
    inner: Mutex<ulid::Generator>,
}

impl core::fmt::Debug for UlidGenerator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UlidGenerator").finish_non_exhaustive()
    }
}

impl Default for UlidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl UlidGenerator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ulid::Generator::new()),
        }
    }

    /// Produce the next id, strictly greater than every id produced before it.
    pub fn next_id(&self) -> Result<EventId, UlidOverflow> {
        let mut generator = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        generator
            .generate()
            .map(EventId::from_ulid)
            .map_err(|_| UlidOverflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_round_trips_through_its_string_form() {
        let id = EventId::new();
        let text = id.to_string();
        assert_eq!(text.len(), 26);
        assert_eq!(text.parse::<EventId>().unwrap(), id);
    }

    #[test]
    fn event_id_rejects_malformed_input() {
        assert!("not-a-ulid".parse::<EventId>().is_err());
        assert!("".parse::<EventId>().is_err());
        // Too short by one character.
        assert!("01J0000000000000000000000".parse::<EventId>().is_err());
    }

    #[test]
    fn generator_is_monotonic_within_a_burst() {
        let generator = UlidGenerator::new();
        let mut previous = generator.next_id().unwrap();
        for _ in 0..10_000 {
            let next = generator.next_id().unwrap();
            assert!(next > previous, "{next} should sort after {previous}");
            previous = next;
        }
    }

    #[test]
    fn stream_identifiers_enforce_bounds() {
        assert!(StreamType::new("Session").is_ok());
        assert!(StreamType::new("").is_err());
        assert!(StreamType::new("x".repeat(64)).is_ok());
        assert!(StreamType::new("x".repeat(65)).is_err());
        assert!(StreamId::new("S1").is_ok());
        assert!(StreamId::new("x".repeat(129)).is_err());
        assert!(EventType::new("SessionStarted").is_ok());
    }

    #[test]
    fn stream_identifiers_serialize_transparently() {
        let stream_type = StreamType::new("Session").unwrap();
        let json = serde_json::to_string(&stream_type).unwrap();
        assert_eq!(json, "\"Session\"");
        let back: StreamType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stream_type);
    }
}

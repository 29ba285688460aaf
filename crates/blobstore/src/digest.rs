//! SHA-256 digest primitives.

use std::io::{self, Read};

use sha2::{Digest as _, Sha256};

use crate::store::BlobStoreError;

/// Read granularity for streaming hashes and blob ingest.
pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

/// Validated blob identifier: the raw SHA-256 of the content, rendered as 64
/// lowercase hex characters. The algorithm is fixed and not encoded in the
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(String);

impl Digest {
    /// Parse a caller-supplied digest string. Uppercase hex is rejected.
    pub fn parse(value: &str) -> Result<Self, BlobStoreError> {
        if !is_valid(value) {
            return Err(BlobStoreError::InvalidDigest(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    /// Digest of an in-memory byte string.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    pub(crate) fn from_hasher(hasher: Sha256) -> Self {
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First and second hex byte pairs, used for directory sharding.
    pub(crate) fn shard_prefixes(&self) -> (&str, &str) {
        (&self.0[0..2], &self.0[2..4])
    }
}

impl core::fmt::Display for Digest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for Digest {
    type Err = BlobStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Whether `digest` is a well-formed identifier: exactly 64 characters from
/// `[0-9a-f]`.
pub fn is_valid(digest: &str) -> bool {
    digest.len() == 64
        && digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Hash a reader to end-of-input in bounded chunks.
///
/// Returns the content digest and the observed byte count. Never buffers the
/// whole payload.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<(Digest, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((Digest::from_hasher(hasher), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HELLO_DIGEST: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
    const EMPTY_DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn validates_the_64_hex_shape() {
        assert!(is_valid(HELLO_DIGEST));
        assert!(!is_valid(""));
        assert!(!is_valid(&HELLO_DIGEST[..63]));
        assert!(!is_valid(&format!("{HELLO_DIGEST}0")));
        assert!(!is_valid(&HELLO_DIGEST.to_uppercase()));
        assert!(!is_valid("g".repeat(64).as_str()));
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert!(Digest::parse(HELLO_DIGEST).is_ok());
        assert!(matches!(
            Digest::parse("nope"),
            Err(BlobStoreError::InvalidDigest(_))
        ));
        assert!(matches!(
            Digest::parse(&HELLO_DIGEST.to_uppercase()),
            Err(BlobStoreError::InvalidDigest(_))
        ));
    }

    #[test]
    fn hashes_known_vectors() {
        assert_eq!(Digest::of_bytes(b"hello").as_str(), HELLO_DIGEST);
        assert_eq!(Digest::of_bytes(b"").as_str(), EMPTY_DIGEST);
    }

    #[test]
    fn hash_reader_matches_of_bytes_and_counts_length() {
        let payload = vec![0xabu8; 3 * CHUNK_SIZE + 17];
        let (digest, size) = hash_reader(Cursor::new(&payload)).unwrap();
        assert_eq!(size, payload.len() as u64);
        assert_eq!(digest, Digest::of_bytes(&payload));

        let (empty, size) = hash_reader(Cursor::new(&[])).unwrap();
        assert_eq!(size, 0);
        assert_eq!(empty.as_str(), EMPTY_DIGEST);
    }
}

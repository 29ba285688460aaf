//! Blob store contract.

use std::io::Read;

use thiserror::Error;

use crate::digest::Digest;

/// Identity and size of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobStat {
    pub digest: Digest,
    pub size: u64,
}

/// Error type for blob store operations.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    /// No blob with this digest is installed.
    #[error("blob {0} not found")]
    NotFound(String),

    /// The supplied digest is not 64 lowercase hex characters.
    #[error("invalid digest: '{0}'")]
    InvalidDigest(String),

    /// Underlying read/write failure.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Content-addressed byte store.
///
/// Writes are idempotent: storing bytes that already exist is a success that
/// returns the existing blob's stat. Blobs are immutable once installed.
pub trait BlobStore: Send + Sync {
    /// Ingest a stream of bytes, returning the content digest and size.
    ///
    /// Installation is atomic: concurrent readers either see the complete
    /// blob or none at all, and a failed ingest leaves nothing behind.
    fn store(&self, reader: &mut dyn Read) -> Result<BlobStat, BlobStoreError>;

    /// Open the blob's content for reading. The stream is owned by the
    /// caller and closed on drop.
    fn open_read(&self, digest: &Digest) -> Result<Box<dyn Read + Send>, BlobStoreError>;

    /// Cheap existence check; must not read the blob body.
    fn exists(&self, digest: &Digest) -> Result<bool, BlobStoreError>;

    /// Size lookup without reading content.
    fn stat(&self, digest: &Digest) -> Result<BlobStat, BlobStoreError>;
}

//! Content-addressed blob store.
//!
//! Blobs are identified solely by the SHA-256 of their contents. The local
//! filesystem backend installs blobs atomically (stage under `tmp/`, rename
//! into a sharded `objects/` layout), deduplicates identical content, and
//! never exposes a partially written file.

pub mod digest;
pub mod fs;
pub mod store;

pub use digest::{Digest, hash_reader, is_valid};
pub use fs::{FsBlobStore, FsBlobStoreConfig};
pub use store::{BlobStat, BlobStore, BlobStoreError};

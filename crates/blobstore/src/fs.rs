//! Local-filesystem blob store.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/
//!   tmp/                              staging files, unlinked on failure
//!   objects/<aa>/<bb>/<full-digest>   two-level sharding by hex byte pairs
//! ```
//!
//! Correctness across processes relies on the atomic-rename primitive, not on
//! file locks: a blob becomes visible all at once, and two concurrent ingests
//! of the same content converge on one file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest as _, Sha256};
use tracing::debug;

use crate::digest::{CHUNK_SIZE, Digest};
use crate::store::{BlobStat, BlobStore, BlobStoreError};

/// Configuration for [`FsBlobStore`].
#[derive(Debug, Clone)]
pub struct FsBlobStoreConfig {
    /// Store root; `tmp/` and `objects/` are created beneath it.
    pub root: PathBuf,
    /// Fsync staged files before rename and shard directories after.
    /// Disable only where durability does not matter (throwaway test roots).
    pub fsync: bool,
}

impl FsBlobStoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fsync: true,
        }
    }

    pub fn without_fsync(mut self) -> Self {
        self.fsync = false;
        self
    }
}

/// Content-addressed store on a local filesystem.
pub struct FsBlobStore {
    root: PathBuf,
    fsync: bool,
    staging_seq: AtomicU64,
}

impl FsBlobStore {
    /// Open (and if needed initialize) a store at the configured root.
    ///
    /// An empty `objects/` directory is a valid empty store.
    pub fn open(config: FsBlobStoreConfig) -> Result<Self, BlobStoreError> {
        fs::create_dir_all(config.root.join("tmp"))?;
        fs::create_dir_all(config.root.join("objects"))?;
        Ok(Self {
            root: config.root,
            fsync: config.fsync,
            staging_seq: AtomicU64::new(0),
        })
    }

    fn object_path(&self, digest: &Digest) -> PathBuf {
        let (first, second) = digest.shard_prefixes();
        self.root
            .join("objects")
            .join(first)
            .join(second)
            .join(digest.as_str())
    }

    /// Create a uniquely named staging file under `tmp/`.
    ///
    /// The pid keeps distinct processes apart; the counter keeps threads
    /// apart. A leftover file from a crashed run with the same name is
    /// skipped by the `create_new` retry loop.
    fn stage(&self) -> Result<(PathBuf, File), BlobStoreError> {
        loop {
            let seq = self.staging_seq.fetch_add(1, Ordering::Relaxed);
            let candidate = self
                .root
                .join("tmp")
                .join(format!("ingest-{}-{}.tmp", std::process::id(), seq));
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(file) => return Ok((candidate, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(BlobStoreError::Io(e)),
            }
        }
    }

    fn sync_dir(path: &Path) {
        // Directory fsync is a POSIX notion; on platforms where opening a
        // directory fails, skip it.
        if let Ok(dir) = File::open(path) {
            let _ = dir.sync_all();
        }
    }
}

/// Unlinks the staging file unless the ingest completed.
struct StagingGuard {
    path: Option<PathBuf>,
}

impl StagingGuard {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn disarm(&mut self) {
        self.path = None;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = fs::remove_file(path);
        }
    }
}

impl BlobStore for FsBlobStore {
    fn store(&self, reader: &mut dyn Read) -> Result<BlobStat, BlobStoreError> {
        let (tmp_path, mut file) = self.stage()?;
        let mut guard = StagingGuard::new(tmp_path.clone());

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut size = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n])?;
            size += n as u64;
        }

        file.flush()?;
        if self.fsync {
            file.sync_all()?;
        }
        drop(file);

        let digest = Digest::from_hasher(hasher);
        let target = self.object_path(&digest);

        if target.exists() {
            // Identical content already installed; the guard discards the
            // staged copy.
            debug!(digest = %digest, size, "blob already present");
            return Ok(BlobStat { digest, size });
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        match fs::rename(&tmp_path, &target) {
            Ok(()) => guard.disarm(),
            // A concurrent ingest of the same content won the rename; ours
            // is a no-op and the guard discards the staged copy.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && target.exists() => {}
            Err(e) => return Err(BlobStoreError::Io(e)),
        }

        if self.fsync {
            if let Some(parent) = target.parent() {
                Self::sync_dir(parent);
            }
        }

        debug!(digest = %digest, size, "blob installed");
        Ok(BlobStat { digest, size })
    }

    fn open_read(&self, digest: &Digest) -> Result<Box<dyn Read + Send>, BlobStoreError> {
        match File::open(self.object_path(digest)) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(BlobStoreError::NotFound(digest.to_string()))
            }
            Err(e) => Err(BlobStoreError::Io(e)),
        }
    }

    fn exists(&self, digest: &Digest) -> Result<bool, BlobStoreError> {
        match fs::metadata(self.object_path(digest)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BlobStoreError::Io(e)),
        }
    }

    fn stat(&self, digest: &Digest) -> Result<BlobStat, BlobStoreError> {
        match fs::metadata(self.object_path(digest)) {
            Ok(meta) => Ok(BlobStat {
                digest: digest.clone(),
                size: meta.len(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(BlobStoreError::NotFound(digest.to_string()))
            }
            Err(e) => Err(BlobStoreError::Io(e)),
        }
    }
}

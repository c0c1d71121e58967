//! # synapse-cas
//!
//! Content-addressable blob store for Synapse.
//!
//! Every file is stored exactly once, keyed by its SHA-256 digest, with a
//! 2-char prefix fan-out.
//!
//! ## Directory Layout
//!
//! ```text
//! <blobs root>/
//! ├── sha256/
//! │   └── ab/
//! │       └── abcd1234...ef        # full hex digest
//! ├── tmp/                         # in-flight imports (same filesystem)
//! └── locks/<ab>.lock              # striped per-prefix locks
//! ```
//!
//! Imports stream into `tmp/`, hash incrementally, and rename into place
//! only after the digest is known (and matches the expected one). A crash
//! leaves either nothing or a complete blob.

mod hash;
pub mod protection;

pub use hash::{BlobHash, InvalidHash};

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::instrument;

use synapse_config::{log_blob_debug, log_blob_warn};
use synapse_layout::{FileLock, LayoutError};

use crate::hash::HASH_BUF_SIZE;

/// Default wait for a per-prefix lock
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur during blob store operations
#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Blob not found: {hash}")]
    NotFound { hash: BlobHash },

    #[error("Integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: BlobHash, actual: BlobHash },

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

pub type Result<T> = std::result::Result<T, CasError>;

/// Handle to a stored blob returned by an import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub hash: BlobHash,
    pub size: u64,
    pub path: PathBuf,
    /// False when the bytes were already stored (idempotent no-op)
    pub was_new: bool,
}

/// Outcome of re-hashing a stored blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyStatus {
    Ok,
    Missing,
    Corrupt { actual: BlobHash },
}

/// Content-addressable blob store
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    verify_existing: bool,
    lock_timeout: Duration,
}

impl BlobStore {
    /// Create a blob store at the given root directory.
    ///
    /// The directory skeleton is created if it doesn't exist.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("sha256"))?;
        fs::create_dir_all(root.join("tmp"))?;
        fs::create_dir_all(root.join("locks"))?;
        Ok(Self {
            root,
            verify_existing: true,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Re-hash an existing blob when an import is a no-op.
    pub fn with_verify_existing(mut self, verify: bool) -> Self {
        self.verify_existing = verify;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Get the root path of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Path where a blob with the given hash is (or would be) stored.
    ///
    /// Layout: `sha256/ab/abcd...`
    pub fn blob_path(&self, hash: &BlobHash) -> PathBuf {
        self.root
            .join("sha256")
            .join(hash.prefix())
            .join(hash.as_str())
    }

    /// Check if a blob exists in the store.
    pub fn has(&self, hash: &BlobHash) -> bool {
        self.blob_path(hash).is_file()
    }

    /// Path of a stored blob, or `NotFound`.
    pub fn path_of(&self, hash: &BlobHash) -> Result<PathBuf> {
        let path = self.blob_path(hash);
        if path.is_file() {
            Ok(path)
        } else {
            Err(CasError::NotFound { hash: hash.clone() })
        }
    }

    pub fn size_of(&self, hash: &BlobHash) -> Result<u64> {
        Ok(fs::metadata(self.path_of(hash)?)?.len())
    }

    pub fn modified_at(&self, hash: &BlobHash) -> Result<SystemTime> {
        Ok(fs::metadata(self.path_of(hash)?)?.modified()?)
    }

    /// Serialize work on blobs sharing a 2-char prefix.
    ///
    /// Striping keeps the lock directory bounded at 256 files.
    fn lock_prefix(&self, hash: &BlobHash) -> Result<FileLock> {
        let path = self
            .root
            .join("locks")
            .join(format!("{}.lock", hash.prefix()));
        Ok(FileLock::acquire(
            &path,
            &format!("blob {}", hash.short()),
            self.lock_timeout,
        )?)
    }

    /// Stream bytes into the store.
    ///
    /// The digest is computed while writing to a temp file next to the
    /// destination. With `expected` set, a mismatch discards the temp file
    /// and fails with `IntegrityMismatch`; the destination is never created.
    /// Importing bytes that are already stored is a successful no-op.
    #[instrument(skip(self, reader), level = "debug")]
    pub fn import<R: Read>(&self, mut reader: R, expected: Option<&BlobHash>) -> Result<BlobRef> {
        let mut tmp = NamedTempFile::new_in(self.tmp_dir())?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            let mut buffer = vec![0_u8; HASH_BUF_SIZE];
            loop {
                let read = reader.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
                writer.write_all(&buffer[..read])?;
                size += read as u64;
            }
            writer.flush()?;
        }
        let actual = BlobHash::from_digest(hasher);

        if let Some(expected) = expected {
            if *expected != actual {
                log_blob_warn!(
                    "Rejected import with wrong digest",
                    expected = expected.as_str(),
                    actual = actual.as_str()
                );
                // tmp is removed on drop
                return Err(CasError::IntegrityMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let path = self.blob_path(&actual);
        if path.exists() {
            return self.finish_existing(tmp, actual, size, path);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        tmp.as_file().sync_all()?;
        protection::enforce_blob_invariant(tmp.path())?;

        // Atomic rename; a concurrent import of the same bytes may win the
        // race, which is fine because the content is identical.
        tmp.persist(&path).map_err(|e| CasError::Io(e.error))?;

        log_blob_debug!("Stored blob", sha256 = actual.as_str(), size = size);
        Ok(BlobRef {
            hash: actual,
            size,
            path,
            was_new: true,
        })
    }

    /// No-op import path: optionally check the stored copy, healing it with
    /// the freshly verified bytes if it turned out corrupt.
    fn finish_existing(
        &self,
        tmp: NamedTempFile,
        hash: BlobHash,
        size: u64,
        path: PathBuf,
    ) -> Result<BlobRef> {
        if self.verify_existing {
            let _lock = self.lock_prefix(&hash)?;
            let status = self.verify_unlocked(&hash)?;
            if status != VerifyStatus::Ok {
                if let VerifyStatus::Corrupt { actual } = &status {
                    log_blob_warn!(
                        "Replacing corrupt blob",
                        sha256 = hash.as_str(),
                        found = actual.as_str()
                    );
                }
                tmp.as_file().sync_all()?;
                protection::enforce_blob_invariant(tmp.path())?;
                tmp.persist(&path).map_err(|e| CasError::Io(e.error))?;
                return Ok(BlobRef {
                    hash,
                    size,
                    path,
                    was_new: true,
                });
            }
        }

        log_blob_debug!("Blob already stored", sha256 = hash.as_str());
        Ok(BlobRef {
            hash,
            size,
            path,
            was_new: false,
        })
    }

    /// Import a file from the filesystem.
    pub fn import_file<P: AsRef<Path>>(
        &self,
        path: P,
        expected: Option<&BlobHash>,
    ) -> Result<BlobRef> {
        let file = File::open(path)?;
        self.import(file, expected)
    }

    /// Import an in-memory buffer.
    pub fn import_bytes(&self, data: &[u8], expected: Option<&BlobHash>) -> Result<BlobRef> {
        self.import(data, expected)
    }

    /// Recompute the digest of a stored blob.
    ///
    /// Reads the whole file; meant for diagnostics, not the import path.
    #[instrument(skip(self), level = "debug")]
    pub fn verify(&self, hash: &BlobHash) -> Result<VerifyStatus> {
        let _lock = self.lock_prefix(hash)?;
        self.verify_unlocked(hash)
    }

    fn verify_unlocked(&self, hash: &BlobHash) -> Result<VerifyStatus> {
        let file = match File::open(self.blob_path(hash)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(VerifyStatus::Missing),
            Err(e) => return Err(e.into()),
        };
        let (actual, _) = BlobHash::of_reader(file)?;
        if actual == *hash {
            Ok(VerifyStatus::Ok)
        } else {
            Ok(VerifyStatus::Corrupt { actual })
        }
    }

    /// Delete a blob from the store.
    ///
    /// The store keeps no back-references, so it cannot tell whether a view
    /// still links here; the caller must have proven the blob unreferenced
    /// with a full scan and must keep views from changing until this returns.
    /// Open file handles on Unix keep reading the unlinked inode.
    pub fn delete(&self, hash: &BlobHash) -> Result<()> {
        let _lock = self.lock_prefix(hash)?;
        let path = self.blob_path(hash);
        match fs::remove_file(&path) {
            Ok(()) => {
                log_blob_debug!("Deleted blob", sha256 = hash.as_str());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(CasError::NotFound { hash: hash.clone() })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove leftover temp files from crashed imports.
    ///
    /// Only files older than `older_than` are touched, so imports running
    /// right now keep their temp file.
    pub fn clean_temp(&self, older_than: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in fs::read_dir(self.tmp_dir())? {
            let entry = entry?;
            let age = entry
                .metadata()?
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age >= older_than && fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// All stored hashes, in no particular order.
    pub fn iter(&self) -> Result<BlobIter> {
        Ok(BlobIter {
            prefixes: fs::read_dir(self.root.join("sha256"))?,
            blobs: None,
        })
    }

    /// Get statistics about the store.
    pub fn stats(&self) -> Result<BlobStats> {
        let mut stats = BlobStats::default();
        for hash in self.iter()? {
            let size = self.size_of(&hash?)?;
            stats.blob_count += 1;
            stats.total_bytes += size;
            match size {
                s if s < 1024 * 1024 => stats.small_blobs += 1,
                s if s < 100 * 1024 * 1024 => stats.medium_blobs += 1,
                s if s < 2 * 1024 * 1024 * 1024 => stats.large_blobs += 1,
                _ => stats.huge_blobs += 1,
            }
        }
        Ok(stats)
    }
}

/// Statistics about the blob store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobStats {
    /// Number of unique blobs stored
    pub blob_count: u64,
    /// Total bytes stored (deduplicated)
    pub total_bytes: u64,
    /// Blobs < 1MB (configs, embeddings)
    pub small_blobs: u64,
    /// Blobs 1MB - 100MB (most LoRAs)
    pub medium_blobs: u64,
    /// Blobs 100MB - 2GB (VAEs, controlnets)
    pub large_blobs: u64,
    /// Blobs > 2GB (checkpoints)
    pub huge_blobs: u64,
}

impl BlobStats {
    /// Calculate average blob size
    pub fn avg_blob_size(&self) -> u64 {
        if self.blob_count == 0 {
            0
        } else {
            self.total_bytes / self.blob_count
        }
    }
}

/// Iterator over stored hashes (2-level: sha256/ab/hash)
pub struct BlobIter {
    prefixes: fs::ReadDir,
    blobs: Option<fs::ReadDir>,
}

impl Iterator for BlobIter {
    type Item = Result<BlobHash>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(ref mut blobs) = self.blobs {
                match blobs.next() {
                    Some(Ok(entry)) => {
                        // Anything that is not a digest-named file is ignored
                        if let Some(hash) = entry
                            .file_name()
                            .to_str()
                            .and_then(|name| BlobHash::parse(name).ok())
                        {
                            return Some(Ok(hash));
                        }
                        continue;
                    }
                    Some(Err(e)) => return Some(Err(CasError::Io(e))),
                    None => self.blobs = None,
                }
            }

            match self.prefixes.next() {
                Some(Ok(entry)) => {
                    if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                        match fs::read_dir(entry.path()) {
                            Ok(iter) => self.blobs = Some(iter),
                            Err(e) => return Some(Err(CasError::Io(e))),
                        }
                    }
                }
                Some(Err(e)) => return Some(Err(CasError::Io(e))),
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> BlobStore {
        BlobStore::new(temp.path().join("blobs")).unwrap()
    }

    /// Make a stored blob writable again so a test can corrupt it.
    fn make_writable(path: &Path) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o644)).unwrap();
        }
    }

    #[test]
    fn test_import_and_read_back() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);

        let data = b"Hello, Synapse!";
        let blob = blobs.import_bytes(data, None).unwrap();

        assert!(blob.was_new);
        assert_eq!(blob.size, data.len() as u64);
        assert_eq!(blob.hash, BlobHash::of_bytes(data));
        assert_eq!(fs::read(blobs.path_of(&blob.hash).unwrap()).unwrap(), data);
    }

    #[test]
    fn test_deduplication_is_noop() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);

        let first = blobs.import_bytes(b"Duplicate content", None).unwrap();
        let second = blobs.import_bytes(b"Duplicate content", None).unwrap();

        assert_eq!(first.hash, second.hash);
        assert!(first.was_new);
        assert!(!second.was_new);
        assert_eq!(blobs.stats().unwrap().blob_count, 1);
    }

    #[test]
    fn test_mismatch_never_creates_destination() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);

        let wrong = BlobHash::of_bytes(b"something else");
        let err = blobs.import_bytes(b"actual bytes", Some(&wrong)).unwrap_err();

        assert!(matches!(err, CasError::IntegrityMismatch { .. }));
        assert!(!blobs.has(&BlobHash::of_bytes(b"actual bytes")));
        assert!(!blobs.has(&wrong));
        assert_eq!(fs::read_dir(blobs.tmp_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_expected_hash_accepts_matching_bytes() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);

        let expected = BlobHash::of_bytes(b"lora weights");
        let blob = blobs.import_bytes(b"lora weights", Some(&expected)).unwrap();
        assert_eq!(blob.hash, expected);
    }

    #[test]
    fn test_path_layout() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);

        let blob = blobs.import_bytes(b"layout", None).unwrap();
        let hex = blob.hash.as_str();
        let expected = temp
            .path()
            .join("blobs/sha256")
            .join(&hex[..2])
            .join(hex);
        assert_eq!(blob.path, expected);
        assert!(protection::is_protected(&blob.path).unwrap());
    }

    #[test]
    fn test_not_found() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);

        let missing = BlobHash::of_bytes(b"never stored");
        assert!(!blobs.has(&missing));
        assert!(matches!(
            blobs.path_of(&missing),
            Err(CasError::NotFound { .. })
        ));
        assert!(matches!(
            blobs.delete(&missing),
            Err(CasError::NotFound { .. })
        ));
    }

    #[test]
    fn test_verify_states() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);

        let blob = blobs.import_bytes(b"pristine", None).unwrap();
        assert_eq!(blobs.verify(&blob.hash).unwrap(), VerifyStatus::Ok);

        make_writable(&blob.path);
        fs::write(&blob.path, b"bit rot").unwrap();
        assert_eq!(
            blobs.verify(&blob.hash).unwrap(),
            VerifyStatus::Corrupt {
                actual: BlobHash::of_bytes(b"bit rot")
            }
        );

        fs::remove_file(&blob.path).unwrap();
        assert_eq!(blobs.verify(&blob.hash).unwrap(), VerifyStatus::Missing);
    }

    #[test]
    fn test_reimport_heals_corrupt_blob() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);

        let blob = blobs.import_bytes(b"checkpoint", None).unwrap();
        make_writable(&blob.path);
        fs::write(&blob.path, b"truncated").unwrap();

        let healed = blobs.import_bytes(b"checkpoint", None).unwrap();
        assert!(healed.was_new);
        assert_eq!(blobs.verify(&blob.hash).unwrap(), VerifyStatus::Ok);
    }

    #[test]
    fn test_delete() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);

        let blob = blobs.import_bytes(b"to delete", None).unwrap();
        blobs.delete(&blob.hash).unwrap();
        assert!(!blobs.has(&blob.hash));
    }

    #[test]
    fn test_iter_and_stats() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);

        let h1 = blobs.import_bytes(b"one", None).unwrap().hash;
        let h2 = blobs.import_bytes(b"two", None).unwrap().hash;
        let h3 = blobs.import_bytes(b"three", None).unwrap().hash;

        let found: HashSet<_> = blobs.iter().unwrap().map(|h| h.unwrap()).collect();
        assert_eq!(found, HashSet::from([h1, h2, h3]));

        let stats = blobs.stats().unwrap();
        assert_eq!(stats.blob_count, 3);
        assert_eq!(stats.total_bytes, 11);
        assert_eq!(stats.small_blobs, 3);
        assert_eq!(stats.avg_blob_size(), 3);
    }

    #[test]
    fn test_clean_temp_respects_age() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);

        fs::write(blobs.tmp_dir().join(".tmpcrashed"), b"partial").unwrap();
        assert_eq!(blobs.clean_temp(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(blobs.clean_temp(Duration::ZERO).unwrap(), 1);
    }
}

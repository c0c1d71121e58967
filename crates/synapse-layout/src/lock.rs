//! Scoped advisory locks.
//!
//! Each scope maps to one lock file under `state/locks/`. Locks are `flock`
//! based, so they serialize both threads (separate open file descriptions)
//! and processes, and the kernel drops them if the holder dies.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::{LayoutError, Result};

/// Poll interval while waiting for a contended lock
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Logical resource guarded by a lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockScope {
    /// Whole-store maintenance (garbage collection)
    Store,
    /// Runtime stacks, views, active pointers and profile documents
    Runtime,
    /// One pack's declaration and lock document
    Pack(String),
}

impl LockScope {
    pub(crate) fn file_name(&self) -> String {
        match self {
            LockScope::Store => "store.lock".to_string(),
            LockScope::Runtime => "runtime.lock".to_string(),
            LockScope::Pack(name) => format!("pack-{}.lock", name),
        }
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockScope::Store => write!(f, "store"),
            LockScope::Runtime => write!(f, "runtime"),
            LockScope::Pack(name) => write!(f, "pack '{}'", name),
        }
    }
}

/// An exclusively locked file. Unlocked on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock on `path`, waiting at most `timeout`.
    ///
    /// `label` names the resource in the `Locked` error.
    pub fn acquire(path: &Path, label: &str, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if is_contended(&e) => {
                    if start.elapsed() >= timeout {
                        return Err(LayoutError::Locked {
                            scope: label.to_string(),
                            timeout,
                        });
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL.min(timeout));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock too; unlock explicitly so
        // the release does not depend on drop order of the File.
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Guard for a [`LockScope`], returned by `StoreLayout::lock`.
#[derive(Debug)]
pub struct ScopedLock {
    scope: LockScope,
    _file: FileLock,
}

impl ScopedLock {
    pub(crate) fn new(scope: LockScope, file: FileLock) -> Self {
        tracing::trace!(%scope, "lock acquired");
        Self { scope, _file: file }
    }

    pub fn scope(&self) -> &LockScope {
        &self.scope
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        tracing::trace!(scope = %self.scope, "lock released");
    }
}

//! # synapse-layout
//!
//! Single source of truth for where things live in a Synapse store, and the
//! only place allowed to write the shared JSON documents.
//!
//! ## Directory Layout
//!
//! ```text
//! <root>/
//! ├── state/
//! │   ├── config.json                      # store-wide document
//! │   ├── locks/<scope>.lock               # advisory lock files
//! │   ├── packs/<Pack>/pack.json           # pack declaration
//! │   ├── packs/<Pack>/lock.json           # resolved pins
//! │   └── profiles/<profile>/profile.json  # ordered pack list
//! └── data/
//!     ├── blobs/sha256/<ab>/<sha256>       # content-addressed files
//!     ├── views/<ui>/profiles/<profile>/   # symlink trees
//!     ├── views/<ui>/active -> profiles/<profile>
//!     └── runtime.json                     # per-UI profile stacks
//! ```

mod document;
mod lock;

pub use document::{read_document, write_document};
pub use lock::{FileLock, LockScope, ScopedLock};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use synapse_config::Config;

/// Errors raised by path resolution, locking, and document I/O
#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed document {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Timed out after {timeout:?} waiting for lock on {scope}")]
    Locked { scope: String, timeout: Duration },

    #[error("Invalid {kind} name {name:?}: {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, LayoutError>;

/// Check that `name` is usable as a single path component.
pub fn validate_name(kind: &'static str, name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name == "." || name == ".." {
        Some("must not be a relative path marker")
    } else if name.starts_with('.') {
        Some("must not start with '.'")
    } else if name.contains(['/', '\\', '\0']) {
        Some("must not contain path separators")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(LayoutError::InvalidName {
            kind,
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Path resolution and locking for one store root.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
    lock_timeout: Duration,
}

impl StoreLayout {
    pub fn new<P: AsRef<Path>>(root: P, lock_timeout: Duration) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            lock_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.store_root(), config.locks.timeout())
    }

    /// Create the directory skeleton. Safe to call repeatedly.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.packs_dir(),
            self.profiles_dir(),
            self.locks_dir(),
            self.blobs_dir(),
            self.views_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Store-wide document (`state/config.json`)
    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join("config.json")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.state_dir().join("locks")
    }

    pub fn packs_dir(&self) -> PathBuf {
        self.state_dir().join("packs")
    }

    pub fn pack_dir(&self, pack: &str) -> PathBuf {
        self.packs_dir().join(pack)
    }

    pub fn pack_path(&self, pack: &str) -> PathBuf {
        self.pack_dir(pack).join("pack.json")
    }

    pub fn pack_lock_path(&self, pack: &str) -> PathBuf {
        self.pack_dir(pack).join("lock.json")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.state_dir().join("profiles")
    }

    pub fn profile_path(&self, profile: &str) -> PathBuf {
        self.profiles_dir().join(profile).join("profile.json")
    }

    /// Root handed to the blob store; blobs sit below `sha256/`.
    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir().join("blobs")
    }

    pub fn views_dir(&self) -> PathBuf {
        self.data_dir().join("views")
    }

    pub fn ui_dir(&self, ui: &str) -> PathBuf {
        self.views_dir().join(ui)
    }

    pub fn ui_profiles_dir(&self, ui: &str) -> PathBuf {
        self.ui_dir(ui).join("profiles")
    }

    pub fn view_dir(&self, ui: &str, profile: &str) -> PathBuf {
        self.ui_profiles_dir(ui).join(profile)
    }

    /// The `active` symlink for one UI
    pub fn active_link(&self, ui: &str) -> PathBuf {
        self.ui_dir(ui).join("active")
    }

    pub fn runtime_path(&self) -> PathBuf {
        self.data_dir().join("runtime.json")
    }

    /// Names of packs with a declaration on disk, sorted.
    pub fn list_packs(&self) -> Result<Vec<String>> {
        list_children_with(&self.packs_dir(), "pack.json")
    }

    /// Names of profiles with a document on disk, sorted.
    pub fn list_profiles(&self) -> Result<Vec<String>> {
        list_children_with(&self.profiles_dir(), "profile.json")
    }

    /// Acquire an exclusive lock on `scope`.
    ///
    /// The lock is held until the returned guard is dropped.
    pub fn lock(&self, scope: LockScope) -> Result<ScopedLock> {
        let path = self.locks_dir().join(scope.file_name());
        let file = FileLock::acquire(&path, &scope.to_string(), self.lock_timeout)?;
        Ok(ScopedLock::new(scope, file))
    }

    /// Run `f` while holding the lock on `scope`.
    ///
    /// The lock is released on every exit path, including unwinding.
    pub fn with_lock<T, E, F>(&self, scope: LockScope, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<LayoutError>,
    {
        let _guard = self.lock(scope)?;
        f()
    }
}

fn list_children_with(dir: &Path, marker: &str) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() || !entry.path().join(marker).exists() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(temp: &TempDir) -> StoreLayout {
        StoreLayout::new(temp.path(), Duration::from_millis(300))
    }

    #[test]
    fn test_paths_follow_layout() {
        let temp = TempDir::new().unwrap();
        let l = layout(&temp);
        let root = temp.path();

        assert_eq!(l.pack_path("P"), root.join("state/packs/P/pack.json"));
        assert_eq!(l.pack_lock_path("P"), root.join("state/packs/P/lock.json"));
        assert_eq!(
            l.profile_path("global"),
            root.join("state/profiles/global/profile.json")
        );
        assert_eq!(
            l.view_dir("comfyui", "work__P"),
            root.join("data/views/comfyui/profiles/work__P")
        );
        assert_eq!(l.active_link("comfyui"), root.join("data/views/comfyui/active"));
        assert_eq!(l.runtime_path(), root.join("data/runtime.json"));
        assert_eq!(l.blobs_dir(), root.join("data/blobs"));
    }

    #[test]
    fn test_ensure_dirs_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let l = layout(&temp);
        l.ensure_dirs().unwrap();
        l.ensure_dirs().unwrap();
        assert!(l.packs_dir().is_dir());
        assert!(l.views_dir().is_dir());
        assert!(l.locks_dir().is_dir());
    }

    #[test]
    fn test_list_packs_requires_declaration() {
        let temp = TempDir::new().unwrap();
        let l = layout(&temp);
        l.ensure_dirs().unwrap();

        write_document(&l.pack_path("Beta"), &serde_json::json!({"name": "Beta"})).unwrap();
        write_document(&l.pack_path("Alpha"), &serde_json::json!({"name": "Alpha"})).unwrap();
        fs::create_dir_all(l.pack_dir("Empty")).unwrap();

        assert_eq!(l.list_packs().unwrap(), vec!["Alpha", "Beta"]);
        assert!(l.list_profiles().unwrap().is_empty());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("pack", "MyPack_v2").is_ok());
        assert!(validate_name("pack", "").is_err());
        assert!(validate_name("pack", "..").is_err());
        assert!(validate_name("pack", ".hidden").is_err());
        assert!(validate_name("pack", "a/b").is_err());
        assert!(validate_name("pack", "a\\b").is_err());

        let err = validate_name("ui", "x/y").unwrap_err();
        assert!(err.to_string().contains("ui"));
    }
}

//! # synapse-lock
//!
//! Parser for a pack's `lock.json`: the hash-pinned snapshot of its
//! dependencies at the time they were resolved.
//!
//! Kept apart from `pack.json` so that what was declared and what was
//! actually pinned never get mixed up.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use synapse_cas::BlobHash;
use synapse_layout::{read_document, write_document, LayoutError};
use synapse_pack::AssetType;

/// Engine tag written into every lock document
pub const LOCK_ENGINE: &str = "synapse-lock-v1";

#[derive(Error, Debug)]
pub enum LockError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

pub type Result<T> = std::result::Result<T, LockError>;

/// Top-level lock.json structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackLock {
    pub meta: LockMeta,
    /// Dependency name -> pin
    pub pins: BTreeMap<String, LockedAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMeta {
    pub engine: String,
    pub generated_at: DateTime<Utc>,
}

/// One resolved dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedAsset {
    pub sha256: BlobHash,
    pub size: u64,
    pub filename: String,
    pub asset_type: AssetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl Default for PackLock {
    fn default() -> Self {
        Self::new()
    }
}

impl PackLock {
    pub fn new() -> Self {
        Self {
            meta: LockMeta {
                engine: LOCK_ENGINE.to_string(),
                generated_at: Utc::now(),
            },
            pins: BTreeMap::new(),
        }
    }

    /// Load a lockfile, or `None` if the pack was never resolved.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        Ok(read_document(path.as_ref())?)
    }

    /// Save the lockfile atomically, stamping the generation time.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.meta.engine = LOCK_ENGINE.to_string();
        self.meta.generated_at = Utc::now();
        write_document(path.as_ref(), self)?;
        Ok(())
    }

    pub fn pin(&self, dependency: &str) -> Option<&LockedAsset> {
        self.pins.get(dependency)
    }

    pub fn set_pin(&mut self, dependency: impl Into<String>, asset: LockedAsset) {
        self.pins.insert(dependency.into(), asset);
    }

    pub fn remove_pin(&mut self, dependency: &str) -> Option<LockedAsset> {
        self.pins.remove(dependency)
    }

    /// Every pinned hash, for reachability scans.
    pub fn hashes(&self) -> impl Iterator<Item = &BlobHash> {
        self.pins.values().map(|pin| &pin.sha256)
    }

    /// Dependency name -> pinned hash
    pub fn pinned_hashes(&self) -> BTreeMap<String, BlobHash> {
        self.pins
            .iter()
            .map(|(name, pin)| (name.clone(), pin.sha256.clone()))
            .collect()
    }
}

//! Garbage collection of unreferenced blobs.
//!
//! Reachability is recomputed from scratch on every run by a reverse scan:
//! every lock pin, every hash a declaration carries, and every symlink in
//! every view. Blobs track no referrers of their own.

use std::collections::HashSet;
use std::path::Path;
use std::time::SystemTime;

use synapse_cas::BlobHash;
use synapse_config::log_store_debug;
use synapse_layout::LockScope;
use synapse_runtime::view_links;

use crate::error::Result;
use crate::library::Library;

#[derive(Debug, Clone, Default)]
pub struct GcReport {
    pub total_blobs: u64,
    pub total_bytes: u64,
    pub referenced: u64,
    /// Unreferenced blobs with their sizes
    pub orphans: Vec<(BlobHash, u64)>,
    pub orphan_bytes: u64,
    pub deleted: u64,
    pub deleted_bytes: u64,
    /// Orphans kept because they are younger than the grace period
    pub kept_recent: u64,
}

impl Library {
    /// List orphaned blobs and, with `delete`, remove those older than the
    /// configured grace period.
    ///
    /// Holds the store and runtime locks, so no view can start linking to a
    /// blob between the scan and the delete.
    pub fn gc(&self, delete: bool) -> Result<GcReport> {
        let _store_guard = self.layout().lock(LockScope::Store)?;
        let _runtime_guard = self.layout().lock(LockScope::Runtime)?;

        let keep = self.reachable_hashes()?;
        let mut report = GcReport {
            referenced: keep.len() as u64,
            ..GcReport::default()
        };

        for hash in self.blobs().iter()? {
            let hash = hash?;
            let size = self.blobs().size_of(&hash)?;
            report.total_blobs += 1;
            report.total_bytes += size;
            if !keep.contains(&hash) {
                report.orphan_bytes += size;
                report.orphans.push((hash, size));
            }
        }
        report.orphans.sort();

        if delete {
            let grace = self.config().gc.grace();
            let now = SystemTime::now();
            for (hash, size) in &report.orphans {
                let age = self
                    .blobs()
                    .modified_at(hash)
                    .ok()
                    .and_then(|m| now.duration_since(m).ok())
                    .unwrap_or_default();
                if age < grace {
                    report.kept_recent += 1;
                    continue;
                }
                self.blobs().delete(hash)?;
                report.deleted += 1;
                report.deleted_bytes += size;
            }
        }

        log_store_debug!(
            "Garbage collection finished",
            total = report.total_blobs,
            orphans = report.orphans.len(),
            deleted = report.deleted
        );
        Ok(report)
    }

    fn reachable_hashes(&self) -> Result<HashSet<BlobHash>> {
        let mut keep = HashSet::new();

        for name in self.layout().list_packs()? {
            keep.extend(self.load_lock(&name)?.hashes().cloned());
            let pack = self.load_pack(&name)?;
            keep.extend(pack.dependencies.iter().filter_map(|d| d.sha256.clone()));
        }

        for (_, target) in view_links(&self.layout().views_dir())? {
            if let Some(hash) = hash_from_blob_path(&target) {
                keep.insert(hash);
            }
        }
        Ok(keep)
    }
}

/// Blob files are named by their digest.
fn hash_from_blob_path(path: &Path) -> Option<BlobHash> {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| BlobHash::parse(name).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_from_blob_path() {
        let hash = BlobHash::of_bytes(b"x");
        let path = Path::new("/store/data/blobs/sha256")
            .join(hash.prefix())
            .join(hash.as_str());
        assert_eq!(hash_from_blob_path(&path), Some(hash));
        assert_eq!(hash_from_blob_path(Path::new("/tmp/readme.txt")), None);
    }
}

//! View generation.
//!
//! A view is a directory of symlinks laid out the way one UI expects, with
//! every leaf pointing straight into the blob store. Views are derived data:
//! each build starts from an empty staging directory and replaces the old
//! tree wholesale, so entries from packs that left the profile cannot linger.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use synapse_cas::{BlobHash, BlobStore};
use synapse_config::path::is_contained_relative;
use synapse_config::{log_view_debug, log_view_info, log_view_warn};
use synapse_layout::StoreLayout;
use synapse_pack::AssetType;

use crate::ui::UiLayout;
use crate::Result;

/// One installed asset a pack contributes to views
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackAsset {
    pub dependency: String,
    pub asset_type: AssetType,
    pub filename: String,
    pub sha256: BlobHash,
}

/// Installed contents of one pack, in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackContents {
    pub pack: String,
    pub assets: Vec<PackAsset>,
}

/// A file a later entry overwrote during one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shadow {
    /// Path inside the view
    pub path: PathBuf,
    pub shadowed_pack: String,
    pub shadowed_sha256: BlobHash,
    pub winner_pack: String,
    pub winner_sha256: BlobHash,
}

impl fmt::Display for Shadow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pack {}'s file {} was shadowed by pack {}",
            self.shadowed_pack,
            self.path.display(),
            self.winner_pack
        )
    }
}

/// Resolved entry of a view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewEntry {
    pub pack: String,
    pub dependency: String,
    pub sha256: BlobHash,
}

/// Outcome of the last-wins pass, before anything touches the disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewPlan {
    pub entries: BTreeMap<PathBuf, ViewEntry>,
    pub shadows: Vec<Shadow>,
}

/// A pinned blob that was absent when the view was built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingBlob {
    pub pack: String,
    pub dependency: String,
    pub sha256: BlobHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewReport {
    pub ui: String,
    pub profile: String,
    pub path: PathBuf,
    pub linked: usize,
    pub shadows: Vec<Shadow>,
    pub missing: Vec<MissingBlob>,
}

/// Builds symlink trees from profiles.
pub struct ViewBuilder<'a> {
    layout: &'a StoreLayout,
    blobs: &'a BlobStore,
}

impl<'a> ViewBuilder<'a> {
    pub fn new(layout: &'a StoreLayout, blobs: &'a BlobStore) -> Self {
        Self { layout, blobs }
    }

    /// Apply packs in order; a later pack's file replaces an earlier one at
    /// the same path and the replaced entry is recorded as a shadow.
    pub fn plan(ui: &str, packs: &[PackContents]) -> ViewPlan {
        let conventions = UiLayout::for_ui(ui);
        let mut plan = ViewPlan::default();

        for contents in packs {
            for asset in &contents.assets {
                if !is_contained_relative(&asset.filename) {
                    log_view_warn!(
                        "Skipping file outside the view",
                        pack = contents.pack.as_str(),
                        dependency = asset.dependency.as_str(),
                        filename = asset.filename.as_str()
                    );
                    continue;
                }
                let path = conventions.folder(asset.asset_type).join(&asset.filename);
                let entry = ViewEntry {
                    pack: contents.pack.clone(),
                    dependency: asset.dependency.clone(),
                    sha256: asset.sha256.clone(),
                };
                if let Some(previous) = plan.entries.insert(path.clone(), entry) {
                    plan.shadows.push(Shadow {
                        path,
                        shadowed_pack: previous.pack,
                        shadowed_sha256: previous.sha256,
                        winner_pack: contents.pack.clone(),
                        winner_sha256: asset.sha256.clone(),
                    });
                }
            }
        }
        plan
    }

    /// Materialize `profile` for `ui` from scratch.
    ///
    /// The tree is built in a hidden sibling directory and swapped in at the
    /// end. Blobs missing from the store are skipped and reported.
    pub fn build(&self, ui: &str, profile: &str, packs: &[PackContents]) -> Result<ViewReport> {
        let plan = Self::plan(ui, packs);
        let target = self.layout.view_dir(ui, profile);
        let parent = self.layout.ui_profiles_dir(ui);
        fs::create_dir_all(&parent)?;

        let staging = parent.join(format!(".{}.staging", profile));
        remove_dir_if_exists(&staging)?;
        fs::create_dir_all(&staging)?;

        let mut missing = Vec::new();
        let mut linked = 0;
        for (rel, entry) in &plan.entries {
            let blob = self.blobs.blob_path(&entry.sha256);
            if !blob.is_file() {
                missing.push(MissingBlob {
                    pack: entry.pack.clone(),
                    dependency: entry.dependency.clone(),
                    sha256: entry.sha256.clone(),
                });
                continue;
            }
            let dest = staging.join(rel);
            if let Some(dir) = dest.parent() {
                fs::create_dir_all(dir)?;
            }
            symlink(&blob, &dest)?;
            linked += 1;
        }

        swap_into_place(&staging, &target)?;

        for shadow in &plan.shadows {
            log_view_debug!("Shadowed file", detail = shadow.to_string().as_str());
        }
        log_view_info!(
            "View built",
            ui = ui,
            profile = profile,
            linked = linked,
            shadows = plan.shadows.len(),
            missing = missing.len()
        );

        Ok(ViewReport {
            ui: ui.to_string(),
            profile: profile.to_string(),
            path: target,
            linked,
            shadows: plan.shadows,
            missing,
        })
    }

    /// Delete a view directory. Missing views are fine.
    pub fn remove(&self, ui: &str, profile: &str) -> Result<()> {
        remove_dir_if_exists(&self.layout.view_dir(ui, profile))?;
        Ok(())
    }

    pub fn exists(&self, ui: &str, profile: &str) -> bool {
        self.layout.view_dir(ui, profile).is_dir()
    }
}

/// Replace `target` with `staging`.
///
/// The old tree is first moved aside, then the staging tree renamed in, then
/// the old tree removed. Leftovers of an interrupted swap are cleared by the
/// next build of the same view.
fn swap_into_place(staging: &Path, target: &Path) -> io::Result<()> {
    let retired = match (target.parent(), target.file_name()) {
        (Some(parent), Some(name)) => parent.join(format!(".{}.old", name.to_string_lossy())),
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "view path has no parent",
            ))
        }
    };
    remove_dir_if_exists(&retired)?;

    if target.exists() {
        fs::rename(target, &retired)?;
    }
    fs::rename(staging, target)?;
    remove_dir_if_exists(&retired)
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Every symlink in the views tree as `(link, target)`.
///
/// Used for reachability scans and diagnostics.
pub fn view_links(views_root: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut links = Vec::new();
    if !views_root.exists() {
        return Ok(links);
    }
    for entry in WalkDir::new(views_root).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.path_is_symlink() && entry.depth() > 2 {
            let target = fs::read_link(entry.path())?;
            links.push((entry.into_path(), target));
        }
    }
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn asset(dep: &str, asset_type: AssetType, filename: &str, content: &[u8]) -> PackAsset {
        PackAsset {
            dependency: dep.to_string(),
            asset_type,
            filename: filename.to_string(),
            sha256: BlobHash::of_bytes(content),
        }
    }

    #[test]
    fn test_plan_last_wins() {
        let packs = vec![
            PackContents {
                pack: "A".into(),
                assets: vec![asset("l", AssetType::Lora, "lora.safetensors", b"a")],
            },
            PackContents {
                pack: "B".into(),
                assets: vec![asset("l", AssetType::Lora, "lora.safetensors", b"b")],
            },
        ];

        let plan = ViewBuilder::plan("comfyui", &packs);
        let path = PathBuf::from("models/loras/lora.safetensors");
        assert_eq!(plan.entries[&path].pack, "B");
        assert_eq!(plan.shadows.len(), 1);
        assert_eq!(
            plan.shadows[0].to_string(),
            "pack A's file models/loras/lora.safetensors was shadowed by pack B"
        );
    }

    #[test]
    fn test_same_name_different_folders_do_not_collide() {
        let packs = vec![PackContents {
            pack: "A".into(),
            assets: vec![
                asset("x", AssetType::Lora, "model.safetensors", b"1"),
                asset("y", AssetType::Vae, "model.safetensors", b"2"),
            ],
        }];
        let plan = ViewBuilder::plan("comfyui", &packs);
        assert_eq!(plan.entries.len(), 2);
        assert!(plan.shadows.is_empty());
    }

    #[test]
    fn test_escaping_filenames_are_not_linked() {
        let temp = TempDir::new().unwrap();
        let layout = StoreLayout::new(temp.path(), Duration::from_secs(1));
        let blobs = BlobStore::new(layout.blobs_dir()).unwrap();
        blobs.import_bytes(b"ckpt", None).unwrap();
        let builder = ViewBuilder::new(&layout, &blobs);
        let outside = temp.path().join("outside.safetensors");

        let packs = vec![PackContents {
            pack: "A".into(),
            assets: vec![
                asset("up", AssetType::Checkpoint, "../../../../outside.safetensors", b"ckpt"),
                asset("abs", AssetType::Checkpoint, &outside.display().to_string(), b"ckpt"),
                asset("ok", AssetType::Checkpoint, "base.safetensors", b"ckpt"),
            ],
        }];
        let report = builder.build("comfyui", "global", &packs).unwrap();
        assert_eq!(report.linked, 1);
        assert!(!outside.exists());
        assert_eq!(view_links(&report.path).unwrap().len(), 1);
    }

    #[test]
    fn test_build_replaces_stale_entries() {
        let temp = TempDir::new().unwrap();
        let layout = StoreLayout::new(temp.path(), Duration::from_secs(1));
        let blobs = BlobStore::new(layout.blobs_dir()).unwrap();
        blobs.import_bytes(b"ckpt", None).unwrap();
        blobs.import_bytes(b"old lora", None).unwrap();
        let builder = ViewBuilder::new(&layout, &blobs);

        let first = vec![PackContents {
            pack: "A".into(),
            assets: vec![
                asset("c", AssetType::Checkpoint, "base.safetensors", b"ckpt"),
                asset("l", AssetType::Lora, "old.safetensors", b"old lora"),
            ],
        }];
        builder.build("comfyui", "global", &first).unwrap();
        let view = layout.view_dir("comfyui", "global");
        assert!(view.join("models/loras/old.safetensors").exists());

        let second = vec![PackContents {
            pack: "A".into(),
            assets: vec![asset("c", AssetType::Checkpoint, "base.safetensors", b"ckpt")],
        }];
        let report = builder.build("comfyui", "global", &second).unwrap();
        assert_eq!(report.linked, 1);
        assert!(!view.join("models/loras/old.safetensors").exists());
        assert_eq!(
            fs::read(view.join("models/checkpoints/base.safetensors")).unwrap(),
            b"ckpt"
        );

        // Only the final tree remains in the profiles directory
        let names: Vec<_> = fs::read_dir(layout.ui_profiles_dir("comfyui"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("global")]);
    }

    #[test]
    fn test_missing_blob_is_reported_not_linked() {
        let temp = TempDir::new().unwrap();
        let layout = StoreLayout::new(temp.path(), Duration::from_secs(1));
        let blobs = BlobStore::new(layout.blobs_dir()).unwrap();
        let builder = ViewBuilder::new(&layout, &blobs);

        let packs = vec![PackContents {
            pack: "A".into(),
            assets: vec![asset("c", AssetType::Checkpoint, "gone.safetensors", b"gone")],
        }];
        let report = builder.build("comfyui", "global", &packs).unwrap();
        assert_eq!(report.linked, 0);
        assert_eq!(report.missing.len(), 1);
        assert!(builder.exists("comfyui", "global"));
    }

    #[test]
    fn test_view_links_lists_leaf_symlinks() {
        let temp = TempDir::new().unwrap();
        let layout = StoreLayout::new(temp.path(), Duration::from_secs(1));
        let blobs = BlobStore::new(layout.blobs_dir()).unwrap();
        let blob = blobs.import_bytes(b"vae", None).unwrap();
        let builder = ViewBuilder::new(&layout, &blobs);

        let packs = vec![PackContents {
            pack: "A".into(),
            assets: vec![asset("v", AssetType::Vae, "vae.safetensors", b"vae")],
        }];
        builder.build("comfyui", "global", &packs).unwrap();
        crate::active::point_active(&layout, "comfyui", "global").unwrap();

        let links = view_links(&layout.views_dir()).unwrap();
        assert_eq!(links.len(), 1, "the active pointer is not a leaf");
        assert_eq!(links[0].1, blob.path);
    }
}

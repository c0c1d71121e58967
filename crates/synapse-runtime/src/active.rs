//! The per-UI `active` symlink.
//!
//! `views/<ui>/active -> profiles/<profile>`. The link is relative so the
//! whole `views/` tree can be bind-mounted or moved.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Component, Path, PathBuf};

use synapse_layout::StoreLayout;

use crate::Result;

/// Point `ui`'s active link at `profile`.
///
/// A new link is created beside the old one and renamed over it, so readers
/// see either the old target or the new one.
pub fn point_active(layout: &StoreLayout, ui: &str, profile: &str) -> Result<()> {
    let link = layout.active_link(ui);
    let ui_dir = layout.ui_dir(ui);
    fs::create_dir_all(&ui_dir)?;

    let tmp = ui_dir.join(format!(".active.{}.tmp", std::process::id()));
    match fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    symlink(Path::new("profiles").join(profile), &tmp)?;
    fs::rename(&tmp, &link)?;
    Ok(())
}

/// Profile the active link names, or `None` if there is no link.
///
/// A link that does not have the `profiles/<name>` shape reads as its raw
/// target so callers can report it.
pub fn read_active(layout: &StoreLayout, ui: &str) -> Result<Option<String>> {
    let target = match fs::read_link(layout.active_link(ui)) {
        Ok(target) => target,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
            // Exists but is not a symlink
            return Ok(Some(layout.active_link(ui).display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(Some(profile_from_target(&target)))
}

fn profile_from_target(target: &Path) -> String {
    let parts: Vec<Component> = target.components().collect();
    match parts.as_slice() {
        [Component::Normal(dir), Component::Normal(name)] if *dir == "profiles" => {
            name.to_string_lossy().into_owned()
        }
        _ => target.display().to_string(),
    }
}

/// Absolute directory the active link resolves to, if any.
pub fn active_view_dir(layout: &StoreLayout, ui: &str) -> Result<Option<PathBuf>> {
    Ok(read_active(layout, ui)?.map(|profile| layout.view_dir(ui, &profile)))
}

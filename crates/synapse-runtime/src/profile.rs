//! Profile documents (`state/profiles/<name>/profile.json`).

use serde::{Deserialize, Serialize};

use synapse_layout::{read_document, write_document, StoreLayout};

use crate::Result;

/// The base profile every stack sits on
pub const GLOBAL_PROFILE: &str = "global";

const WORK_PREFIX: &str = "work__";

/// `work__<pack>`
pub fn work_profile_name(pack: &str) -> String {
    format!("{}{}", WORK_PREFIX, pack)
}

/// The pack a `work__` profile was made for.
pub fn work_profile_pack(profile: &str) -> Option<&str> {
    profile.strip_prefix(WORK_PREFIX).filter(|p| !p.is_empty())
}

/// An ordered pack list. Later packs win filename collisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub packs: Vec<String>,
}

impl Profile {
    pub fn new(name: impl Into<String>, packs: Vec<String>) -> Self {
        Self {
            name: name.into(),
            packs,
        }
    }

    pub fn empty_global() -> Self {
        Self::new(GLOBAL_PROFILE, Vec::new())
    }

    /// Compose `work__<pack>` from the global list.
    ///
    /// `pack` is moved to the end when global already lists it, so it
    /// appears once and wins every collision.
    pub fn work(global: &Profile, pack: &str) -> Self {
        let mut packs: Vec<String> = global.packs.iter().filter(|p| *p != pack).cloned().collect();
        packs.push(pack.to_string());
        Self::new(work_profile_name(pack), packs)
    }

    pub fn is_global(&self) -> bool {
        self.name == GLOBAL_PROFILE
    }

    pub fn contains(&self, pack: &str) -> bool {
        self.packs.iter().any(|p| p == pack)
    }

    /// Append `pack` unless already listed. Returns whether it changed.
    pub fn add_pack(&mut self, pack: &str) -> bool {
        if self.contains(pack) {
            return false;
        }
        self.packs.push(pack.to_string());
        true
    }

    pub fn remove_pack(&mut self, pack: &str) -> bool {
        let before = self.packs.len();
        self.packs.retain(|p| p != pack);
        self.packs.len() != before
    }

    pub fn load(layout: &StoreLayout, name: &str) -> Result<Option<Self>> {
        Ok(read_document(&layout.profile_path(name))?)
    }

    /// The global profile, empty if it was never written.
    pub fn load_global(layout: &StoreLayout) -> Result<Self> {
        Ok(Self::load(layout, GLOBAL_PROFILE)?.unwrap_or_else(Self::empty_global))
    }

    pub fn save(&self, layout: &StoreLayout) -> Result<()> {
        Ok(write_document(&layout.profile_path(&self.name), self)?)
    }

    /// Write the document only if it differs from what is on disk.
    pub fn save_if_changed(&self, layout: &StoreLayout) -> Result<bool> {
        if Self::load(layout, &self.name)?.as_ref() == Some(self) {
            return Ok(false);
        }
        self.save(layout)?;
        Ok(true)
    }
}

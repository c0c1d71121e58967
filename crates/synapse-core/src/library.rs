//! The `Library` facade: one store root, opened once, with every operation
//! the presentation layer needs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use synapse_cas::BlobStore;
use synapse_config::{log_profile_warn, log_store_debug, Config};
use synapse_layout::{read_document, write_document, LockScope, StoreLayout};
use synapse_lock::{LockedAsset, PackLock};
use synapse_pack::{AssetStatus, Pack};
use synapse_runtime::{
    work_profile_name, PackAsset, PackContents, Profile, RuntimeState, ViewBuilder, ViewReport,
};

use crate::error::{batch_outcome, CoreError, Result};
use crate::profile::{BackOutcome, ProfileService, RebuildScope, SwitchReport, UiStatus};
use crate::resolve::{AssetProvider, DefaultFetcher, DirectProvider, Fetcher, Resolver};
use crate::update::{UpdatePlan, UpdateResult, UpdateService};

/// Layout version written to `state/config.json`
pub const STORE_SCHEMA_VERSION: u32 = 1;

/// Store-wide document (`state/config.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDocument {
    pub schema_version: u32,
    pub uis: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a fully successful install
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub pack: String,
    /// Dependencies resolved by this run
    pub resolved: Vec<String>,
    /// Dependencies that were already installed
    pub already_installed: Vec<String>,
    /// Advisory base-model mismatches
    pub warnings: Vec<String>,
    pub views: Vec<ViewReport>,
}

/// One row of `list_packs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSummary {
    pub name: String,
    pub version: Option<String>,
    pub dependencies: usize,
    pub installed: bool,
}

pub struct Library {
    config: Config,
    layout: StoreLayout,
    blobs: BlobStore,
    provider: Box<dyn AssetProvider>,
    fetcher: Box<dyn Fetcher>,
}

impl Library {
    /// Open the store with the built-in provider and fetcher.
    pub fn open(config: Config) -> Result<Self> {
        let fetcher = DefaultFetcher::new(config.network.timeout()).map_err(|e| {
            CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })?;
        Self::open_with(config, Box::new(DirectProvider), Box::new(fetcher))
    }

    /// Open the store with caller-supplied collaborators.
    pub fn open_with(
        config: Config,
        provider: Box<dyn AssetProvider>,
        fetcher: Box<dyn Fetcher>,
    ) -> Result<Self> {
        for ui in &config.ui.enabled {
            synapse_layout::validate_name("ui", ui)?;
        }

        let layout = StoreLayout::from_config(&config);
        layout.ensure_dirs()?;
        let blobs = BlobStore::new(layout.blobs_dir())?
            .with_verify_existing(config.blobs.verify_existing)
            .with_lock_timeout(config.locks.timeout());

        let library = Self {
            config,
            layout,
            blobs,
            provider,
            fetcher,
        };
        library.ensure_store_document()?;
        Ok(library)
    }

    fn ensure_store_document(&self) -> Result<()> {
        let path = self.layout.config_path();
        self.layout.with_lock(LockScope::Store, || {
            let existing: Option<StoreDocument> = read_document(&path)?;
            let mut doc = existing.clone().unwrap_or_else(|| StoreDocument {
                schema_version: STORE_SCHEMA_VERSION,
                uis: Vec::new(),
                created_at: Utc::now(),
            });
            for ui in &self.config.ui.enabled {
                if !doc.uis.contains(ui) {
                    doc.uis.push(ui.clone());
                }
            }
            if existing.as_ref() != Some(&doc) {
                write_document(&path, &doc)?;
                log_store_debug!("Store document updated", uis = doc.uis.len());
            }
            Ok::<_, CoreError>(())
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn store_document(&self) -> Result<Option<StoreDocument>> {
        Ok(read_document(&self.layout.config_path())?)
    }

    /// Registered UIs plus any UI that already has a runtime stack, sorted.
    pub fn uis(&self) -> Result<Vec<String>> {
        let mut uis = self.store_document()?.map(|d| d.uis).unwrap_or_default();
        let state = RuntimeState::load(&self.layout.runtime_path())?;
        uis.extend(state.ui.keys().cloned());
        uis.extend(self.config.ui.enabled.iter().cloned());
        uis.sort();
        uis.dedup();
        Ok(uis)
    }

    pub fn profiles(&self) -> ProfileService<'_> {
        ProfileService::new(self)
    }

    pub fn updates(&self) -> UpdateService<'_> {
        UpdateService::new(self)
    }

    pub(crate) fn resolver(&self) -> Resolver<'_> {
        Resolver {
            blobs: &self.blobs,
            provider: self.provider.as_ref(),
            fetcher: self.fetcher.as_ref(),
            network: &self.config.network,
        }
    }

    pub(crate) fn view_builder(&self) -> ViewBuilder<'_> {
        ViewBuilder::new(&self.layout, &self.blobs)
    }

    // ---- pack documents ----

    pub(crate) fn load_pack(&self, name: &str) -> Result<Pack> {
        synapse_layout::validate_name("pack", name)?;
        read_document(&self.layout.pack_path(name))?
            .ok_or_else(|| CoreError::PackNotFound(name.to_string()))
    }

    pub(crate) fn load_lock(&self, name: &str) -> Result<PackLock> {
        Ok(PackLock::load(self.layout.pack_lock_path(name))?.unwrap_or_default())
    }

    /// Installed assets of `pack` in declaration order.
    ///
    /// A pack whose declaration is gone contributes nothing.
    pub(crate) fn pack_contents(&self, pack: &str) -> Result<PackContents> {
        let declaration: Option<Pack> = read_document(&self.layout.pack_path(pack))?;
        let Some(declaration) = declaration else {
            log_profile_warn!("Profile lists a pack with no declaration", pack = pack);
            return Ok(PackContents {
                pack: pack.to_string(),
                assets: Vec::new(),
            });
        };
        let lock = self.load_lock(pack)?;

        let assets = declaration
            .dependencies
            .iter()
            .filter(|dep| dep.is_installed())
            .filter_map(|dep| {
                lock.pin(&dep.name).map(|pin| PackAsset {
                    dependency: dep.name.clone(),
                    asset_type: pin.asset_type,
                    filename: pin.filename.clone(),
                    sha256: pin.sha256.clone(),
                })
            })
            .collect();
        Ok(PackContents {
            pack: pack.to_string(),
            assets,
        })
    }

    pub(crate) fn profile_contents(&self, profile: &Profile) -> Result<Vec<PackContents>> {
        profile.packs.iter().map(|p| self.pack_contents(p)).collect()
    }

    // ---- operations ----

    /// Store a pack declaration.
    ///
    /// Dependencies start `unresolved`, or `resolved` when the declaration
    /// already pins a hash. An existing pack is only overwritten with
    /// `replace`, and never while a UI has it stacked; the views of profiles
    /// that list it are rebuilt so they stop serving the old pins.
    pub fn import_pack(&self, mut pack: Pack, replace: bool) -> Result<Pack> {
        pack.validate()?;
        let name = pack.name.clone();

        let _pack_guard = self.layout.lock(LockScope::Pack(name.clone()))?;
        let path = self.layout.pack_path(&name);
        let existed = path.exists();
        if existed && !replace {
            return Err(CoreError::PackExists(name));
        }

        let runtime_guard = if existed {
            let guard = self.layout.lock(LockScope::Runtime)?;
            let state = RuntimeState::load(&self.layout.runtime_path())?;
            let uis = state.uis_holding(&work_profile_name(&name));
            if !uis.is_empty() {
                return Err(CoreError::PackInUse { pack: name, uis });
            }
            Some(guard)
        } else {
            None
        };

        for dep in &mut pack.dependencies {
            dep.status = if dep.known_hash().is_some() {
                AssetStatus::Resolved
            } else {
                AssetStatus::Unresolved
            };
            dep.size = None;
        }
        pack.save(&path)?;
        // Pins of a replaced declaration no longer describe it
        if existed && self.layout.pack_lock_path(&name).exists() {
            std::fs::remove_file(self.layout.pack_lock_path(&name))?;
        }

        if runtime_guard.is_some() {
            self.profiles()
                .rebuild_where_unlocked(|profile| profile.contains(&name))?;
        }
        log_store_debug!("Pack imported", pack = name.as_str(), dependencies = pack.dependencies.len(), replaced = existed);
        Ok(pack)
    }

    /// Resolve and store every dependency of `name`, then make the pack part
    /// of `global` and rebuild the affected views.
    ///
    /// Dependencies resolve in parallel. If some fail, the successful ones
    /// stay installed and pinned and the pack stays out of `global`. The
    /// result is `PartialFailure` when anything succeeded, otherwise the
    /// failing dependency's own error.
    pub fn install_pack(&self, name: &str) -> Result<InstallReport> {
        let (pack, resolved, already_installed) = {
            let _pack_guard = self.layout.lock(LockScope::Pack(name.to_string()))?;
            let mut pack = self.load_pack(name)?;
            let mut lock = self.load_lock(name)?;

            let pending: Vec<_> = pack
                .dependencies
                .iter()
                .filter(|dep| !(dep.is_installed() && lock.pin(&dep.name).is_some()))
                .cloned()
                .collect();
            let already_installed: Vec<String> = pack
                .dependencies
                .iter()
                .filter(|dep| !pending.iter().any(|p| p.name == dep.name))
                .map(|dep| dep.name.clone())
                .collect();

            let resolver = self.resolver();
            let outcomes: Vec<(String, Result<LockedAsset>)> = pending
                .par_iter()
                .map(|dep| (dep.name.clone(), resolver.resolve(dep)))
                .collect();

            let mut resolved = Vec::new();
            let mut failed = Vec::new();
            for (dep_name, outcome) in outcomes {
                let Some(dep) = pack.dependency_mut(&dep_name) else {
                    continue;
                };
                match outcome {
                    Ok(pin) => {
                        dep.sha256 = Some(pin.sha256.clone());
                        dep.size = Some(pin.size);
                        dep.status = AssetStatus::Installed;
                        lock.set_pin(dep_name.clone(), pin);
                        resolved.push(dep_name);
                    }
                    Err(e) => {
                        dep.status = AssetStatus::Unresolved;
                        failed.push((dep_name, e));
                    }
                }
            }

            lock.save(self.layout.pack_lock_path(name))?;
            pack.save(&self.layout.pack_path(name))?;

            batch_outcome(format!("install {}", name), resolved.clone(), failed)?;
            (pack, resolved, already_installed)
        };

        let views = {
            let _runtime_guard = self.layout.lock(LockScope::Runtime)?;
            let mut global = Profile::load_global(&self.layout)?;
            global.add_pack(name);
            global.save_if_changed(&self.layout)?;
            self.profiles().rebuild_where_unlocked(|_| true)?
        };

        Ok(InstallReport {
            pack: pack.name.clone(),
            resolved,
            already_installed,
            warnings: pack.base_model_warnings(),
            views,
        })
    }

    /// Remove a pack declaration and its pins. Blobs are left for `gc`.
    pub fn remove_pack(&self, name: &str) -> Result<()> {
        let _pack_guard = self.layout.lock(LockScope::Pack(name.to_string()))?;
        self.load_pack(name)?;

        let _runtime_guard = self.layout.lock(LockScope::Runtime)?;
        let work = work_profile_name(name);
        let state = RuntimeState::load(&self.layout.runtime_path())?;
        let uis = state.uis_holding(&work);
        if !uis.is_empty() {
            return Err(CoreError::PackInUse {
                pack: name.to_string(),
                uis,
            });
        }

        let mut global = Profile::load_global(&self.layout)?;
        if global.remove_pack(name) {
            global.save(&self.layout)?;
        }

        let builder = self.view_builder();
        for ui in self.uis()? {
            builder.remove(&ui, &work)?;
        }
        remove_dir_if_exists(&self.layout.profiles_dir().join(&work))?;
        remove_dir_if_exists(&self.layout.pack_dir(name))?;

        self.profiles().rebuild_where_unlocked(|_| true)?;
        log_store_debug!("Pack removed", pack = name);
        Ok(())
    }

    pub fn list_packs(&self) -> Result<Vec<PackSummary>> {
        self.layout
            .list_packs()?
            .into_iter()
            .map(|name| {
                let pack = self.load_pack(&name)?;
                Ok(PackSummary {
                    name,
                    version: pack.version.clone(),
                    dependencies: pack.dependencies.len(),
                    installed: pack.is_installed(),
                })
            })
            .collect()
    }

    pub fn get_pack(&self, name: &str) -> Result<Pack> {
        self.load_pack(name)
    }

    /// Pins of an installed pack (dependency -> pin)
    pub fn get_lock(&self, name: &str) -> Result<BTreeMap<String, LockedAsset>> {
        self.load_pack(name)?;
        Ok(self.load_lock(name)?.pins)
    }

    // ---- profile and update shorthands ----

    pub fn use_pack(&self, pack: &str, ui: &str) -> Result<SwitchReport> {
        self.profiles().use_pack(pack, ui)
    }

    pub fn back(&self, ui: &str) -> Result<BackOutcome> {
        self.profiles().back(ui)
    }

    pub fn status(&self, ui: &str) -> Result<UiStatus> {
        self.profiles().status(ui)
    }

    pub fn rebuild(&self, ui: &str, scope: RebuildScope) -> Result<Vec<ViewReport>> {
        self.profiles().rebuild(ui, scope)
    }

    pub fn check_updates(&self, pack: &str) -> Result<UpdatePlan> {
        self.updates().check(pack)
    }

    pub fn apply_update(
        &self,
        pack: &str,
        plan: &UpdatePlan,
        choices: &BTreeMap<String, String>,
        dry_run: bool,
    ) -> Result<UpdateResult> {
        self.updates().apply(pack, plan, choices, dry_run)
    }
}

fn remove_dir_if_exists(path: &std::path::Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

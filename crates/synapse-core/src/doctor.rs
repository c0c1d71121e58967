//! Store diagnostics and repair.

use synapse_cas::{BlobHash, VerifyStatus};
use synapse_config::log_store_warn;
use synapse_layout::LockScope;
use synapse_pack::AssetStatus;
use synapse_runtime::ViewReport;

use crate::error::Result;
use crate::library::Library;
use crate::profile::{RebuildScope, UiStatus};

/// A pinned blob that failed verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProblem {
    pub pack: String,
    pub dependency: String,
    pub sha256: BlobHash,
    pub status: VerifyStatus,
}

/// A dependency whose recorded status was corrected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub pack: String,
    pub dependency: String,
    pub from: AssetStatus,
    pub to: AssetStatus,
}

#[derive(Debug, Clone, Default)]
pub struct DoctorReport {
    pub packs_checked: usize,
    pub blobs_checked: usize,
    pub problems: Vec<BlobProblem>,
    pub status_changes: Vec<StatusChange>,
    pub temp_files_removed: usize,
    pub ui_status: Vec<UiStatus>,
    pub rebuilt: Vec<ViewReport>,
}

impl DoctorReport {
    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty() && self.ui_status.iter().all(|s| s.consistent)
    }
}

impl Library {
    /// Verify every pinned blob, correct dependency statuses, clear stale
    /// import leftovers and report per-UI consistency.
    ///
    /// With `rebuild_views`, every stacked profile is rebuilt and `active`
    /// repointed before the consistency check.
    pub fn doctor(&self, rebuild_views: bool) -> Result<DoctorReport> {
        let mut report = DoctorReport::default();

        for name in self.layout().list_packs()? {
            let _guard = self.layout().lock(LockScope::Pack(name.clone()))?;
            let mut pack = self.load_pack(&name)?;
            let lock = self.load_lock(&name)?;
            let mut changed = false;
            report.packs_checked += 1;

            for dep in &mut pack.dependencies {
                let Some(pin) = lock.pin(&dep.name) else {
                    continue;
                };
                report.blobs_checked += 1;

                let status = self.blobs().verify(&pin.sha256)?;
                let expected = if status == VerifyStatus::Ok {
                    AssetStatus::Installed
                } else {
                    log_store_warn!(
                        "Pinned blob failed verification",
                        pack = name.as_str(),
                        dependency = dep.name.as_str(),
                        sha256 = pin.sha256.short()
                    );
                    report.problems.push(BlobProblem {
                        pack: name.clone(),
                        dependency: dep.name.clone(),
                        sha256: pin.sha256.clone(),
                        status: status.clone(),
                    });
                    AssetStatus::Missing
                };

                // Only installed/missing are derived from the store
                let derived = matches!(dep.status, AssetStatus::Installed | AssetStatus::Missing);
                if derived && dep.status != expected {
                    report.status_changes.push(StatusChange {
                        pack: name.clone(),
                        dependency: dep.name.clone(),
                        from: dep.status,
                        to: expected,
                    });
                    dep.status = expected;
                    changed = true;
                }
            }

            if changed {
                pack.save(&self.layout().pack_path(&name))?;
            }
        }

        report.temp_files_removed = self.blobs().clean_temp(self.config().gc.grace())?;

        let _runtime_guard = self.layout().lock(LockScope::Runtime)?;
        let profiles = self.profiles();
        for ui in self.uis()? {
            if rebuild_views {
                report
                    .rebuilt
                    .extend(profiles.rebuild_unlocked(&ui, RebuildScope::AllProfiles)?);
            }
            report.ui_status.push(profiles.status_unlocked(&ui)?);
        }

        Ok(report)
    }
}

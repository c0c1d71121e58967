//! Updates of `follow_latest` dependencies.
//!
//! `check` asks each dependency's source for published versions and builds
//! a plan; `apply` executes a plan. When candidates disagree on which one is
//! newest the plan entry is `Ambiguous` and the caller has to choose.

use std::collections::BTreeMap;

use synapse_cas::BlobHash;
use synapse_config::log_update_info;
use synapse_layout::LockScope;
use synapse_lock::LockedAsset;
use synapse_pack::{AssetStatus, UpdatePolicy};

use crate::error::{batch_outcome, CoreError, ItemFailure, Result};
use crate::library::Library;
use crate::resolve::{check_filename, Candidate};

/// Plan for one dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanEntry {
    UpToDate {
        dependency: String,
    },
    Determined {
        dependency: String,
        candidate: Candidate,
    },
    Ambiguous {
        dependency: String,
        candidates: Vec<Candidate>,
    },
}

impl PlanEntry {
    pub fn dependency(&self) -> &str {
        match self {
            PlanEntry::UpToDate { dependency }
            | PlanEntry::Determined { dependency, .. }
            | PlanEntry::Ambiguous { dependency, .. } => dependency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    pub pack: String,
    pub entries: Vec<PlanEntry>,
    /// Dependencies whose source could not be queried
    pub errors: Vec<ItemFailure>,
    /// Pins the plan was computed against; `apply` refuses to run once
    /// any of them has moved.
    pub checked_pins: BTreeMap<String, BlobHash>,
}

impl UpdatePlan {
    pub fn has_updates(&self) -> bool {
        self.entries
            .iter()
            .any(|e| !matches!(e, PlanEntry::UpToDate { .. }))
    }

    pub fn ambiguous(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e, PlanEntry::Ambiguous { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinChange {
    pub dependency: String,
    pub from: Option<BlobHash>,
    pub to: BlobHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    pub pack: String,
    pub dry_run: bool,
    pub changes: Vec<PinChange>,
    /// Dependency -> pinned hash after the update
    pub pins: BTreeMap<String, BlobHash>,
    /// `(ui, profile)` views rebuilt
    pub rebuilt: Vec<(String, String)>,
}

/// Classify the candidates of one dependency.
///
/// Newer means a higher `version_id` than the current pin (or, without a
/// version on the pin, a different hash). The entry is `Determined` only
/// when the newest by `version_id` is a single candidate that is also the
/// single newest by `published_at`.
pub fn classify(
    dependency: &str,
    current_version: Option<u64>,
    current_hash: Option<&BlobHash>,
    candidates: Vec<Candidate>,
) -> PlanEntry {
    let newer: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| Some(&c.sha256) != current_hash)
        .filter(|c| current_version.map_or(true, |v| c.version_id > v))
        .collect();

    let dependency = dependency.to_string();
    if newer.is_empty() {
        return PlanEntry::UpToDate { dependency };
    }

    let max_version = newer.iter().map(|c| c.version_id).max();
    let by_version: Vec<&Candidate> = newer
        .iter()
        .filter(|c| Some(c.version_id) == max_version)
        .collect();

    let max_date = newer.iter().filter_map(|c| c.published_at).max();
    let by_date: Vec<&Candidate> = newer
        .iter()
        .filter(|c| c.published_at.is_some() && c.published_at == max_date)
        .collect();

    let agreed = match (by_version.as_slice(), by_date.as_slice()) {
        ([newest], []) => Some(*newest),
        ([newest], [latest]) if newest.id == latest.id => Some(*newest),
        _ => None,
    };

    match agreed {
        Some(candidate) => PlanEntry::Determined {
            dependency,
            candidate: candidate.clone(),
        },
        None => PlanEntry::Ambiguous {
            dependency,
            candidates: newer,
        },
    }
}

pub struct UpdateService<'a> {
    lib: &'a Library,
}

impl<'a> UpdateService<'a> {
    pub fn new(lib: &'a Library) -> Self {
        Self { lib }
    }

    /// Build an update plan for every `follow_latest` dependency of `pack`.
    ///
    /// A dependency whose source cannot be reached is listed in
    /// `errors`; the rest of the plan is still produced.
    pub fn check(&self, pack: &str) -> Result<UpdatePlan> {
        let declaration = self.lib.load_pack(pack)?;
        if !declaration.is_installed() {
            return Err(CoreError::PackNotInstalled(pack.to_string()));
        }
        let lock = self.lib.load_lock(pack)?;
        let resolver = self.lib.resolver();

        let mut entries = Vec::new();
        let mut errors = Vec::new();
        for dep in declaration
            .dependencies
            .iter()
            .filter(|d| d.update_policy == UpdatePolicy::FollowLatest)
        {
            let pin = lock.pin(&dep.name);
            match resolver.candidates(dep) {
                Ok(candidates) => entries.push(classify(
                    &dep.name,
                    pin.and_then(|p| p.version_id),
                    pin.map(|p| &p.sha256),
                    candidates,
                )),
                Err(e) => errors.push(ItemFailure::new(dep.name.clone(), &e)),
            }
        }

        Ok(UpdatePlan {
            pack: pack.to_string(),
            entries,
            errors,
            checked_pins: lock.pinned_hashes(),
        })
    }

    /// Execute `plan`.
    ///
    /// `choices` maps a dependency to a candidate id and is required for
    /// every `Ambiguous` entry; a choice naming no candidate of the plan is
    /// `UnknownCandidate`. A plan whose pins moved since `check` is
    /// `StalePlan`. With `dry_run` nothing is downloaded or
    /// rebuilt, but the result has the same shape. Otherwise new blobs are
    /// imported, the lock document and declaration are updated, and every
    /// stacked profile containing the pack is rebuilt before `active` is
    /// repointed.
    pub fn apply(
        &self,
        pack: &str,
        plan: &UpdatePlan,
        choices: &BTreeMap<String, String>,
        dry_run: bool,
    ) -> Result<UpdateResult> {
        if plan.pack != pack {
            return Err(CoreError::NotFound {
                kind: "update plan for pack",
                name: pack.to_string(),
            });
        }
        let selected = select(plan, choices)?;

        let _pack_guard = self.lib.layout().lock(LockScope::Pack(pack.to_string()))?;
        let mut declaration = self.lib.load_pack(pack)?;
        if !declaration.is_installed() {
            return Err(CoreError::PackNotInstalled(pack.to_string()));
        }
        let mut lock = self.lib.load_lock(pack)?;

        let stale: Vec<String> = selected
            .iter()
            .map(|(dep, _)| dep)
            .filter(|dep| lock.pin(dep).map(|p| &p.sha256) != plan.checked_pins.get(dep.as_str()))
            .cloned()
            .collect();
        if !stale.is_empty() {
            return Err(CoreError::StalePlan {
                pack: pack.to_string(),
                dependencies: stale,
            });
        }

        let changes: Vec<PinChange> = selected
            .iter()
            .map(|(dep, candidate)| PinChange {
                dependency: dep.clone(),
                from: lock.pin(dep).map(|p| p.sha256.clone()),
                to: candidate.sha256.clone(),
            })
            .collect();

        if dry_run {
            let mut pins = lock.pinned_hashes();
            for change in &changes {
                pins.insert(change.dependency.clone(), change.to.clone());
            }
            return Ok(UpdateResult {
                pack: pack.to_string(),
                dry_run: true,
                changes,
                pins,
                rebuilt: Vec::new(),
            });
        }

        let resolver = self.lib.resolver();
        let mut applied = Vec::new();
        let mut failed = Vec::new();
        for ((dep_name, candidate), change) in selected.iter().zip(&changes) {
            let Some(dep) = declaration.dependency_mut(dep_name) else {
                continue;
            };
            let fetched = check_filename(dep_name, &candidate.filename)
                .and_then(|()| resolver.fetch(dep_name, &candidate.download_url, &candidate.sha256));
            match fetched {
                Ok(blob) => {
                    lock.set_pin(
                        dep_name.clone(),
                        LockedAsset {
                            sha256: blob.hash.clone(),
                            size: blob.size,
                            filename: candidate.filename.clone(),
                            asset_type: dep.asset_type,
                            download_url: Some(candidate.download_url.clone()),
                            version_id: Some(candidate.version_id),
                            version_name: Some(candidate.version_name.clone()),
                            published_at: candidate.published_at,
                        },
                    );
                    dep.sha256 = Some(blob.hash);
                    dep.size = Some(blob.size);
                    dep.status = AssetStatus::Installed;
                    applied.push(change.clone());
                }
                Err(e) => failed.push((dep_name.clone(), e)),
            }
        }

        let mut rebuilt = Vec::new();
        if !applied.is_empty() {
            lock.save(self.lib.layout().pack_lock_path(pack))?;
            declaration.save(&self.lib.layout().pack_path(pack))?;

            let _runtime_guard = self.lib.layout().lock(LockScope::Runtime)?;
            let reports = self
                .lib
                .profiles()
                .rebuild_where_unlocked(|profile| profile.contains(pack))?;
            rebuilt = reports.into_iter().map(|r| (r.ui, r.profile)).collect();
        }

        log_update_info!("Update applied", pack = pack, changed = applied.len(), failed = failed.len());

        batch_outcome(
            format!("update {}", pack),
            applied.iter().map(|c| c.dependency.clone()).collect(),
            failed,
        )?;

        Ok(UpdateResult {
            pack: pack.to_string(),
            dry_run: false,
            changes: applied,
            pins: lock.pinned_hashes(),
            rebuilt,
        })
    }
}

/// Pick one candidate per entry that changes something.
fn select(
    plan: &UpdatePlan,
    choices: &BTreeMap<String, String>,
) -> Result<Vec<(String, Candidate)>> {
    if let Some((dependency, candidate)) = choices.iter().find(|(dep, _)| {
        !plan.entries.iter().any(|e| {
            e.dependency() == dep.as_str() && !matches!(e, PlanEntry::UpToDate { .. })
        })
    }) {
        return Err(CoreError::UnknownCandidate {
            dependency: dependency.clone(),
            candidate: candidate.clone(),
        });
    }

    let mut selected = Vec::new();
    let mut unresolved = Vec::new();

    for entry in &plan.entries {
        match entry {
            PlanEntry::UpToDate { .. } => {}
            PlanEntry::Determined {
                dependency,
                candidate,
            } => match choices.get(dependency) {
                Some(id) if *id != candidate.id => {
                    return Err(CoreError::UnknownCandidate {
                        dependency: dependency.clone(),
                        candidate: id.clone(),
                    })
                }
                _ => selected.push((dependency.clone(), candidate.clone())),
            },
            PlanEntry::Ambiguous {
                dependency,
                candidates,
            } => match choices.get(dependency) {
                Some(id) => {
                    let chosen = candidates.iter().find(|c| &c.id == id).ok_or_else(|| {
                        CoreError::UnknownCandidate {
                            dependency: dependency.clone(),
                            candidate: id.clone(),
                        }
                    })?;
                    selected.push((dependency.clone(), chosen.clone()));
                }
                None => unresolved.push(dependency.clone()),
            },
        }
    }

    if !unresolved.is_empty() {
        return Err(CoreError::AmbiguousUpdateRequiresChoice {
            pack: plan.pack.clone(),
            dependencies: unresolved,
        });
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candidate(id: &str, version_id: u64, day: Option<u32>) -> Candidate {
        Candidate {
            id: id.to_string(),
            version_id,
            version_name: format!("v{}", version_id),
            published_at: day.map(|d| Utc.with_ymd_and_hms(2024, 5, d, 0, 0, 0).unwrap()),
            filename: format!("{}.safetensors", id),
            download_url: format!("https://example.invalid/{}", id),
            sha256: BlobHash::of_bytes(id.as_bytes()),
            size: None,
        }
    }

    #[test]
    fn test_no_newer_is_up_to_date() {
        let entry = classify("lora", Some(5), None, vec![candidate("old", 4, Some(1))]);
        assert_eq!(entry, PlanEntry::UpToDate { dependency: "lora".into() });
    }

    #[test]
    fn test_single_newer_is_determined() {
        let entry = classify(
            "lora",
            Some(1),
            None,
            vec![candidate("old", 1, Some(1)), candidate("new", 2, Some(2))],
        );
        assert!(matches!(entry, PlanEntry::Determined { ref candidate, .. } if candidate.id == "new"));
    }

    #[test]
    fn test_criteria_disagree_is_ambiguous() {
        // Highest version was published before the other newer file
        let entry = classify(
            "lora",
            Some(1),
            None,
            vec![candidate("v3", 3, Some(2)), candidate("v2-fix", 2, Some(9))],
        );
        match entry {
            PlanEntry::Ambiguous { candidates, .. } => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_two_files_same_version_is_ambiguous() {
        let entry = classify(
            "ckpt",
            Some(1),
            None,
            vec![candidate("fp16", 2, None), candidate("fp32", 2, None)],
        );
        assert!(matches!(entry, PlanEntry::Ambiguous { .. }));
    }

    #[test]
    fn test_current_hash_is_not_an_update() {
        let current = candidate("same", 7, None);
        let entry = classify("x", None, Some(&current.sha256), vec![current.clone()]);
        assert!(matches!(entry, PlanEntry::UpToDate { .. }));
    }

    #[test]
    fn test_select_requires_choice_for_ambiguous() {
        let plan = UpdatePlan {
            pack: "P".into(),
            entries: vec![PlanEntry::Ambiguous {
                dependency: "ckpt".into(),
                candidates: vec![candidate("a", 2, None), candidate("b", 2, None)],
            }],
            errors: Vec::new(),
            checked_pins: BTreeMap::new(),
        };

        let err = select(&plan, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, CoreError::AmbiguousUpdateRequiresChoice { .. }));

        let bad = BTreeMap::from([("ckpt".to_string(), "zzz".to_string())]);
        assert!(matches!(
            select(&plan, &bad).unwrap_err(),
            CoreError::UnknownCandidate { .. }
        ));

        let good = BTreeMap::from([("ckpt".to_string(), "b".to_string())]);
        let selected = select(&plan, &good).unwrap();
        assert_eq!(selected[0].1.id, "b");
    }

    #[test]
    fn test_choice_for_dependency_outside_plan_is_rejected() {
        let plan = UpdatePlan {
            pack: "P".into(),
            entries: vec![
                PlanEntry::Determined {
                    dependency: "lora".into(),
                    candidate: candidate("new", 2, None),
                },
                PlanEntry::UpToDate {
                    dependency: "vae".into(),
                },
            ],
            errors: Vec::new(),
            checked_pins: BTreeMap::new(),
        };

        for (dep, id) in [("lroa", "new"), ("vae", "new"), ("lora", "other")] {
            let choices = BTreeMap::from([(dep.to_string(), id.to_string())]);
            assert!(matches!(
                select(&plan, &choices).unwrap_err(),
                CoreError::UnknownCandidate { ref dependency, .. } if dependency == dep
            ));
        }

        let agreeing = BTreeMap::from([("lora".to_string(), "new".to_string())]);
        assert_eq!(select(&plan, &agreeing).unwrap()[0].1.id, "new");
    }
}

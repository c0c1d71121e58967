//! Profile switching.
//!
//! Each UI has a stack of profiles (`data/runtime.json`), a view per profile
//! and an `active` symlink. The three must agree on the current profile.
//! Every switch runs under the runtime lock in one order: build the view,
//! repoint `active`, then write the stack. A crash before the repoint leaves
//! the previous state untouched.

use std::collections::BTreeSet;

use synapse_config::{log_profile_info, log_profile_warn};
use synapse_layout::{validate_name, LockScope, ScopedLock};
use synapse_runtime::{
    point_active, read_active, work_profile_pack, Profile, RuntimeState, ViewReport,
    GLOBAL_PROFILE,
};

use crate::error::{CoreError, Result};
use crate::library::Library;

/// Which views `rebuild` recomputes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildScope {
    StackTop,
    AllProfiles,
}

/// Result of a committed `use`
#[derive(Debug, Clone)]
pub struct SwitchReport {
    pub ui: String,
    pub profile: String,
    pub stack: Vec<String>,
    pub view: ViewReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackOutcome {
    Popped {
        from: String,
        to: String,
        stack: Vec<String>,
    },
    /// Only `global` was left; nothing changed
    AtGlobal,
}

/// Holy-Trinity snapshot for one UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiStatus {
    pub ui: String,
    pub stack: Vec<String>,
    pub active: Option<String>,
    pub view_present: bool,
    pub consistent: bool,
}

impl UiStatus {
    pub fn top(&self) -> &str {
        self.stack.last().map(String::as_str).unwrap_or(GLOBAL_PROFILE)
    }

    /// Why the UI is inconsistent, if it is.
    pub fn problem(&self) -> Option<String> {
        if self.consistent {
            return None;
        }
        Some(match &self.active {
            None => format!("no active pointer, stack top is {}", self.top()),
            Some(active) if active != self.top() => {
                format!("active points at {}, stack top is {}", active, self.top())
            }
            Some(_) => format!("view for {} is missing", self.top()),
        })
    }
}

/// A built view waiting to be made active.
///
/// Holds the runtime lock. Dropping it without [`commit`](Self::commit)
/// leaves the stack and the active pointer as they were.
pub struct PreparedSwitch<'a> {
    lib: &'a Library,
    ui: String,
    profile: String,
    view: ViewReport,
    _guard: ScopedLock,
}

impl PreparedSwitch<'_> {
    pub fn view(&self) -> &ViewReport {
        &self.view
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Repoint `active`, then push the profile.
    pub fn commit(self) -> Result<SwitchReport> {
        let layout = self.lib.layout();
        point_active(layout, &self.ui, &self.profile)?;

        let mut state = RuntimeState::load(&layout.runtime_path())?;
        state.push(&self.ui, &self.profile);
        state.save(&layout.runtime_path())?;

        log_profile_info!("Switched profile", ui = self.ui.as_str(), profile = self.profile.as_str());
        Ok(SwitchReport {
            stack: state.stack(&self.ui),
            ui: self.ui,
            profile: self.profile,
            view: self.view,
        })
    }
}

pub struct ProfileService<'a> {
    lib: &'a Library,
}

impl<'a> ProfileService<'a> {
    pub fn new(lib: &'a Library) -> Self {
        Self { lib }
    }

    fn lock(&self) -> Result<ScopedLock> {
        Ok(self.lib.layout().lock(LockScope::Runtime)?)
    }

    fn state(&self) -> Result<RuntimeState> {
        Ok(RuntimeState::load(&self.lib.layout().runtime_path())?)
    }

    /// Current pack list of a profile. `work__` profiles are recomposed from
    /// `global` and their document refreshed when it changed.
    pub(crate) fn compose(&self, profile: &str) -> Result<Profile> {
        let layout = self.lib.layout();
        if profile == GLOBAL_PROFILE {
            return Ok(Profile::load_global(layout)?);
        }
        if let Some(pack) = work_profile_pack(profile) {
            let global = Profile::load_global(layout)?;
            let work = Profile::work(&global, pack);
            work.save_if_changed(layout)?;
            return Ok(work);
        }
        Profile::load(layout, profile)?.ok_or_else(|| CoreError::NotFound {
            kind: "profile",
            name: profile.to_string(),
        })
    }

    fn build(&self, ui: &str, profile: &Profile) -> Result<ViewReport> {
        let contents = self.lib.profile_contents(profile)?;
        Ok(self.lib.view_builder().build(ui, &profile.name, &contents)?)
    }

    /// Steps 1-3 of `use`: validate, compose `work__<pack>`, build its view.
    pub fn prepare_use(&self, pack: &str, ui: &str) -> Result<PreparedSwitch<'a>> {
        validate_name("ui", ui)?;
        let guard = self.lock()?;

        let declaration = self.lib.load_pack(pack)?;
        if !declaration.is_installed() {
            return Err(CoreError::PackNotInstalled(pack.to_string()));
        }

        let global = Profile::load_global(self.lib.layout())?;
        let work = Profile::work(&global, pack);
        work.save_if_changed(self.lib.layout())?;
        let view = self.build(ui, &work)?;

        Ok(PreparedSwitch {
            lib: self.lib,
            ui: ui.to_string(),
            profile: work.name,
            view,
            _guard: guard,
        })
    }

    /// Activate `pack` on top of `global` for `ui`.
    pub fn use_pack(&self, pack: &str, ui: &str) -> Result<SwitchReport> {
        self.prepare_use(pack, ui)?.commit()
    }

    /// Pop the stack and make the new top active.
    pub fn back(&self, ui: &str) -> Result<BackOutcome> {
        validate_name("ui", ui)?;
        let _guard = self.lock()?;
        let layout = self.lib.layout();

        let mut state = self.state()?;
        let Some((from, to)) = state.pop(ui) else {
            log_profile_info!("Already at global", ui = ui);
            return Ok(BackOutcome::AtGlobal);
        };

        let profile = self.compose(&to)?;
        self.build(ui, &profile)?;
        point_active(layout, ui, &to)?;
        state.save(&layout.runtime_path())?;

        // The profile document is kept for a fast re-use; its view is not
        if !state.contains(ui, &from) {
            self.lib.view_builder().remove(ui, &from)?;
        }

        log_profile_info!("Returned to profile", ui = ui, from = from.as_str(), to = to.as_str());
        Ok(BackOutcome::Popped {
            from,
            to,
            stack: state.stack(ui),
        })
    }

    /// Stack, active pointer and view presence for `ui`. Never repairs.
    pub fn status(&self, ui: &str) -> Result<UiStatus> {
        validate_name("ui", ui)?;
        let _guard = self.lock()?;
        self.status_unlocked(ui)
    }

    pub(crate) fn status_unlocked(&self, ui: &str) -> Result<UiStatus> {
        let stack = self.state()?.stack(ui);
        let top = stack.last().cloned().unwrap_or_else(|| GLOBAL_PROFILE.to_string());
        let active = read_active(self.lib.layout(), ui)?;
        let view_present = self.lib.view_builder().exists(ui, &top);
        let consistent = view_present && active.as_deref() == Some(top.as_str());
        Ok(UiStatus {
            ui: ui.to_string(),
            stack,
            active,
            view_present,
            consistent,
        })
    }

    /// Like [`status`](Self::status), but a disagreement is an error.
    pub fn ensure_consistent(&self, ui: &str) -> Result<UiStatus> {
        let status = self.status(ui)?;
        match status.problem() {
            Some(detail) => Err(CoreError::Inconsistent {
                ui: ui.to_string(),
                detail,
            }),
            None => Ok(status),
        }
    }

    /// Recompute views from scratch and repoint `active` at the stack top.
    pub fn rebuild(&self, ui: &str, scope: RebuildScope) -> Result<Vec<ViewReport>> {
        validate_name("ui", ui)?;
        let _guard = self.lock()?;
        self.rebuild_unlocked(ui, scope)
    }

    pub(crate) fn rebuild_unlocked(&self, ui: &str, scope: RebuildScope) -> Result<Vec<ViewReport>> {
        let stack = self.state()?.stack(ui);
        let top = stack.last().cloned().unwrap_or_else(|| GLOBAL_PROFILE.to_string());

        let targets: Vec<String> = match scope {
            RebuildScope::StackTop => vec![top.clone()],
            RebuildScope::AllProfiles => unique_in_order(&stack),
        };

        let mut reports = Vec::new();
        for name in &targets {
            let profile = self.compose(name)?;
            reports.push(self.build(ui, &profile)?);
        }
        point_active(self.lib.layout(), ui, &top)?;

        if scope == RebuildScope::AllProfiles {
            self.prune_views(ui, &stack)?;
        }
        Ok(reports)
    }

    /// Rebuild every stacked profile of every UI for which `affects` holds,
    /// repointing `active` where the top was rebuilt or lacks a view.
    ///
    /// Caller holds the runtime lock.
    pub(crate) fn rebuild_where_unlocked(
        &self,
        affects: impl Fn(&Profile) -> bool,
    ) -> Result<Vec<ViewReport>> {
        let mut reports = Vec::new();
        for ui in self.lib.uis()? {
            let stack = self.state()?.stack(&ui);
            let top = stack.last().cloned().unwrap_or_else(|| GLOBAL_PROFILE.to_string());
            let mut repoint = !self.lib.view_builder().exists(&ui, &top)
                || read_active(self.lib.layout(), &ui)?.as_deref() != Some(top.as_str());

            for name in unique_in_order(&stack) {
                let profile = self.compose(&name)?;
                if affects(&profile) || !self.lib.view_builder().exists(&ui, &name) {
                    reports.push(self.build(&ui, &profile)?);
                    repoint |= name == top;
                }
            }
            if repoint {
                point_active(self.lib.layout(), &ui, &top)?;
            }
        }
        Ok(reports)
    }

    /// Delete view directories of profiles no longer on the stack.
    fn prune_views(&self, ui: &str, stack: &[String]) -> Result<()> {
        let dir = self.lib.layout().ui_profiles_dir(ui);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let keep: BTreeSet<&str> = stack.iter().map(String::as_str).collect();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !keep.contains(name.as_str()) {
                log_profile_warn!("Removing view of unstacked profile", ui = ui, profile = name.as_str());
                std::fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }
}

fn unique_in_order(stack: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    stack
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_in_order() {
        let stack = vec![
            "global".to_string(),
            "work__A".to_string(),
            "work__A".to_string(),
            "work__B".to_string(),
        ];
        assert_eq!(unique_in_order(&stack), vec!["global", "work__A", "work__B"]);
    }

    #[test]
    fn test_status_problem_messages() {
        let mut status = UiStatus {
            ui: "comfyui".into(),
            stack: vec!["global".into(), "work__A".into()],
            active: Some("global".into()),
            view_present: true,
            consistent: false,
        };
        assert_eq!(
            status.problem().unwrap(),
            "active points at global, stack top is work__A"
        );

        status.active = Some("work__A".into());
        status.view_present = false;
        assert_eq!(status.problem().unwrap(), "view for work__A is missing");

        status.view_present = true;
        status.consistent = true;
        assert!(status.problem().is_none());
    }
}

//! Per-UI profile stacks (`data/runtime.json`).
//!
//! ```json
//! {"ui": {"comfyui": {"stack": ["global", "work__MyPack"]}}}
//! ```
//!
//! The top of a stack is the active profile. A stack is never empty:
//! `global` is the floor, and a UI missing from the document reads as
//! `["global"]`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use synapse_layout::{read_document, write_document};

use crate::profile::GLOBAL_PROFILE;
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeState {
    #[serde(default)]
    pub ui: BTreeMap<String, UiRuntime>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiRuntime {
    #[serde(default)]
    pub stack: Vec<String>,
}

impl RuntimeState {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(read_document(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        Ok(write_document(path, self)?)
    }

    /// Stack for `ui`, bottom first.
    pub fn stack(&self, ui: &str) -> Vec<String> {
        match self.ui.get(ui) {
            Some(rt) if !rt.stack.is_empty() => rt.stack.clone(),
            _ => vec![GLOBAL_PROFILE.to_string()],
        }
    }

    pub fn top(&self, ui: &str) -> String {
        self.ui
            .get(ui)
            .and_then(|rt| rt.stack.last().cloned())
            .unwrap_or_else(|| GLOBAL_PROFILE.to_string())
    }

    pub fn push(&mut self, ui: &str, profile: &str) {
        let mut stack = self.stack(ui);
        stack.push(profile.to_string());
        self.ui.insert(ui.to_string(), UiRuntime { stack });
    }

    /// Pop the top profile. Returns `(popped, new_top)`, or `None` when only
    /// the floor is left.
    pub fn pop(&mut self, ui: &str) -> Option<(String, String)> {
        let mut stack = self.stack(ui);
        if stack.len() <= 1 {
            return None;
        }
        let popped = stack.pop()?;
        let top = stack.last().cloned().unwrap_or_else(|| GLOBAL_PROFILE.to_string());
        self.ui.insert(ui.to_string(), UiRuntime { stack });
        Some((popped, top))
    }

    pub fn contains(&self, ui: &str, profile: &str) -> bool {
        self.stack(ui).iter().any(|p| p == profile)
    }

    /// UIs whose stack holds `profile`.
    pub fn uis_holding(&self, profile: &str) -> Vec<String> {
        self.ui
            .iter()
            .filter(|(_, rt)| rt.stack.iter().any(|p| p == profile))
            .map(|(ui, _)| ui.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_ui_reads_as_global() {
        let state = RuntimeState::default();
        assert_eq!(state.stack("comfyui"), vec!["global"]);
        assert_eq!(state.top("comfyui"), "global");
    }

    #[test]
    fn test_push_pop_restores() {
        let mut state = RuntimeState::default();
        state.push("comfyui", "work__A");
        state.push("comfyui", "work__B");
        assert_eq!(state.stack("comfyui"), vec!["global", "work__A", "work__B"]);

        assert_eq!(
            state.pop("comfyui"),
            Some(("work__B".to_string(), "work__A".to_string()))
        );
        assert_eq!(
            state.pop("comfyui"),
            Some(("work__A".to_string(), "global".to_string()))
        );
        assert_eq!(state.pop("comfyui"), None);
        assert_eq!(state.stack("comfyui"), vec!["global"]);
    }

    #[test]
    fn test_document_shape() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("runtime.json");

        let mut state = RuntimeState::default();
        state.push("forge", "work__X");
        state.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({"ui": {"forge": {"stack": ["global", "work__X"]}}})
        );
        assert_eq!(RuntimeState::load(&path).unwrap(), state);
        assert_eq!(state.uis_holding("work__X"), vec!["forge"]);
    }
}
